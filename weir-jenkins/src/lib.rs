//! Weir Jenkins Client
//!
//! A typed HTTP client for the Jenkins-like CI backend Weir drives.
//!
//! The client covers job definitions, builds, the pipeline workflow API
//! (`wfapi`), node logs, the credential store and the script console.
//! State-changing requests carry the CSRF crumb, which is fetched once when
//! the client connects and reused for the client's lifetime.
//!
//! # Example
//!
//! ```no_run
//! use weir_jenkins::JenkinsClient;
//!
//! # async fn example() -> weir_jenkins::Result<()> {
//! let client = JenkinsClient::connect("http://jenkins:8080", "admin", "token").await?;
//! let info = client.get_job_info("pipeline_app-1").await?;
//! println!("queued: {}", info.in_queue);
//! # Ok(())
//! # }
//! ```

mod api;
mod builds;
mod credentials;
pub mod error;
mod jobs;
pub mod types;

pub use api::JenkinsApi;
pub use error::{ClientError, Result};
pub use types::{
    BuildInfo, Credential, JobInfo, NodeLog, WorkflowNode, WorkflowRun, WorkflowStage,
};

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::Crumb;

/// HTTP client for the Jenkins API
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    /// Base URL of the backend (e.g., "http://jenkins:8080")
    base_url: String,
    user: String,
    token: String,
    /// CSRF crumb header, absent when the backend has CSRF protection disabled
    crumb: Option<(String, String)>,
    client: Client,
}

impl JenkinsClient {
    /// Connect to the backend and fetch the CSRF crumb
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the backend
    /// * `user` - API user
    /// * `token` - API token of `user`
    pub async fn connect(
        base_url: impl Into<String>,
        user: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Self::connect_with_client(base_url, user, token, Client::new()).await
    }

    /// Connect with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub async fn connect_with_client(
        base_url: impl Into<String>,
        user: impl Into<String>,
        token: impl Into<String>,
        client: Client,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let mut jenkins = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.into(),
            token: token.into(),
            crumb: None,
            client,
        };

        match jenkins.fetch_crumb().await {
            Ok(crumb) => jenkins.crumb = Some((crumb.field, crumb.crumb)),
            Err(e) if e.is_not_found() => {
                debug!("Crumb issuer not available, continuing without CSRF crumb");
            }
            Err(e) => return Err(e),
        }

        Ok(jenkins)
    }

    /// Get the base URL of the backend
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_crumb(&self) -> Result<Crumb> {
        let response = self
            .request(Method::GET, "/crumbIssuer/api/json")
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Authenticated request builder for `path`, with the crumb on writes
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let is_write = method != Method::GET;
        let mut builder = self
            .client
            .request(method, url)
            .basic_auth(&self.user, Some(&self.token));

        if is_write {
            if let Some((field, value)) = &self.crumb {
                builder = builder.header(field.as_str(), value.as_str());
            }
        }

        builder
    }

    fn job_path(name: &str) -> String {
        format!("/job/{}", urlencoding::encode(name))
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code, mapping 404 to the `NotFound` sentinel
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status().as_u16();
        let path = response.url().path().to_string();

        match status {
            404 => return Err(ClientError::NotFound(path)),
            401 | 403 => return Err(ClientError::Forbidden { path, status }),
            _ => {}
        }

        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::status(status, body));
        }

        Ok(response)
    }

    /// Handle a response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Handle a response whose body is plain text
    async fn handle_text_response(&self, response: reqwest::Response) -> Result<String> {
        let response = self.check_status(response).await?;
        Ok(response.text().await?)
    }

    /// Handle a response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await?;
        Ok(())
    }
}
