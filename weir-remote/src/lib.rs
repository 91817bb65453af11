//! Weir Remote Providers
//!
//! The consuming side of source-control providers: OAuth login, repository
//! discovery, webhook lifecycle and pipeline-file lookup. Each provider
//! implements [`Remote`]; what a provider supports is declared once in a
//! static capability table ([`capabilities`]).

pub mod error;
pub mod github;
pub mod gitlab;
pub mod pagination;
pub mod repo_url;

pub use error::{RemoteError, Result};
pub use github::GithubRemote;
pub use gitlab::GitlabRemote;
pub use repo_url::parse_owner_repo;

use async_trait::async_trait;
use std::sync::Arc;
use weir_core::domain::pipeline::Pipeline;
use weir_core::domain::source_code::{
    SourceCodeCredentialSpec, SourceCodeRepositorySpec, SourceCodeType,
};

/// Candidate pipeline file names, in lookup order
pub const PIPELINE_FILE_NAMES: [&str; 2] = [".pipeline.yaml", ".pipeline.yml"];

/// Operations a provider supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub login: bool,
    pub repos: bool,
    pub hook: bool,
}

/// Static capability table
pub const fn capabilities(source_code_type: SourceCodeType) -> Capabilities {
    match source_code_type {
        SourceCodeType::Github | SourceCodeType::Gitlab => Capabilities {
            login: true,
            repos: true,
            hook: true,
        },
    }
}

/// Connection settings for one provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub source_code_type: SourceCodeType,
    pub client_id: String,
    pub client_secret: String,
    /// Host of a self-managed installation; `None` targets the public service
    pub host: Option<String>,
    /// Use https when talking to `host`
    pub tls: bool,
    /// Public base URL inbound webhooks are delivered to
    pub hook_base_url: String,
}

impl ProviderConfig {
    pub(crate) fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    /// Target URL registered on the provider for `pipeline`
    pub fn hook_url(&self, pipeline: &Pipeline) -> String {
        format!(
            "{}/{}",
            self.hook_base_url.trim_end_matches('/'),
            hook_url_suffix(pipeline)
        )
    }
}

/// The tail every hook URL of `pipeline` ends with
pub fn hook_url_suffix(pipeline: &Pipeline) -> String {
    format!("hooks?pipelineId={}", pipeline.meta.reference())
}

/// A source-control provider
#[async_trait]
pub trait Remote: Send + Sync {
    fn source_code_type(&self) -> SourceCodeType;

    fn capabilities(&self) -> Capabilities {
        capabilities(self.source_code_type())
    }

    /// Exchange an OAuth authorization code and describe the authenticated user
    ///
    /// The returned credential has no cluster or user binding yet.
    async fn login(&self, redirect_url: Option<&str>, code: &str) -> Result<SourceCodeCredentialSpec>;

    /// Every repository visible to `credential`, across all pages
    async fn repos(&self, credential: &SourceCodeCredentialSpec)
    -> Result<Vec<SourceCodeRepositorySpec>>;

    /// Register the pipeline's webhook and return the provider's hook id
    async fn create_hook(&self, pipeline: &Pipeline, access_token: &str) -> Result<String>;

    async fn delete_hook(&self, pipeline: &Pipeline, access_token: &str) -> Result<()>;

    /// Content of the repository's pipeline file, `None` when it has none
    ///
    /// `git_ref` defaults to the repository's default branch.
    async fn get_pipeline_file_in_repo(
        &self,
        repo_url: &str,
        git_ref: Option<&str>,
        access_token: &str,
    ) -> Result<Option<Vec<u8>>>;

    async fn get_default_branch(&self, repo_url: &str, access_token: &str) -> Result<String>;
}

/// Build the remote for `config.source_code_type`
pub fn new_remote(config: ProviderConfig) -> Arc<dyn Remote> {
    match config.source_code_type {
        SourceCodeType::Github => Arc::new(GithubRemote::new(config)),
        SourceCodeType::Gitlab => Arc::new(GitlabRemote::new(config)),
    }
}

/// Response checks shared by the provider clients
pub(crate) mod http {
    use crate::error::{RemoteError, Result};
    use base64::Engine;
    use serde::de::DeserializeOwned;

    pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(RemoteError::NotFound(response.url().path().to_string()));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }

    pub async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    pub async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
        check_status(response).await?;
        Ok(())
    }

    /// Decode base64 file content; providers wrap it at 60 columns
    pub fn decode_content(content: &str) -> Result<Vec<u8>> {
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| RemoteError::ParseError(format!("invalid file content: {}", e)))
    }
}
