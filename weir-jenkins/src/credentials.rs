//! Credential store and script console endpoints

use reqwest::Method;
use serde_json::json;

use crate::JenkinsClient;
use crate::error::Result;
use crate::types::Credential;

const CREDENTIAL_STORE: &str = "/credentials/store/system/domain/_";

impl JenkinsClient {
    // =============================================================================
    // Credentials
    // =============================================================================

    /// Store a credential in the global domain
    pub async fn create_credential(&self, credential: &Credential) -> Result<()> {
        let body = serde_json::to_string(&json!({ "credentials": credential }))?;
        let path = format!("{}/createCredentials", CREDENTIAL_STORE);
        let response = self
            .request(Method::POST, &path)
            .form(&[("json", body)])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Check that a credential exists
    ///
    /// # Returns
    /// `Ok(())` when it exists, `ClientError::NotFound` when it does not
    pub async fn get_credential(&self, id: &str) -> Result<()> {
        let path = format!(
            "{}/credential/{}/api/json",
            CREDENTIAL_STORE,
            urlencoding::encode(id)
        );
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Script Console
    // =============================================================================

    /// Run a Groovy script on the backend and return its output
    pub async fn exec_script(&self, script: &str) -> Result<String> {
        let response = self
            .request(Method::POST, "/scriptText")
            .form(&[("script", script)])
            .send()
            .await?;

        self.handle_text_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use crate::JenkinsClient;
    use crate::testing::serve;
    use crate::types::Credential;
    use axum::{Form, Router, http::StatusCode, routing::get, routing::post};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_create_credential_posts_json_form_field() {
        let router = Router::new().route(
            "/credentials/store/system/domain/_/createCredentials",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let body: serde_json::Value =
                    serde_json::from_str(form.get("json").map(String::as_str).unwrap_or("{}"))
                        .unwrap_or_default();
                if body["credentials"]["id"] == "p-1:github-cred"
                    && body["credentials"]["scope"] == "GLOBAL"
                {
                    StatusCode::OK
                } else {
                    StatusCode::BAD_REQUEST
                }
            }),
        );
        let client = JenkinsClient::connect(serve(router).await, "admin", "token")
            .await
            .unwrap();

        let credential = Credential::username_password("p-1:github-cred", "octocat", "gho_x");
        client.create_credential(&credential).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_credential_is_not_found() {
        let router = Router::new().route(
            "/credentials/store/system/domain/_/credential/{id}/api/json",
            get(|| async { StatusCode::NOT_FOUND }),
        );
        let client = JenkinsClient::connect(serve(router).await, "admin", "token")
            .await
            .unwrap();

        assert!(client.get_credential("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_exec_script_returns_output() {
        let router = Router::new().route(
            "/scriptText",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                format!("ran {}", form.get("script").cloned().unwrap_or_default())
            }),
        );
        let client = JenkinsClient::connect(serve(router).await, "admin", "token")
            .await
            .unwrap();

        let out = client.exec_script("println 1").await.unwrap();
        assert_eq!(out, "ran println 1");
    }
}
