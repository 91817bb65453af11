//! GitHub provider

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use weir_core::domain::pipeline::Pipeline;
use weir_core::domain::source_code::{
    RepoPerm, SourceCodeCredentialSpec, SourceCodeRepositorySpec, SourceCodeType,
};

use crate::error::{RemoteError, Result};
use crate::http::{decode_content, handle_empty_response, handle_response};
use crate::pagination::next_link;
use crate::repo_url::parse_owner_repo;
use crate::{PIPELINE_FILE_NAMES, ProviderConfig, Remote, hook_url_suffix};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_OAUTH_URL: &str = "https://github.com/login/oauth/access_token";
const AGENT: &str = "weir";

#[derive(Debug, Clone)]
pub struct GithubRemote {
    config: ProviderConfig,
    api_url: String,
    oauth_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar_url: String,
    #[serde(default)]
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    clone_url: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    permissions: Permissions,
}

#[derive(Debug, Default, Deserialize)]
struct Permissions {
    #[serde(default)]
    pull: bool,
    #[serde(default)]
    push: bool,
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
    #[serde(default)]
    config: HookConfig,
}

#[derive(Debug, Default, Deserialize)]
struct HookConfig {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(default)]
    content: String,
}

impl GithubRemote {
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: ProviderConfig, client: Client) -> Self {
        let (api_url, oauth_url) = match config.host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => (
                format!("{}://{}/api/v3", config.scheme(), host),
                format!("{}://{}/login/oauth/access_token", config.scheme(), host),
            ),
            None => (DEFAULT_API_URL.to_string(), DEFAULT_OAUTH_URL.to_string()),
        };

        Self {
            config,
            api_url,
            oauth_url,
            client,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn get(&self, url: &str, access_token: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(access_token)
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/vnd.github+json")
    }

    async fn current_user(&self, access_token: &str) -> Result<User> {
        let url = format!("{}/user", self.api_url);
        let response = self.get(&url, access_token).send().await?;
        handle_response(response).await
    }

    async fn list_hooks(&self, owner: &str, repo: &str, access_token: &str) -> Result<Vec<Hook>> {
        let mut hooks = Vec::new();
        let mut next = Some(format!(
            "{}/repos/{}/{}/hooks?per_page=100",
            self.api_url, owner, repo
        ));

        while let Some(url) = next {
            let response = self.get(&url, access_token).send().await?;
            next = next_link(response.headers());
            let page: Vec<Hook> = handle_response(response).await?;
            hooks.extend(page);
        }

        Ok(hooks)
    }

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
        access_token: &str,
    ) -> Result<Vec<u8>> {
        let url = format!("{}/repos/{}/{}/contents/{}", self.api_url, owner, repo, path);
        let response = self
            .get(&url, access_token)
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        let file: FileContent = handle_response(response).await?;
        decode_content(&file.content)
    }
}

#[async_trait]
impl Remote for GithubRemote {
    fn source_code_type(&self) -> SourceCodeType {
        SourceCodeType::Github
    }

    async fn login(&self, redirect_url: Option<&str>, code: &str) -> Result<SourceCodeCredentialSpec> {
        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
        ];
        if let Some(redirect_url) = redirect_url {
            form.push(("redirect_uri", redirect_url));
        }

        let response = self
            .client
            .post(&self.oauth_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, AGENT)
            .form(&form)
            .send()
            .await?;
        let token: TokenResponse = handle_response(response).await?;

        if !token.token_type.eq_ignore_ascii_case("bearer") || token.access_token.is_empty() {
            return Err(RemoteError::Unauthorized(
                token
                    .error_description
                    .unwrap_or_else(|| "no bearer token returned".to_string()),
            ));
        }

        let user = self.current_user(&token.access_token).await?;
        debug!("GitHub login succeeded for {}", user.login);

        Ok(SourceCodeCredentialSpec {
            cluster_name: String::new(),
            user_name: String::new(),
            source_code_type: SourceCodeType::Github,
            display_name: user.name.filter(|n| !n.is_empty()).unwrap_or_else(|| user.login.clone()),
            git_login_name: user.login.clone(),
            login_name: user.login,
            avatar_url: user.avatar_url,
            html_url: user.html_url,
            access_token: token.access_token,
        })
    }

    async fn repos(
        &self,
        credential: &SourceCodeCredentialSpec,
    ) -> Result<Vec<SourceCodeRepositorySpec>> {
        let mut repos = Vec::new();
        let mut next = Some(format!("{}/user/repos?per_page=100", self.api_url));

        while let Some(url) = next {
            let response = self.get(&url, &credential.access_token).send().await?;
            next = next_link(response.headers());
            let page: Vec<Repository> = handle_response(response).await?;

            repos.extend(page.into_iter().map(|r| SourceCodeRepositorySpec {
                source_code_type: SourceCodeType::Github,
                user_name: credential.user_name.clone(),
                source_code_credential_name: None,
                url: r.clone_url,
                permissions: RepoPerm {
                    pull: r.permissions.pull,
                    push: r.permissions.push,
                    admin: r.permissions.admin,
                },
                language: r.language,
                default_branch: r.default_branch,
            }));
        }

        Ok(repos)
    }

    async fn create_hook(&self, pipeline: &Pipeline, access_token: &str) -> Result<String> {
        let token = pipeline
            .status
            .token
            .as_deref()
            .ok_or_else(|| RemoteError::InvalidRequest("pipeline has no webhook token".into()))?;
        let (owner, repo) = parse_owner_repo(&pipeline.spec.repository_url)?;

        let url = format!("{}/repos/{}/{}/hooks", self.api_url, owner, repo);
        let body = json!({
            "name": "web",
            "active": true,
            "events": ["push", "pull_request"],
            "config": {
                "url": self.config.hook_url(pipeline),
                "content_type": "json",
                "secret": token,
                "insecure_ssl": "0",
            }
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .header(USER_AGENT, AGENT)
            .json(&body)
            .send()
            .await?;
        let hook: Hook = handle_response(response).await?;

        Ok(hook.id.to_string())
    }

    async fn delete_hook(&self, pipeline: &Pipeline, access_token: &str) -> Result<()> {
        let (owner, repo) = parse_owner_repo(&pipeline.spec.repository_url)?;
        let suffix = hook_url_suffix(pipeline);

        let hooks = self.list_hooks(&owner, &repo, access_token).await?;
        let Some(hook) = hooks.iter().find(|h| h.config.url.ends_with(&suffix)) else {
            debug!("No GitHub hook for {} found on {}/{}", suffix, owner, repo);
            return Ok(());
        };

        let url = format!("{}/repos/{}/{}/hooks/{}", self.api_url, owner, repo, hook.id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(access_token)
            .header(USER_AGENT, AGENT)
            .send()
            .await?;

        handle_empty_response(response).await
    }

    async fn get_pipeline_file_in_repo(
        &self,
        repo_url: &str,
        git_ref: Option<&str>,
        access_token: &str,
    ) -> Result<Option<Vec<u8>>> {
        let (owner, repo) = parse_owner_repo(repo_url)?;
        let git_ref = match git_ref {
            Some(r) => r.to_string(),
            None => self.get_default_branch(repo_url, access_token).await?,
        };

        for name in PIPELINE_FILE_NAMES {
            match self.get_file(&owner, &repo, name, &git_ref, access_token).await {
                Ok(content) => return Ok(Some(content)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    async fn get_default_branch(&self, repo_url: &str, access_token: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Repo {
            default_branch: String,
        }

        let (owner, repo) = parse_owner_repo(repo_url)?;
        let url = format!("{}/repos/{}/{}", self.api_url, owner, repo);
        let response = self.get(&url, access_token).send().await?;
        let repo: Repo = handle_response(response).await?;

        Ok(repo.default_branch)
    }
}
