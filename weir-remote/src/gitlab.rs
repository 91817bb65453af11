//! GitLab provider

use async_trait::async_trait;
use reqwest::Client;
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

const DEFAULT_HOST_URL: &str = "https://gitlab.com";

/// Access levels as GitLab reports them
const REPORTER_ACCESS: u32 = 20;
const DEVELOPER_ACCESS: u32 = 30;
const MAINTAINER_ACCESS: u32 = 40;

/// Git user name GitLab expects alongside an OAuth token
const GIT_LOGIN_NAME: &str = "oauth2";

#[derive(Debug, Clone)]
pub struct GitlabRemote {
    config: ProviderConfig,
    host_url: String,
    api_url: String,
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
    username: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    http_url_to_repo: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    permissions: Option<Permissions>,
}

#[derive(Debug, Default, Deserialize)]
struct Permissions {
    #[serde(default)]
    project_access: Option<Access>,
    #[serde(default)]
    group_access: Option<Access>,
}

#[derive(Debug, Deserialize)]
struct Access {
    access_level: u32,
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(default)]
    content: String,
}

/// Map the stronger of project and group access onto pull/push/admin
fn repo_perm(permissions: Option<&Permissions>) -> RepoPerm {
    let level = permissions
        .map(|p| {
            let project = p.project_access.as_ref().map_or(0, |a| a.access_level);
            let group = p.group_access.as_ref().map_or(0, |a| a.access_level);
            project.max(group)
        })
        .unwrap_or(0);

    RepoPerm {
        pull: level >= REPORTER_ACCESS,
        push: level >= DEVELOPER_ACCESS,
        admin: level >= MAINTAINER_ACCESS,
    }
}

impl GitlabRemote {
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: ProviderConfig, client: Client) -> Self {
        let host_url = match config.host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => format!("{}://{}", config.scheme(), host),
            None => DEFAULT_HOST_URL.to_string(),
        };
        let api_url = format!("{}/api/v4", host_url);

        Self {
            config,
            host_url,
            api_url,
            client,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// URL-encoded `owner/repo` project id
    fn project_id(repo_url: &str) -> Result<String> {
        let (owner, repo) = parse_owner_repo(repo_url)?;
        Ok(urlencoding::encode(&format!("{}/{}", owner, repo)).into_owned())
    }

    async fn list_hooks(&self, project: &str, access_token: &str) -> Result<Vec<Hook>> {
        let mut hooks = Vec::new();
        let mut next = Some(format!("{}/projects/{}/hooks?per_page=100", self.api_url, project));

        while let Some(url) = next {
            let response = self.client.get(&url).bearer_auth(access_token).send().await?;
            next = next_link(response.headers());
            let page: Vec<Hook> = handle_response(response).await?;
            hooks.extend(page);
        }

        Ok(hooks)
    }

    async fn get_file(
        &self,
        project: &str,
        path: &str,
        git_ref: &str,
        access_token: &str,
    ) -> Result<Vec<u8>> {
        let url = format!(
            "{}/projects/{}/repository/files/{}",
            self.api_url,
            project,
            urlencoding::encode(path)
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        let file: FileContent = handle_response(response).await?;
        decode_content(&file.content)
    }
}

#[async_trait]
impl Remote for GitlabRemote {
    fn source_code_type(&self) -> SourceCodeType {
        SourceCodeType::Gitlab
    }

    async fn login(&self, redirect_url: Option<&str>, code: &str) -> Result<SourceCodeCredentialSpec> {
        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];
        if let Some(redirect_url) = redirect_url {
            form.push(("redirect_uri", redirect_url));
        }

        let url = format!("{}/oauth/token", self.host_url);
        let response = self.client.post(&url).form(&form).send().await?;
        let token: TokenResponse = handle_response(response).await?;

        if !token.token_type.eq_ignore_ascii_case("bearer") || token.access_token.is_empty() {
            return Err(RemoteError::Unauthorized(
                token
                    .error_description
                    .unwrap_or_else(|| "no bearer token returned".to_string()),
            ));
        }

        let url = format!("{}/user", self.api_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let user: User = handle_response(response).await?;
        debug!("GitLab login succeeded for {}", user.username);

        Ok(SourceCodeCredentialSpec {
            cluster_name: String::new(),
            user_name: String::new(),
            source_code_type: SourceCodeType::Gitlab,
            login_name: user.username,
            display_name: user.name,
            avatar_url: user.avatar_url.unwrap_or_default(),
            html_url: user.web_url,
            git_login_name: GIT_LOGIN_NAME.to_string(),
            access_token: token.access_token,
        })
    }

    async fn repos(
        &self,
        credential: &SourceCodeCredentialSpec,
    ) -> Result<Vec<SourceCodeRepositorySpec>> {
        let mut repos = Vec::new();
        let mut next = Some(format!(
            "{}/projects?membership=true&per_page=100",
            self.api_url
        ));

        while let Some(url) = next {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&credential.access_token)
                .send()
                .await?;
            next = next_link(response.headers());
            let page: Vec<Project> = handle_response(response).await?;

            repos.extend(page.into_iter().map(|p| SourceCodeRepositorySpec {
                source_code_type: SourceCodeType::Gitlab,
                user_name: credential.user_name.clone(),
                source_code_credential_name: None,
                permissions: repo_perm(p.permissions.as_ref()),
                url: p.http_url_to_repo,
                language: None,
                default_branch: p.default_branch,
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
        let project = Self::project_id(&pipeline.spec.repository_url)?;

        let url = format!("{}/projects/{}/hooks", self.api_url, project);
        let body = json!({
            "url": self.config.hook_url(pipeline),
            "push_events": true,
            "merge_requests_events": true,
            "tag_push_events": true,
            "enable_ssl_verification": false,
            "token": token,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        let hook: Hook = handle_response(response).await?;

        Ok(hook.id.to_string())
    }

    async fn delete_hook(&self, pipeline: &Pipeline, access_token: &str) -> Result<()> {
        let project = Self::project_id(&pipeline.spec.repository_url)?;
        let suffix = hook_url_suffix(pipeline);

        let hooks = self.list_hooks(&project, access_token).await?;
        let Some(hook) = hooks.iter().find(|h| h.url.ends_with(&suffix)) else {
            debug!("No GitLab hook for {} found on project {}", suffix, project);
            return Ok(());
        };

        let url = format!("{}/projects/{}/hooks/{}", self.api_url, project, hook.id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(access_token)
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
        let project = Self::project_id(repo_url)?;
        let git_ref = match git_ref {
            Some(r) => r.to_string(),
            None => self.get_default_branch(repo_url, access_token).await?,
        };

        for name in PIPELINE_FILE_NAMES {
            match self.get_file(&project, name, &git_ref, access_token).await {
                Ok(content) => return Ok(Some(content)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    async fn get_default_branch(&self, repo_url: &str, access_token: &str) -> Result<String> {
        let project = Self::project_id(repo_url)?;
        let url = format!("{}/projects/{}", self.api_url, project);
        let response = self.client.get(&url).bearer_auth(access_token).send().await?;
        let project: Project = handle_response(response).await?;

        project
            .default_branch
            .ok_or_else(|| RemoteError::NotFound(format!("default branch of {}", repo_url)))
    }
}
