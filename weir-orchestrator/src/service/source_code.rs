//! Source Code Service
//!
//! OAuth login against a remote provider and the repository cache refresh
//! that follows it.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use weir_core::domain::meta::{ObjectMeta, ResourceRef};
use weir_core::domain::pipeline::PipelineError;
use weir_core::domain::source_code::{
    SourceCodeCredential, SourceCodeRepository, SourceCodeType,
};
use weir_core::dto::source_code::LoginRequest;
use weir_remote::{Remote, RemoteError, new_remote, parse_owner_repo};

use super::execution::ExecutionError;
use crate::config::Config;
use crate::repository::{self, Store, StoreError};

/// Service error type
#[derive(Debug, Error)]
pub enum SourceCodeError {
    #[error("source code provider {0} is not configured")]
    NotConfigured(SourceCodeType),

    #[error("{0} does not support {1}")]
    Unsupported(SourceCodeType, &'static str),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(#[from] PipelineError),

    #[error("pipeline {0} has no source code credential")]
    MissingCredential(String),

    #[error("invalid pipeline file: {0}")]
    InvalidPipelineFile(#[from] serde_yaml::Error),

    #[error("repository refresh did not complete: {0}")]
    RefreshAborted(String),

    #[error("repository of {0} has no pipeline file")]
    MissingPipelineFile(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl SourceCodeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SourceCodeError::Store(e) => e.is_not_found(),
            SourceCodeError::Remote(e) => e.is_not_found(),
            SourceCodeError::Execution(e) => e.is_not_found(),
            SourceCodeError::MissingPipelineFile(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceCodeError>;

/// The configured remote providers
#[derive(Clone, Default)]
pub struct Remotes {
    remotes: HashMap<SourceCodeType, Arc<dyn Remote>>,
}

impl Remotes {
    pub fn from_config(config: &Config) -> Self {
        let mut remotes = Self::default();
        for kind in [SourceCodeType::Github, SourceCodeType::Gitlab] {
            if let Some(provider) = config.provider(kind) {
                remotes.insert(new_remote(provider));
            }
        }
        remotes
    }

    pub fn insert(&mut self, remote: Arc<dyn Remote>) {
        self.remotes.insert(remote.source_code_type(), remote);
    }

    pub fn get(&self, source_code_type: SourceCodeType) -> Result<Arc<dyn Remote>> {
        self.remotes
            .get(&source_code_type)
            .cloned()
            .ok_or(SourceCodeError::NotConfigured(source_code_type))
    }
}

/// Name of the credential a login as `login_name` produces
pub fn credential_name(source_code_type: SourceCodeType, login_name: &str) -> String {
    format!("{}-{}", source_code_type, login_name).to_lowercase()
}

/// Complete an OAuth login and start refreshing the user's repositories
///
/// Credentials live in the namespace of the platform user. Logging in again
/// replaces the stored credential.
pub async fn login(
    store: Arc<dyn Store>,
    remote: Arc<dyn Remote>,
    req: LoginRequest,
) -> Result<(SourceCodeCredential, RefreshJob)> {
    let source_code_type = remote.source_code_type();
    if !remote.capabilities().login {
        return Err(SourceCodeError::Unsupported(source_code_type, "login"));
    }

    let mut spec = remote.login(req.redirect_url.as_deref(), &req.code).await?;
    spec.cluster_name = req.cluster_name;
    spec.user_name = req.user_name;

    let mut meta = ObjectMeta::new(
        spec.user_name.clone(),
        credential_name(source_code_type, &spec.login_name),
    );
    meta.created_at = Some(chrono::Utc::now());
    let credential = SourceCodeCredential { meta, spec };

    match repository::delete::<SourceCodeCredential>(
        store.as_ref(),
        &credential.meta.namespace,
        &credential.meta.name,
    )
    .await
    {
        Ok(()) => debug!("Replacing credential {}", credential.meta.reference()),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    let credential = repository::create(store.as_ref(), &credential).await?;

    info!(
        "User {} logged in to {} as {}",
        credential.spec.user_name, source_code_type, credential.spec.login_name
    );

    let job = RefreshJob::spawn(store, remote, credential.clone());
    Ok((credential, job))
}

/// A repository refresh running in the background
///
/// Dropping the job detaches the task; [`RefreshJob::wait`] observes its outcome.
#[derive(Debug)]
pub struct RefreshJob {
    handle: JoinHandle<Result<usize>>,
}

impl RefreshJob {
    pub fn spawn(
        store: Arc<dyn Store>,
        remote: Arc<dyn Remote>,
        credential: SourceCodeCredential,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let repos = refresh_repos(store.as_ref(), remote.as_ref(), &credential).await?;
            Ok(repos.len())
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the refresh and return how many repositories were cached
    pub async fn wait(self) -> Result<usize> {
        self.handle
            .await
            .map_err(|e| SourceCodeError::RefreshAborted(e.to_string()))?
    }
}

/// Replace the cached repositories of `credential` with what the provider lists now
pub async fn refresh_repos(
    store: &dyn Store,
    remote: &dyn Remote,
    credential: &SourceCodeCredential,
) -> Result<Vec<SourceCodeRepository>> {
    if !remote.capabilities().repos {
        return Err(SourceCodeError::Unsupported(
            remote.source_code_type(),
            "repository listing",
        ));
    }

    let specs = remote.repos(&credential.spec).await?;
    let credential_ref = credential.meta.reference();
    let namespace = credential.meta.namespace.as_str();

    let cached: Vec<SourceCodeRepository> = repository::list(store, Some(namespace)).await?;
    for repo in cached
        .iter()
        .filter(|r| r.spec.source_code_credential_name.as_ref() == Some(&credential_ref))
    {
        repository::delete::<SourceCodeRepository>(store, namespace, &repo.meta.name).await?;
    }

    let mut repos = Vec::with_capacity(specs.len());
    for (index, mut spec) in specs.into_iter().enumerate() {
        spec.source_code_credential_name = Some(credential_ref.clone());
        spec.user_name = credential.spec.user_name.clone();

        let name = repository_name(&credential_ref, &spec.url, index);
        let repo = SourceCodeRepository {
            meta: ObjectMeta::new(namespace, name),
            spec,
        };
        repos.push(repository::create(store, &repo).await?);
    }

    info!(
        "Cached {} repositories for credential {}",
        repos.len(),
        credential_ref
    );

    Ok(repos)
}

/// `{credential}-{owner}-{repo}`, lowercased with anything else collapsed to `-`
fn repository_name(credential: &ResourceRef, url: &str, index: usize) -> String {
    let slug = match parse_owner_repo(url) {
        Ok((owner, repo)) => format!("{}-{}", owner, repo),
        Err(_) => index.to_string(),
    };

    let mut name = format!("{}-", credential.name);
    let mut dash = true;
    for c in slug.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash {
            name.push('-');
            dash = true;
        }
    }
    name.trim_end_matches('-').to_string()
}
