//! Pipeline Service
//!
//! Webhook registration, pipeline-file loading and user-triggered runs for
//! pipelines backed by a remote repository.

use tracing::info;
use uuid::Uuid;
use weir_core::domain::execution::{PipelineExecution, Trigger, TriggerType};
use weir_core::domain::meta::ResourceRef;
use weir_core::domain::pipeline::{Pipeline, PipelineConfig, SourceCodeConfig, Stage, Step};
use weir_core::domain::source_code::SourceCodeCredential;
use weir_core::dto::pipeline::RunPipelineRequest;
use weir_remote::Remote;

use super::execution_service;
use super::source_code::{Remotes, Result, SourceCodeError};
use crate::repository::{self, Store};

/// Name of the checkout stage added to pipeline files that do not declare one
pub const CLONE_STAGE_NAME: &str = "Clone";

/// Credential the pipeline clones and registers hooks with
fn credential_ref(pipeline: &Pipeline) -> Result<ResourceRef> {
    pipeline
        .spec
        .source_code_credential_name
        .clone()
        .or_else(|| {
            pipeline
                .source_code_config()
                .ok()
                .and_then(|c| c.source_code_credential_name.clone())
        })
        .ok_or_else(|| SourceCodeError::MissingCredential(pipeline.meta.reference().to_string()))
}

async fn load_credential(store: &dyn Store, pipeline: &Pipeline) -> Result<SourceCodeCredential> {
    let reference = credential_ref(pipeline)?;
    Ok(repository::get(store, &reference.namespace, &reference.name).await?)
}

fn hook_remote(remotes: &Remotes, credential: &SourceCodeCredential) -> Result<std::sync::Arc<dyn Remote>> {
    let remote = remotes.get(credential.spec.source_code_type)?;
    if !remote.capabilities().hook {
        return Err(SourceCodeError::Unsupported(
            credential.spec.source_code_type,
            "webhooks",
        ));
    }
    Ok(remote)
}

/// Register a webhook for the pipeline under a freshly generated token
pub async fn enable_webhook(
    store: &dyn Store,
    remotes: &Remotes,
    namespace: &str,
    name: &str,
) -> Result<Pipeline> {
    let mut pipeline: Pipeline = repository::get(store, namespace, name).await?;
    let credential = load_credential(store, &pipeline).await?;
    let remote = hook_remote(remotes, &credential)?;

    pipeline.status.token = Some(Uuid::new_v4().simple().to_string());
    let hook_id = remote
        .create_hook(&pipeline, &credential.spec.access_token)
        .await?;
    pipeline.status.webhook_id = Some(hook_id);

    let pipeline = repository::update(store, &pipeline).await?;
    info!("Webhook enabled for pipeline {}", pipeline.meta.reference());

    Ok(pipeline)
}

/// Remove the pipeline's webhook and forget its token
pub async fn disable_webhook(
    store: &dyn Store,
    remotes: &Remotes,
    namespace: &str,
    name: &str,
) -> Result<Pipeline> {
    let mut pipeline: Pipeline = repository::get(store, namespace, name).await?;
    if pipeline.status.webhook_id.is_none() {
        return Ok(pipeline);
    }

    let credential = load_credential(store, &pipeline).await?;
    let remote = hook_remote(remotes, &credential)?;
    remote
        .delete_hook(&pipeline, &credential.spec.access_token)
        .await?;

    pipeline.status.webhook_id = None;
    pipeline.status.token = None;

    let pipeline = repository::update(store, &pipeline).await?;
    info!("Webhook disabled for pipeline {}", pipeline.meta.reference());

    Ok(pipeline)
}

/// Parse a pipeline file, putting a checkout of `repo_url` first if it has none
pub fn parse_pipeline_file(
    content: &[u8],
    repo_url: &str,
    branch: &str,
    credential: Option<ResourceRef>,
) -> Result<PipelineConfig> {
    // Steps are written as single-key maps (`- runScriptConfig: {...}`)
    let mut config: PipelineConfig = serde_yaml::with::singleton_map_recursive::deserialize(
        serde_yaml::Deserializer::from_slice(content),
    )?;

    let has_checkout = matches!(
        config.stages.first().and_then(|s| s.steps.first()),
        Some(Step::SourceCode(_))
    );
    if !has_checkout {
        config.stages.insert(
            0,
            Stage {
                name: CLONE_STAGE_NAME.to_string(),
                steps: vec![Step::SourceCode(SourceCodeConfig {
                    url: repo_url.to_string(),
                    branch: branch.to_string(),
                    source_code_credential_name: credential,
                    ..Default::default()
                })],
            },
        );
    }

    config.source_code_config()?;
    Ok(config)
}

/// The pipeline config stored in a repository, `None` when it has no pipeline file
///
/// `branch` defaults to the repository's default branch.
pub async fn load_pipeline_config(
    remote: &dyn Remote,
    credential: &SourceCodeCredential,
    repo_url: &str,
    branch: Option<&str>,
) -> Result<Option<PipelineConfig>> {
    let token = &credential.spec.access_token;
    let branch = match branch {
        Some(b) => b.to_string(),
        None => remote.get_default_branch(repo_url, token).await?,
    };

    let Some(content) = remote
        .get_pipeline_file_in_repo(repo_url, Some(&branch), token)
        .await?
    else {
        return Ok(None);
    };

    parse_pipeline_file(&content, repo_url, &branch, Some(credential.meta.reference())).map(Some)
}

/// Generate a user-triggered execution of the pipeline
///
/// A pipeline without stored stages is built from the pipeline file in its
/// repository, read at the requested branch.
pub async fn run_pipeline(
    store: &dyn Store,
    remotes: &Remotes,
    namespace: &str,
    name: &str,
    req: RunPipelineRequest,
) -> Result<PipelineExecution> {
    let pipeline: Pipeline = repository::get(store, namespace, name).await?;

    let config = if pipeline.spec.config.stages.is_empty() {
        let credential = load_credential(store, &pipeline).await?;
        let remote = remotes.get(credential.spec.source_code_type)?;
        load_pipeline_config(
            remote.as_ref(),
            &credential,
            &pipeline.spec.repository_url,
            req.branch.as_deref(),
        )
        .await?
        .ok_or_else(|| {
            SourceCodeError::MissingPipelineFile(pipeline.meta.reference().to_string())
        })?
    } else {
        pipeline.spec.config.clone()
    };

    let trigger = Trigger {
        kind: TriggerType::User,
        user: req.user_name,
        branch: req.branch,
        ..Default::default()
    };
    let execution =
        execution_service::generate_execution_with_config(store, &pipeline, config, trigger)
            .await?;

    info!(
        "Pipeline {} run as {}",
        pipeline.meta.reference(),
        execution.meta.name
    );
    Ok(execution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryStore;
    use crate::testing::{FakeRemote, credential, pipeline};
    use std::sync::Arc;
    use weir_core::domain::pipeline::BranchCondition;
    use weir_core::domain::source_code::SourceCodeType;

    async fn seeded(remote: Arc<FakeRemote>) -> (MemoryStore, Remotes) {
        let store = MemoryStore::new();
        let mut pipeline = pipeline();
        pipeline.spec.source_code_credential_name = Some(ResourceRef::new("u-1", "github-octocat"));
        repository::create(&store, &pipeline).await.unwrap();
        repository::create(&store, &credential()).await.unwrap();

        let mut remotes = Remotes::default();
        remotes.insert(remote);
        (store, remotes)
    }

    #[tokio::test]
    async fn test_enable_then_disable_webhook() {
        let remote = Arc::new(FakeRemote::new(SourceCodeType::Github));
        let (store, remotes) = seeded(remote.clone()).await;

        let enabled = enable_webhook(&store, &remotes, "p-1", "app").await.unwrap();
        let token = enabled.status.token.clone().unwrap();
        assert_eq!(token.len(), 32);
        assert_eq!(enabled.status.webhook_id.as_deref(), Some("hook-1"));
        assert_eq!(remote.hooks(), vec!["p-1:app".to_string()]);

        let again = enable_webhook(&store, &remotes, "p-1", "app").await.unwrap();
        assert_ne!(again.status.token, Some(token));

        let disabled = disable_webhook(&store, &remotes, "p-1", "app").await.unwrap();
        assert!(disabled.status.webhook_id.is_none());
        assert!(disabled.status.token.is_none());
        assert!(remote.hooks().is_empty());
    }

    #[tokio::test]
    async fn test_enable_webhook_requires_credential() {
        let store = MemoryStore::new();
        repository::create(&store, &pipeline()).await.unwrap();

        let err = enable_webhook(&store, &Remotes::default(), "p-1", "app")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceCodeError::MissingCredential(_)));
    }

    async fn repository_backed(remote: Arc<FakeRemote>) -> (MemoryStore, Remotes) {
        let (store, remotes) = seeded(remote).await;
        let mut stored: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        stored.spec.config.stages.clear();
        repository::update(&store, &stored).await.unwrap();
        (store, remotes)
    }

    #[tokio::test]
    async fn test_run_pipeline_with_stored_stages() {
        let remote = Arc::new(FakeRemote::new(SourceCodeType::Github));
        let (store, remotes) = seeded(remote).await;
        let req = RunPipelineRequest {
            branch: Some("develop".to_string()),
            user_name: Some("admin".to_string()),
        };

        let execution = run_pipeline(&store, &remotes, "p-1", "app", req).await.unwrap();
        assert_eq!(execution.spec.triggered_by, TriggerType::User);
        assert_eq!(execution.spec.trigger_user_name.as_deref(), Some("admin"));
        assert_eq!(execution.branch(), Some("develop"));
        assert_eq!(execution.status.stages.len(), 2);
    }

    #[tokio::test]
    async fn test_run_pipeline_loads_pipeline_file() {
        let remote = Arc::new(FakeRemote::new(SourceCodeType::Github));
        remote.set_pipeline_file(
            br#"
stages:
  - name: Build
    steps:
      - runScriptConfig:
          image: golang:1.22
          shellScript: go build ./...
"#
            .to_vec(),
        );
        let (store, remotes) = repository_backed(remote).await;

        let execution = run_pipeline(&store, &remotes, "p-1", "app", RunPipelineRequest::default())
            .await
            .unwrap();
        let stages = &execution.spec.pipeline_config.stages;
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, CLONE_STAGE_NAME);
        assert_eq!(stages[1].name, "Build");

        let stored: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert!(stored.spec.config.stages.is_empty());
        assert_eq!(stored.status.next_run, 2);
    }

    #[tokio::test]
    async fn test_run_pipeline_without_pipeline_file() {
        let remote = Arc::new(FakeRemote::new(SourceCodeType::Github));
        let (store, remotes) = repository_backed(remote).await;

        let err = run_pipeline(&store, &remotes, "p-1", "app", RunPipelineRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceCodeError::MissingPipelineFile(_)));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_pipeline_file_adds_checkout() {
        let yaml = br#"
stages:
  - name: Build
    steps:
      - runScriptConfig:
          image: golang:1.22
          shellScript: go build ./...
timeoutMinutes: 30
"#;
        let config = parse_pipeline_file(
            yaml,
            "https://github.com/acme/app.git",
            "main",
            Some(ResourceRef::new("u-1", "github-octocat")),
        )
        .unwrap();

        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].name, CLONE_STAGE_NAME);
        let checkout = config.source_code_config().unwrap();
        assert_eq!(checkout.branch, "main");
        assert_eq!(checkout.branch_condition, BranchCondition::Only);
        assert_eq!(config.timeout_minutes, Some(30));
    }

    #[test]
    fn test_parse_pipeline_file_keeps_declared_checkout() {
        let yaml = br#"
stages:
  - name: Clone
    steps:
      - sourceCodeConfig:
          url: https://github.com/acme/app.git
          branch: release
  - name: Publish
    steps:
      - publishImageConfig:
          dockerfilePath: ./Dockerfile
          buildContext: .
          tag: acme/app:${CICD_GIT_COMMIT}
"#;
        let config = parse_pipeline_file(yaml, "https://github.com/acme/app.git", "main", None)
            .unwrap();

        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.source_code_config().unwrap().branch, "release");
        assert!(matches!(
            &config.stages[1].steps[0],
            Step::PublishImage(publish) if publish.tag == "acme/app:${CICD_GIT_COMMIT}"
        ));
    }

    #[test]
    fn test_parse_pipeline_file_rejects_garbage() {
        let err = parse_pipeline_file(b"stages: 12", "u", "main", None).unwrap_err();
        assert!(matches!(err, SourceCodeError::InvalidPipelineFile(_)));
    }

    #[tokio::test]
    async fn test_load_pipeline_config() {
        let remote = FakeRemote::new(SourceCodeType::Github);
        let credential = credential();

        let missing = load_pipeline_config(&remote, &credential, "https://github.com/acme/app.git", None)
            .await
            .unwrap();
        assert!(missing.is_none());

        remote.set_pipeline_file(b"stages: []\n".to_vec());
        let config = load_pipeline_config(&remote, &credential, "https://github.com/acme/app.git", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.stages.len(), 1);
        assert_eq!(config.source_code_config().unwrap().branch, "main");
    }
}
