//! Webhook ingestion
//!
//! Providers deliver events to a single endpoint; the router hands each
//! delivery to the driver whose event header it carries. Drivers verify the
//! delivery against the target pipeline and turn it into an execution.

pub mod github;
pub mod gitlab;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use weir_core::domain::execution::{
    CommitDetails, PipelineExecution, Trigger, TriggerType, WebhookEvent,
};
use weir_core::domain::meta::ResourceRef;
use weir_core::domain::pipeline::Pipeline;
use weir_core::env::CICD_GIT_TAG;

use crate::repository::{self, Store, StoreError};
use crate::service::execution_service::{self, ExecutionError};

/// One inbound delivery
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: HeaderMap,
    /// The `pipelineId` query parameter, `namespace:name`
    pub pipeline_id: Option<String>,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("unsupported event type {0:?}")]
    UnsupportedEvent(String),

    #[error("invalid pipeline id {0:?}")]
    InvalidPipelineId(String),

    #[error("pipeline {0} not found")]
    PipelineNotFound(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("pipeline {0} is not active")]
    PipelineInactive(String),

    #[error("{0} trigger is disabled")]
    TriggerDisabled(&'static str),

    #[error("invalid source code config: {0}")]
    InvalidSourceCode(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to generate execution: {0}")]
    Generate(#[from] ExecutionError),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::MissingHeader(_)
            | WebhookError::UnsupportedEvent(_)
            | WebhookError::InvalidPipelineId(_)
            | WebhookError::InvalidSignature
            | WebhookError::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WebhookError::PipelineNotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::PipelineInactive(_) | WebhookError::TriggerDisabled(_) => {
                StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS
            }
            WebhookError::InvalidSourceCode(_)
            | WebhookError::Store(_)
            | WebhookError::Generate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine readable reason
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingHeader(_) => "MissingRequired",
            WebhookError::UnsupportedEvent(_) => "InvalidOption",
            WebhookError::InvalidPipelineId(_) => "InvalidFormat",
            WebhookError::PipelineNotFound(_) => "NotFound",
            WebhookError::InvalidSignature | WebhookError::InvalidPayload(_) => {
                "InvalidBodyContent"
            }
            WebhookError::PipelineInactive(_) | WebhookError::TriggerDisabled(_) => "Unavailable",
            WebhookError::InvalidSourceCode(_)
            | WebhookError::Store(_)
            | WebhookError::Generate(_) => "ServerError",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "type": "error",
            "status": status.as_u16(),
            "code": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;

/// A provider's handling of its deliveries
#[async_trait]
pub trait WebhookDriver: Send + Sync {
    /// Header naming the event; its presence selects the driver
    fn event_header(&self) -> &'static str;

    /// Handle a delivery, returning the execution it generated, if any
    async fn execute(
        &self,
        store: &dyn Store,
        request: &WebhookRequest,
    ) -> Result<Option<PipelineExecution>>;
}

/// Dispatches deliveries to the registered drivers
#[derive(Clone)]
pub struct WebhookRouter {
    drivers: Vec<Arc<dyn WebhookDriver>>,
}

impl Default for WebhookRouter {
    fn default() -> Self {
        Self {
            drivers: vec![
                Arc::new(github::GithubDriver),
                Arc::new(gitlab::GitlabDriver),
            ],
        }
    }
}

impl WebhookRouter {
    /// Run every driver whose header the delivery carries
    ///
    /// The first failing driver decides the response; a delivery no driver
    /// rejects is acknowledged with `200 OK`.
    pub async fn dispatch(&self, store: &dyn Store, request: &WebhookRequest) -> Response {
        let mut handled = false;
        for driver in &self.drivers {
            if !request.headers.contains_key(driver.event_header()) {
                continue;
            }
            handled = true;

            match driver.execute(store, request).await {
                Ok(Some(execution)) => {
                    info!("Webhook generated execution {}", execution.meta.reference())
                }
                Ok(None) => debug!("Webhook delivery ignored"),
                Err(e) => {
                    warn!("Webhook delivery rejected: {}", e);
                    return e.into_response();
                }
            }
        }

        if !handled {
            debug!("Webhook delivery without a known event header");
        }
        StatusCode::OK.into_response()
    }
}

// =============================================================================
// Shared driver steps
// =============================================================================

/// What a delivery asks to build
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    pub event: WebhookEvent,
    pub branch: String,
    pub commit: String,
    pub git_ref: String,
    /// Set for tag pushes
    pub tag: Option<String>,
    pub user: Option<String>,
    pub details: CommitDetails,
}

/// Resolve the pipeline a delivery targets
pub async fn resolve_pipeline(store: &dyn Store, request: &WebhookRequest) -> Result<Pipeline> {
    let raw = request.pipeline_id.as_deref().unwrap_or_default();
    let reference: ResourceRef = raw
        .parse()
        .map_err(|_| WebhookError::InvalidPipelineId(raw.to_string()))?;

    repository::find(store, &reference.namespace, &reference.name)
        .await?
        .ok_or_else(|| WebhookError::PipelineNotFound(reference.to_string()))
}

/// Reject deliveries the pipeline does not accept
pub fn check_policy(pipeline: &Pipeline, event: WebhookEvent) -> Result<()> {
    if !pipeline.is_active() {
        return Err(WebhookError::PipelineInactive(
            pipeline.meta.reference().to_string(),
        ));
    }

    let spec = &pipeline.spec;
    let enabled = match event {
        WebhookEvent::Push => spec.trigger_webhook_push,
        WebhookEvent::PullRequest => spec.trigger_webhook_pr,
        WebhookEvent::Tag => spec.trigger_webhook_tag,
    };
    if !enabled {
        return Err(WebhookError::TriggerDisabled(event.as_str()));
    }

    Ok(())
}

/// Generate an execution for `event` if the pipeline's branch policy matches
pub async fn trigger(
    store: &dyn Store,
    pipeline: &Pipeline,
    event: HookEvent,
) -> Result<Option<PipelineExecution>> {
    let checkout = pipeline
        .source_code_config()
        .map_err(|e| WebhookError::InvalidSourceCode(e.to_string()))?;

    if event.tag.is_none() && !checkout.branch_condition.matches(&checkout.branch, &event.branch) {
        debug!(
            "Branch {} does not match {:?} {} of {}",
            event.branch,
            checkout.branch_condition,
            checkout.branch,
            pipeline.meta.reference()
        );
        return Ok(None);
    }

    let mut env_vars = BTreeMap::new();
    if let Some(tag) = &event.tag {
        env_vars.insert(CICD_GIT_TAG.to_string(), tag.clone());
    }

    let trigger = Trigger {
        kind: TriggerType::Webhook,
        user: event.user,
        branch: Some(event.branch),
        commit: Some(event.commit).filter(|c| !c.is_empty()),
        git_ref: Some(event.git_ref),
        event: Some(event.event),
        env_vars,
        details: event.details,
    };

    let execution = execution_service::generate_execution(store, pipeline, trigger).await?;
    Ok(Some(execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryStore;
    use crate::testing::pipeline;
    use weir_core::domain::pipeline::{BranchCondition, PipelineState, Step};

    fn push(branch: &str) -> HookEvent {
        HookEvent {
            event: WebhookEvent::Push,
            branch: branch.to_string(),
            commit: "abc123".to_string(),
            git_ref: format!("refs/heads/{}", branch),
            tag: None,
            user: Some("octocat".to_string()),
            details: CommitDetails::default(),
        }
    }

    fn set_condition(pipeline: &mut Pipeline, condition: BranchCondition) {
        if let Step::SourceCode(checkout) = &mut pipeline.spec.config.stages[0].steps[0] {
            checkout.branch_condition = condition;
        }
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            WebhookError::MissingHeader("X-Hub-Signature").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            WebhookError::PipelineInactive("p-1:app".to_string()).status().as_u16(),
            451
        );
        assert_eq!(WebhookError::TriggerDisabled("push").code(), "Unavailable");
        assert_eq!(
            WebhookError::InvalidSourceCode(String::new()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_policy() {
        let mut pipeline = pipeline();
        assert!(check_policy(&pipeline, WebhookEvent::Push).is_ok());

        pipeline.spec.trigger_webhook_tag = false;
        assert!(matches!(
            check_policy(&pipeline, WebhookEvent::Tag),
            Err(WebhookError::TriggerDisabled("tag"))
        ));

        pipeline.status.pipeline_state = PipelineState::Inactive;
        assert!(matches!(
            check_policy(&pipeline, WebhookEvent::Push),
            Err(WebhookError::PipelineInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_pipeline() {
        let store = MemoryStore::new();
        repository::create(&store, &pipeline()).await.unwrap();

        let mut request = WebhookRequest {
            headers: HeaderMap::new(),
            pipeline_id: None,
            body: Bytes::new(),
        };
        assert!(matches!(
            resolve_pipeline(&store, &request).await,
            Err(WebhookError::InvalidPipelineId(_))
        ));

        request.pipeline_id = Some("p-1:missing".to_string());
        let err = resolve_pipeline(&store, &request).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        request.pipeline_id = Some("p-1:app".to_string());
        assert_eq!(
            resolve_pipeline(&store, &request).await.unwrap().meta.name,
            "app"
        );
    }

    #[tokio::test]
    async fn test_trigger_respects_branch_condition() {
        let store = MemoryStore::new();
        let mut pipeline = repository::create(&store, &pipeline()).await.unwrap();

        assert!(trigger(&store, &pipeline, push("dev")).await.unwrap().is_none());
        let execution = trigger(&store, &pipeline, push("main")).await.unwrap().unwrap();
        assert_eq!(execution.spec.triggered_by, TriggerType::Webhook);
        assert_eq!(execution.spec.branch.as_deref(), Some("main"));
        assert_eq!(execution.spec.commit.as_deref(), Some("abc123"));
        assert_eq!(execution.spec.trigger_user_name.as_deref(), Some("octocat"));

        set_condition(&mut pipeline, BranchCondition::Except);
        assert!(trigger(&store, &pipeline, push("main")).await.unwrap().is_none());
        assert!(trigger(&store, &pipeline, push("dev")).await.unwrap().is_some());

        set_condition(&mut pipeline, BranchCondition::All);
        assert!(trigger(&store, &pipeline, push("anything")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tag_bypasses_branch_match() {
        let store = MemoryStore::new();
        let pipeline = repository::create(&store, &pipeline()).await.unwrap();

        let event = HookEvent {
            event: WebhookEvent::Tag,
            branch: "v1.0.0".to_string(),
            git_ref: "refs/tags/v1.0.0".to_string(),
            tag: Some("v1.0.0".to_string()),
            ..push("v1.0.0")
        };
        let execution = trigger(&store, &pipeline, event).await.unwrap().unwrap();
        assert_eq!(execution.spec.env_vars[CICD_GIT_TAG], "v1.0.0");
        assert_eq!(execution.spec.event, Some(WebhookEvent::Tag));
    }

    #[tokio::test]
    async fn test_trigger_requires_checkout() {
        let store = MemoryStore::new();
        let mut pipeline = repository::create(&store, &pipeline()).await.unwrap();
        pipeline.spec.config.stages.remove(0);

        let err = trigger(&store, &pipeline, push("main")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
