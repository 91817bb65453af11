//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod envvars;
pub mod error;
pub mod execution;
pub mod health;
pub mod hooks;
pub mod pipeline;
pub mod source_code;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::engine::CiEngine;
use crate::repository::Store;
use crate::service::source_code::Remotes;
use crate::webhook::WebhookRouter;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub engine: Arc<dyn CiEngine>,
    pub remotes: Remotes,
    pub webhooks: WebhookRouter,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Inbound provider webhooks
        .route("/hooks", post(hooks::receive_hook))
        // Pipeline endpoints
        .route(
            "/v3/pipelines/{namespace}/{name}/webhook",
            post(pipeline::enable_webhook).delete(pipeline::disable_webhook),
        )
        .route(
            "/v3/pipelines/{namespace}/{name}/run",
            post(pipeline::run_pipeline),
        )
        // Execution endpoints
        .route(
            "/v3/executions/{namespace}/{name}/rerun",
            post(execution::rerun_execution),
        )
        .route(
            "/v3/executions/{namespace}/{name}/stop",
            post(execution::stop_execution),
        )
        .route(
            "/v3/executions/{namespace}/{name}/log",
            get(execution::get_step_log),
        )
        // Source code endpoints
        .route("/v3/sourcecode/{provider}/login", post(source_code::login))
        .route("/v3/envvars", get(envvars::list_env_vars))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
