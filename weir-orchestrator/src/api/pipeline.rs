//! Pipeline API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use weir_core::domain::execution::PipelineExecution;
use weir_core::domain::pipeline::Pipeline;
use weir_core::dto::pipeline::RunPipelineRequest;

use super::AppState;
use crate::api::error::ApiResult;
use crate::service::pipeline_service;

/// POST /v3/pipelines/{namespace}/{name}/webhook
/// Register a hook with the pipeline's provider, replacing its token
pub async fn enable_webhook(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Enabling webhook of pipeline: {}:{}", namespace, name);

    let pipeline =
        pipeline_service::enable_webhook(state.store.as_ref(), &state.remotes, &namespace, &name)
            .await?;
    Ok(Json(pipeline))
}

/// DELETE /v3/pipelines/{namespace}/{name}/webhook
pub async fn disable_webhook(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Disabling webhook of pipeline: {}:{}", namespace, name);

    let pipeline =
        pipeline_service::disable_webhook(state.store.as_ref(), &state.remotes, &namespace, &name)
            .await?;
    Ok(Json(pipeline))
}

/// POST /v3/pipelines/{namespace}/{name}/run
/// Start the pipeline's next run on behalf of a user
pub async fn run_pipeline(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<RunPipelineRequest>,
) -> ApiResult<Json<PipelineExecution>> {
    tracing::info!("Running pipeline: {}:{}", namespace, name);

    let execution =
        pipeline_service::run_pipeline(state.store.as_ref(), &state.remotes, &namespace, &name, req)
            .await?;
    Ok(Json(execution))
}
