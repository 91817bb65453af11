//! Execution API Handlers
//!
//! Rerun, stop and step logs of pipeline executions.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use weir_core::domain::execution::PipelineExecution;
use weir_core::dto::execution::{StepLogQuery, StepLogResponse};

use super::AppState;
use crate::api::error::ApiResult;
use crate::repository;
use crate::service::execution_service;

// =============================================================================
// Lifecycle
// =============================================================================

/// POST /v3/executions/{namespace}/{name}/rerun
/// Start a finished execution again as the pipeline's next run
pub async fn rerun_execution(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<PipelineExecution>> {
    tracing::info!("Rerunning execution: {}:{}", namespace, name);

    let execution = execution_service::rerun(state.store.as_ref(), &namespace, &name).await?;
    Ok(Json(execution))
}

/// POST /v3/executions/{namespace}/{name}/stop
pub async fn stop_execution(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<PipelineExecution>> {
    tracing::info!("Stopping execution: {}:{}", namespace, name);

    let execution = execution_service::stop(state.store.as_ref(), &namespace, &name).await?;
    Ok(Json(execution))
}

// =============================================================================
// Logs
// =============================================================================

/// GET /v3/executions/{namespace}/{name}/log?stage={i}&step={j}
pub async fn get_step_log(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<StepLogQuery>,
) -> ApiResult<Json<StepLogResponse>> {
    tracing::debug!(
        "Getting log of step {}-{} of {}:{}",
        query.stage,
        query.step,
        namespace,
        name
    );

    let execution: PipelineExecution =
        repository::get(state.store.as_ref(), &namespace, &name).await?;
    let log = state
        .engine
        .get_step_log(&execution, query.stage, query.step)
        .await?;

    Ok(Json(StepLogResponse {
        stage: query.stage,
        step: query.step,
        log,
    }))
}
