//! Webhook API Handler
//!
//! Deliveries from every provider arrive at the same endpoint and are
//! routed on their event header.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use super::AppState;
use crate::webhook::WebhookRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookQuery {
    #[serde(default)]
    pub pipeline_id: Option<String>,
}

/// POST /hooks?pipelineId={namespace}:{name}
pub async fn receive_hook(
    State(state): State<AppState>,
    Query(query): Query<HookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = WebhookRequest {
        headers,
        pipeline_id: query.pipeline_id,
        body,
    };

    state.webhooks.dispatch(state.store.as_ref(), &request).await
}
