//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::engine::EngineError;
use crate::repository::StoreError;
use crate::service::execution::ExecutionError;
use crate::service::source_code::SourceCodeError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            ApiError::NotFound(err.to_string())
        } else {
            ApiError::InternalError(err.to_string())
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            e @ (ExecutionError::Transition(_) | ExecutionError::Contended(_)) => {
                ApiError::Conflict(e.to_string())
            }
            e @ ExecutionError::InvalidPipeline(_) => ApiError::BadRequest(e.to_string()),
            e => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            e @ EngineError::InvalidStep { .. } => ApiError::BadRequest(e.to_string()),
            e @ EngineError::NotReady(_) => ApiError::Unavailable(e.to_string()),
            e @ EngineError::Backend(_) => ApiError::BadGateway(e.to_string()),
            e => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<SourceCodeError> for ApiError {
    fn from(err: SourceCodeError) -> Self {
        match err {
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            e @ (SourceCodeError::NotConfigured(_) | SourceCodeError::Unsupported(..)) => {
                ApiError::BadRequest(e.to_string())
            }
            e @ (SourceCodeError::InvalidPipeline(_)
            | SourceCodeError::InvalidPipelineFile(_)
            | SourceCodeError::MissingCredential(_)) => ApiError::BadRequest(e.to_string()),
            e @ SourceCodeError::Remote(_) => ApiError::BadGateway(e.to_string()),
            SourceCodeError::Execution(e) => ApiError::from(e),
            e => ApiError::InternalError(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
