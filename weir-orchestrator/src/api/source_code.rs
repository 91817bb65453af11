//! Source Code API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use weir_core::domain::source_code::SourceCodeType;
use weir_core::dto::source_code::{LoginRequest, LoginResponse};

use super::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::source_code_service;

/// POST /v3/sourcecode/{provider}/login
/// Complete an OAuth login; the repository refresh continues in the background
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let source_code_type: SourceCodeType = provider.parse().map_err(ApiError::BadRequest)?;
    let remote = state.remotes.get(source_code_type)?;

    let (credential, refresh) =
        source_code_service::login(state.store.clone(), remote, req).await?;

    let reference = credential.meta.reference();
    tokio::spawn(async move {
        match refresh.wait().await {
            Ok(count) => tracing::info!("Cached {} repositories for {}", count, reference),
            Err(e) => tracing::error!("Repository refresh for {} failed: {}", reference, e),
        }
    });

    Ok(Json(LoginResponse {
        credential: credential.meta.reference().to_string(),
        source_code_type,
        login_name: credential.spec.login_name,
        display_name: credential.spec.display_name,
        avatar_url: credential.spec.avatar_url,
    }))
}
