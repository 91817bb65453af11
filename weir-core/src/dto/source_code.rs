//! Source-code provider DTOs

use serde::{Deserialize, Serialize};

use crate::domain::source_code::SourceCodeType;

/// OAuth callback payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub code: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    pub cluster_name: String,
    pub user_name: String,
}

/// Credential summary returned after login; the access token never leaves the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub credential: String,
    pub source_code_type: SourceCodeType,
    pub login_name: String,
    pub display_name: String,
    pub avatar_url: String,
}
