//! Environment Variable API Handler

use axum::Json;
use weir_core::env::env_var_whitelist;

/// GET /v3/envvars
/// Names of the `CICD_*` variables every step can reference
pub async fn list_env_vars() -> Json<Vec<&'static str>> {
    Json(env_var_whitelist())
}
