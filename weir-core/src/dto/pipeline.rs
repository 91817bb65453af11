//! Pipeline DTOs

use serde::{Deserialize, Serialize};

/// Body of `POST /v3/pipelines/{namespace}/{name}/run`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPipelineRequest {
    /// Branch to build, the checkout branch (or the repository default) when absent
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}
