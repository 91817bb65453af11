//! Execution DTOs

use serde::{Deserialize, Serialize};

/// Query for `GET /v3/executions/{namespace}/{name}/log`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepLogQuery {
    pub stage: usize,
    pub step: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogResponse {
    pub stage: usize,
    pub step: usize,
    pub log: String,
}
