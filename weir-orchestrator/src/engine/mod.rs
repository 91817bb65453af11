//! CI Engine
//!
//! The contract every CI backend driver implements. The syncer and the API
//! only ever talk to a [`CiEngine`]; [`jenkins::JenkinsEngine`] is the driver
//! for Jenkins-like backends.

pub mod jenkins;

use async_trait::async_trait;
use thiserror::Error;
use weir_core::domain::execution::PipelineExecution;
use weir_core::domain::pipeline::PipelineError;
use weir_jenkins::ClientError;

use crate::repository::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("backend request failed: {0}")]
    Backend(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(#[from] PipelineError),

    #[error("backend is not ready: {0}")]
    NotReady(String),

    /// The execution status and the backend disagree on the pipeline's shape
    #[error("inconsistent execution status: {0}")]
    Inconsistent(String),

    #[error("invalid step index {stage}-{step}")]
    InvalidStep { stage: usize, step: usize },

    #[error("{0} not found")]
    NotFound(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::Backend(e) => e.is_not_found(),
            EngineError::Store(e) => e.is_not_found(),
            EngineError::NotFound(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Operations a CI backend driver provides
#[async_trait]
pub trait CiEngine: Send + Sync {
    /// Fail fast when the backend cannot take work yet
    async fn pre_check(&self) -> Result<()>;

    /// Compile the execution into a backend job, provision its credentials and start it
    async fn run_pipeline_execution(&self, execution: &PipelineExecution) -> Result<()>;

    /// Run the execution again as a user-triggered run
    async fn rerun_execution(&self, execution: &PipelineExecution) -> Result<()>;

    /// Cancel or stop the execution's build; a job that no longer exists is not an error
    async fn stop_execution(&self, execution: &PipelineExecution) -> Result<()>;

    /// Log text of one step
    async fn get_step_log(
        &self,
        execution: &PipelineExecution,
        stage: usize,
        step: usize,
    ) -> Result<String>;

    /// Reconcile the status tree with the backend, returning whether it changed
    ///
    /// Calling it again with unchanged backend status returns `false` and
    /// leaves the execution untouched.
    async fn sync_execution(&self, execution: &mut PipelineExecution) -> Result<bool>;
}
