//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::meta::{ObjectMeta, ResourceRef};
use super::state::ExecutionState;

/// Pipeline definition
///
/// The spec is what users author; the status is owned by the orchestrator
/// and advanced every time an execution is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub meta: ObjectMeta,
    pub spec: PipelineSpec,
    #[serde(default)]
    pub status: PipelineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    pub project_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub trigger_webhook_push: bool,
    /// Covers both GitHub pull requests and GitLab merge requests
    #[serde(default)]
    pub trigger_webhook_pr: bool,
    #[serde(default)]
    pub trigger_webhook_tag: bool,
    pub repository_url: String,
    pub source_code_credential_name: Option<ResourceRef>,
    #[serde(default)]
    pub config: PipelineConfig,
}

/// The stage/step tree of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A single unit of work. Steps of one stage run in parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    #[serde(rename = "sourceCodeConfig")]
    SourceCode(SourceCodeConfig),
    #[serde(rename = "runScriptConfig")]
    RunScript(RunScriptConfig),
    #[serde(rename = "publishImageConfig")]
    PublishImage(PublishImageConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCodeConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub branch_condition: BranchCondition,
    #[serde(default)]
    pub source_code_credential_name: Option<ResourceRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScriptConfig {
    pub image: String,
    #[serde(default)]
    pub shell_script: String,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishImageConfig {
    #[serde(default = "default_dockerfile_path")]
    pub dockerfile_path: String,
    #[serde(default = "default_build_context")]
    pub build_context: String,
    #[serde(default = "default_image_tag")]
    pub tag: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_dockerfile_path() -> String {
    "./Dockerfile".to_string()
}

fn default_build_context() -> String {
    ".".to_string()
}

fn default_image_tag() -> String {
    "${CICD_GIT_REPO_NAME}:${CICD_GIT_BRANCH}".to_string()
}

impl Default for PublishImageConfig {
    fn default() -> Self {
        Self {
            dockerfile_path: default_dockerfile_path(),
            build_context: default_build_context(),
            tag: default_image_tag(),
            env: BTreeMap::new(),
        }
    }
}

/// How a webhook branch is matched against the configured branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchCondition {
    #[default]
    Only,
    Except,
    All,
}

impl BranchCondition {
    pub fn matches(self, configured: &str, branch: &str) -> bool {
        match self {
            BranchCondition::All => true,
            BranchCondition::Except => branch != configured,
            BranchCondition::Only => branch == configured,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    #[serde(default)]
    pub pipeline_state: PipelineState,
    /// Run number the next generated execution receives
    #[serde(default = "default_next_run")]
    pub next_run: u64,
    #[serde(default)]
    pub last_execution_id: Option<ResourceRef>,
    #[serde(default)]
    pub last_run_state: Option<ExecutionState>,
    #[serde(default)]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub webhook_id: Option<String>,
    /// Shared secret for inbound webhook verification
    #[serde(default)]
    pub token: Option<String>,
}

fn default_next_run() -> u64 {
    1
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            pipeline_state: PipelineState::Active,
            next_run: default_next_run(),
            last_execution_id: None,
            last_run_state: None,
            last_started: None,
            webhook_id: None,
            token: None,
        }
    }
}

/// Pipeline validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    NoStages,

    #[error("first stage of the pipeline has no steps")]
    NoSteps,

    #[error("the first step of a pipeline must be a source code step")]
    FirstStepNotSourceCode,
}

impl PipelineConfig {
    /// The leading checkout step every pipeline must start with
    pub fn source_code_config(&self) -> Result<&SourceCodeConfig, PipelineError> {
        let stage = self.stages.first().ok_or(PipelineError::NoStages)?;
        match stage.steps.first().ok_or(PipelineError::NoSteps)? {
            Step::SourceCode(config) => Ok(config),
            _ => Err(PipelineError::FirstStepNotSourceCode),
        }
    }
}

impl Pipeline {
    pub fn is_active(&self) -> bool {
        self.status.pipeline_state == PipelineState::Active
    }

    pub fn source_code_config(&self) -> Result<&SourceCodeConfig, PipelineError> {
        self.spec.config.source_code_config()
    }
}
