//! Pipeline execution domain types
//!
//! An execution is a snapshot of a pipeline spec taken at trigger time plus
//! a mutable status tree mirroring the snapshot's stage/step shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::meta::{ObjectMeta, ResourceRef};
use super::pipeline::{Pipeline, PipelineConfig};
use super::state::ExecutionState;

/// Label carrying `"true"`/`"false"`, kept consistent with the execution state
pub const FINISH_LABEL: &str = "pipeline.weir.dev/finish";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    User,
    Webhook,
    Cron,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::User => "user",
            TriggerType::Webhook => "webhook",
            TriggerType::Cron => "cron",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    Push,
    PullRequest,
    Tag,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEvent::Push => "push",
            WebhookEvent::PullRequest => "pull_request",
            WebhookEvent::Tag => "tag",
        }
    }
}

/// Commit metadata reported by a webhook payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDetails {
    pub html_link: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub author: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

/// Everything known about what caused an execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    pub kind: TriggerType,
    pub user: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub git_ref: Option<String>,
    pub event: Option<WebhookEvent>,
    pub env_vars: BTreeMap<String, String>,
    pub details: CommitDetails,
}

impl Trigger {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: TriggerType::User,
            user: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub meta: ObjectMeta,
    pub spec: ExecutionSpec,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    pub pipeline_name: ResourceRef,
    /// Display name of the pipeline when the run was generated
    #[serde(default)]
    pub pipeline_display_name: String,
    pub project_name: String,
    pub run: u64,
    pub triggered_by: TriggerType,
    #[serde(default)]
    pub trigger_user_name: Option<String>,
    pub repository_url: String,
    pub pipeline_config: PipelineConfig,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub event: Option<WebhookEvent>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub details: CommitDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub execution_state: ExecutionState,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub stages: Vec<StageStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub state: ExecutionState,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<StepStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub state: ExecutionState,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Initialized,
    Provisioned,
    Built,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub message: String,
    pub last_update_time: DateTime<Utc>,
}

/// Invalid lifecycle transitions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("execution {0} is not finished yet")]
    NotFinished(String),

    #[error("execution {0} is already finished")]
    AlreadyFinished(String),
}

/// True if the stage is `Success`, false if `Fail`/`Denied`, otherwise true
/// only when every step is `Success` or `Skipped`
pub fn is_stage_success(stage: &StageStatus) -> bool {
    match stage.state {
        ExecutionState::Success => true,
        ExecutionState::Fail | ExecutionState::Denied => false,
        _ => stage.steps.iter().all(|step| {
            matches!(
                step.state,
                ExecutionState::Success | ExecutionState::Skipped
            )
        }),
    }
}

impl ExecutionStatus {
    /// A status tree with every stage and step `Waiting`
    pub fn waiting(config: &PipelineConfig) -> Self {
        let stages = config
            .stages
            .iter()
            .map(|stage| StageStatus {
                state: ExecutionState::Waiting,
                started: None,
                ended: None,
                steps: vec![StepStatus::default(); stage.steps.len()],
            })
            .collect();

        Self {
            stages,
            ..Default::default()
        }
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        matches!(
            self.condition(condition_type),
            Some(Condition {
                status: ConditionStatus::True,
                ..
            })
        )
    }

    pub fn condition_message(&self, condition_type: ConditionType) -> &str {
        self.condition(condition_type)
            .map(|c| c.message.as_str())
            .unwrap_or_default()
    }

    /// Sets a condition, returning whether anything changed
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        message: Option<&str>,
    ) -> bool {
        let now = Utc::now();
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                let message_changed = message.is_some_and(|m| m != existing.message);
                if existing.status == status && !message_changed {
                    return false;
                }
                existing.status = status;
                if let Some(m) = message {
                    existing.message = m.to_string();
                }
                existing.last_update_time = now;
                true
            }
            None => {
                self.conditions.push(Condition {
                    condition_type,
                    status,
                    message: message.unwrap_or_default().to_string(),
                    last_update_time: now,
                });
                true
            }
        }
    }
}

impl PipelineExecution {
    /// Snapshot `pipeline` into a new execution numbered with its `next_run`
    pub fn new(pipeline: &Pipeline, trigger: Trigger, now: DateTime<Utc>) -> Self {
        let run = pipeline.status.next_run;
        let mut meta = ObjectMeta::new(
            pipeline.meta.namespace.clone(),
            format!("{}-{}", pipeline.meta.name, run),
        );
        meta.created_at = Some(now);
        meta.labels
            .insert(FINISH_LABEL.to_string(), "false".to_string());

        let mut status = ExecutionStatus::waiting(&pipeline.spec.config);
        status.started = Some(now);

        Self {
            meta,
            spec: ExecutionSpec {
                pipeline_name: pipeline.meta.reference(),
                pipeline_display_name: pipeline.spec.display_name.clone(),
                project_name: pipeline.spec.project_name.clone(),
                run,
                triggered_by: trigger.kind,
                trigger_user_name: trigger.user,
                repository_url: pipeline.spec.repository_url.clone(),
                pipeline_config: pipeline.spec.config.clone(),
                branch: trigger.branch,
                commit: trigger.commit,
                git_ref: trigger.git_ref,
                event: trigger.event,
                env_vars: trigger.env_vars,
                details: trigger.details,
            },
            status,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.status.execution_state
    }

    pub fn is_finished(&self) -> bool {
        self.status.execution_state.is_finished()
    }

    /// Whether the finish label has been set to `"true"`
    pub fn finish_label(&self) -> bool {
        self.meta.labels.get(FINISH_LABEL).map(String::as_str) == Some("true")
    }

    /// Set the overall state and keep the finish label consistent with it
    pub fn set_state(&mut self, state: ExecutionState) {
        self.status.execution_state = state;
        self.meta.labels.insert(
            FINISH_LABEL.to_string(),
            state.is_finished().to_string(),
        );
    }

    /// A fresh execution of the same snapshot under run number `run`
    ///
    /// Every state is reset to `Waiting`; timestamps and conditions are cleared.
    pub fn rerun(&self, run: u64, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        if !self.is_finished() {
            return Err(TransitionError::NotFinished(self.meta.name.clone()));
        }

        let pipeline_name = &self.spec.pipeline_name.name;
        let mut meta = ObjectMeta::new(
            self.meta.namespace.clone(),
            format!("{}-{}", pipeline_name, run),
        );
        meta.created_at = Some(now);
        meta.labels
            .insert(FINISH_LABEL.to_string(), "false".to_string());

        let mut spec = self.spec.clone();
        spec.run = run;

        Ok(Self {
            meta,
            status: ExecutionStatus::waiting(&spec.pipeline_config),
            spec,
        })
    }

    /// Abort a running execution
    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_finished() {
            return Err(TransitionError::AlreadyFinished(self.meta.name.clone()));
        }
        self.set_state(ExecutionState::Abort);
        self.status.ended = Some(now);
        Ok(())
    }

    /// Branch the execution builds, falling back to the checkout step's branch
    pub fn branch(&self) -> Option<&str> {
        self.spec.branch.as_deref().or_else(|| {
            self.spec
                .pipeline_config
                .source_code_config()
                .ok()
                .map(|c| c.branch.as_str())
                .filter(|b| !b.is_empty())
        })
    }

    /// Commit recorded by the backend, or the one the trigger asked for
    pub fn commit(&self) -> Option<&str> {
        self.status
            .commit
            .as_deref()
            .or(self.spec.commit.as_deref())
    }
}
