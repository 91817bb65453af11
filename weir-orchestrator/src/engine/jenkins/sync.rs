//! Status reconciliation
//!
//! Maps backend build and workflow status onto the execution status tree.
//! Every transition here is guarded by the state it replaces, so applying
//! the same backend snapshot twice reports no change the second time.

use chrono::{DateTime, Utc};
use weir_core::domain::execution::{
    ConditionStatus, ConditionType, PipelineExecution, is_stage_success,
};
use weir_core::domain::state::ExecutionState;
use weir_jenkins::{BuildInfo, WorkflowRun, WorkflowStage};

use crate::engine::{EngineError, Result};

const STATUS_SUCCESS: &str = "SUCCESS";
const STATUS_FAILED: &str = "FAILED";
const STATUS_ABORTED: &str = "ABORTED";
const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
const STATUS_NOT_EXECUTED: &str = "NOT_EXECUTED";
const RESULT_FAILURE: &str = "FAILURE";

/// Parallel branches can report `SUCCESS` before they ran; shorter ones count as building
const MIN_SUCCESS_MILLIS: i64 = 100;

pub const ABORTED_MESSAGE: &str = "aborted by user";

/// Backend stage name of step `step` in stage `stage`
pub fn step_name(stage: usize, step: usize) -> String {
    format!("step-{}-{}", stage, step)
}

/// Inverse of [`step_name`]
pub fn parse_step_name(name: &str) -> Option<(usize, usize)> {
    let (stage, step) = name.strip_prefix("step-")?.split_once('-')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(stage) || !digits(step) {
        return None;
    }
    Some((stage.parse().ok()?, step.parse().ok()?))
}

fn stage_times(stage: &WorkflowStage) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (
        DateTime::from_timestamp_millis(stage.start_time_millis),
        DateTime::from_timestamp_millis(stage.start_time_millis + stage.duration_millis),
    )
}

/// Replace a condition's message, keeping its status
fn set_message(execution: &mut PipelineExecution, condition: ConditionType, message: &str) -> bool {
    let status = execution
        .status
        .condition(condition)
        .map_or(ConditionStatus::Unknown, |c| c.status);
    execution
        .status
        .set_condition(condition, status, Some(message))
}

fn stage_name(execution: &PipelineExecution, stage: usize) -> String {
    execution
        .spec
        .pipeline_config
        .stages
        .get(stage)
        .map(|s| s.name.clone())
        .unwrap_or_default()
}

// =============================================================================
// Build info
// =============================================================================

/// Record the built commit and fail the execution on a failed build result
pub fn apply_build_info(execution: &mut PipelineExecution, build: &BuildInfo, now: DateTime<Utc>) -> bool {
    let mut updated = false;

    if execution.status.commit.is_none() {
        if let Some(commit) = build.commit() {
            execution.status.commit = Some(commit.to_string());
            updated = true;
        }
    }

    // Some failures only show up in the build result, never in the workflow
    if build.result.as_deref() == Some(RESULT_FAILURE) && !execution.is_finished() {
        execution.set_state(ExecutionState::Fail);
        execution.status.ended = execution.status.ended.or(Some(now));
        execution.status.set_condition(
            ConditionType::Built,
            ConditionStatus::False,
            Some("Build result is FAILURE"),
        );
        updated = true;
    }

    updated
}

// =============================================================================
// Workflow
// =============================================================================

/// Walk the workflow's `step-i-j` stages, then mirror its aggregate status
pub fn apply_workflow_run(
    execution: &mut PipelineExecution,
    run: &WorkflowRun,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut updated = false;

    for stage in &run.stages {
        let Some((i, j)) = parse_step_name(&stage.name) else {
            continue;
        };
        let current = execution
            .status
            .stages
            .get(i)
            .and_then(|s| s.steps.get(j))
            .map(|s| s.state)
            .ok_or_else(|| {
                EngineError::Inconsistent(format!("{} is out of range", stage.name))
            })?;

        // Finished steps and executions never move back to Building
        let can_build = !current.is_finished() && !execution.is_finished();

        match stage.status.as_str() {
            STATUS_SUCCESS if current != ExecutionState::Success => {
                if stage.duration_millis < MIN_SUCCESS_MILLIS {
                    if can_build && current != ExecutionState::Building {
                        building_step(execution, i, j, stage);
                        updated = true;
                    }
                    continue;
                }
                success_step(execution, i, j, stage);
                updated = true;
            }
            STATUS_FAILED | STATUS_ABORTED if current != ExecutionState::Fail => {
                fail_step(execution, i, j, stage);
                updated = true;
            }
            STATUS_IN_PROGRESS if can_build && current != ExecutionState::Building => {
                building_step(execution, i, j, stage);
                updated = true;
            }
            STATUS_NOT_EXECUTED if current != ExecutionState::Skipped => {
                skip_step(execution, i, j, stage);
                updated = true;
            }
            _ => {}
        }
    }

    let state = execution.state();
    match run.status.as_str() {
        STATUS_SUCCESS if !state.is_finished() => {
            execution.set_state(ExecutionState::Success);
            execution.status.ended = execution.status.ended.or(Some(now));
            execution
                .status
                .set_condition(ConditionType::Provisioned, ConditionStatus::True, None);
            execution
                .status
                .set_condition(ConditionType::Built, ConditionStatus::True, None);
            updated = true;
        }
        STATUS_FAILED if !state.is_finished() => {
            execution.set_state(ExecutionState::Fail);
            execution.status.ended = execution.status.ended.or(Some(now));
            if !execution.status.is_condition_true(ConditionType::Provisioned) {
                execution
                    .status
                    .set_condition(ConditionType::Provisioned, ConditionStatus::True, None);
            }
            execution.status.set_condition(
                ConditionType::Built,
                ConditionStatus::False,
                Some("Workflow reported FAILED status"),
            );
            updated = true;
        }
        STATUS_IN_PROGRESS if state == ExecutionState::Waiting => {
            execution.set_state(ExecutionState::Building);
            updated = true;
        }
        _ => {}
    }

    Ok(updated)
}

fn success_step(execution: &mut PipelineExecution, i: usize, j: usize, stage: &WorkflowStage) {
    let (start, end) = stage_times(stage);
    let last = execution.status.stages.len() - 1;
    let status = &mut execution.status;

    let step = &mut status.stages[i].steps[j];
    step.state = ExecutionState::Success;
    step.started = step.started.or(start);
    step.ended = end;

    status.stages[i].started = status.stages[i].started.or(start);
    status.started = status.started.or(start);

    if is_stage_success(&status.stages[i]) {
        status.stages[i].state = ExecutionState::Success;
        status.stages[i].ended = end;
        if i == last && !execution.is_finished() {
            execution.set_state(ExecutionState::Success);
            execution.status.ended = end;
            execution
                .status
                .set_condition(ConditionType::Built, ConditionStatus::True, None);
        }
    }
}

fn fail_step(execution: &mut PipelineExecution, i: usize, j: usize, stage: &WorkflowStage) {
    let (start, end) = stage_times(stage);
    let name = stage_name(execution, i);
    let status = &mut execution.status;

    let step = &mut status.stages[i].steps[j];
    step.state = ExecutionState::Fail;
    step.started = step.started.or(start);
    step.ended = end;

    let stage_status = &mut status.stages[i];
    stage_status.state = ExecutionState::Fail;
    stage_status.started = stage_status.started.or(start);
    stage_status.ended = stage_status.ended.or(end);

    // Concurrent branches of the failed stage will not finish
    for (k, other) in stage_status.steps.iter_mut().enumerate() {
        if k != j && other.state == ExecutionState::Building {
            other.state = ExecutionState::Abort;
            other.ended = end;
        }
    }

    // Nothing that was still waiting will run
    for stage_status in &mut status.stages {
        if stage_status.state == ExecutionState::Waiting {
            stage_status.state = ExecutionState::Skipped;
        }
        for other in &mut stage_status.steps {
            if other.state == ExecutionState::Waiting {
                other.state = ExecutionState::Skipped;
            }
        }
    }

    status.started = status.started.or(start);
    status.ended = status.ended.or(end);

    if !execution.is_finished() {
        execution.set_state(ExecutionState::Fail);
        execution.status.set_condition(
            ConditionType::Built,
            ConditionStatus::False,
            Some(&format!("Got FAILED status in '{}' stage", name)),
        );
    }
}

fn building_step(execution: &mut PipelineExecution, i: usize, j: usize, stage: &WorkflowStage) {
    let (start, _) = stage_times(stage);
    let name = stage_name(execution, i);
    let status = &mut execution.status;

    let step = &mut status.stages[i].steps[j];
    step.state = ExecutionState::Building;
    step.started = step.started.or(start);

    let stage_status = &mut status.stages[i];
    if stage_status.state == ExecutionState::Waiting {
        stage_status.state = ExecutionState::Building;
    }
    stage_status.started = stage_status.started.or(start);
    status.started = status.started.or(start);

    if execution.state() == ExecutionState::Waiting {
        execution.set_state(ExecutionState::Building);
    }
    if !execution.is_finished() {
        set_message(
            execution,
            ConditionType::Built,
            &format!("Running '{}' stage", name),
        );
    }
}

fn skip_step(execution: &mut PipelineExecution, i: usize, j: usize, stage: &WorkflowStage) {
    let (_, end) = stage_times(stage);
    let last = execution.status.stages.len() - 1;
    let status = &mut execution.status;

    status.stages[i].steps[j].state = ExecutionState::Skipped;

    let stage_status = &mut status.stages[i];
    if stage_status
        .steps
        .iter()
        .all(|s| s.state == ExecutionState::Skipped)
    {
        stage_status.state = ExecutionState::Skipped;
    } else if is_stage_success(stage_status) {
        stage_status.state = ExecutionState::Success;
        stage_status.ended = end;
    }

    let stage_done = matches!(
        stage_status.state,
        ExecutionState::Skipped | ExecutionState::Success
    );
    if i == last && stage_done && !execution.is_finished() {
        execution.set_state(ExecutionState::Success);
        execution.status.ended = end;
        execution
            .status
            .set_condition(ConditionType::Built, ConditionStatus::True, None);
    }
}

// =============================================================================
// Provisioning
// =============================================================================

/// Whether the executors for the first step are still being set up
pub fn is_provisioning(execution: &PipelineExecution) -> bool {
    execution.state() == ExecutionState::Building
        && execution
            .status
            .stages
            .first()
            .and_then(|s| s.steps.first())
            .is_some_and(|s| s.state == ExecutionState::Waiting)
}

/// Human readable progress from the preparation log, `None` when nothing new can be said
pub fn translate_preparing_message(log: &str) -> Option<String> {
    let line = log
        .trim_end_matches('\n')
        .rsplit('\n')
        .next()
        .unwrap_or_default();

    if line.is_empty() {
        Some("Setting up executors".to_string())
    } else if line.contains(" offline") {
        Some("Waiting for executors to be ready".to_string())
    } else if line.contains("Running") {
        Some(strip_tags(line))
    } else {
        None
    }
}

/// Remove `<...>` markup; a tag has at least one character between its brackets
fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('<') {
        let inner = &rest[open + 1..];
        let close = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '>')
            .map(|(idx, _)| idx);

        match close {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &inner[close + 1..];
            }
            None => break,
        }
    }

    out.push_str(rest);
    out
}

/// Update the provisioning message from the preparation log
pub fn apply_preparing_log(execution: &mut PipelineExecution, log: &str) -> bool {
    match translate_preparing_message(log) {
        Some(message) => set_message(execution, ConditionType::Provisioned, &message),
        None => false,
    }
}

/// Executors are up once the first step left `Waiting`
pub fn mark_provisioned(execution: &mut PipelineExecution) -> bool {
    execution
        .status
        .set_condition(ConditionType::Provisioned, ConditionStatus::True, None)
}

/// Abort whatever is still building after the user stopped the execution
pub fn abort_building(execution: &mut PipelineExecution, now: DateTime<Utc>) -> bool {
    let mut updated = false;
    let ended = execution.status.ended.or(Some(now));

    for stage in &mut execution.status.stages {
        if stage.state == ExecutionState::Building {
            stage.state = ExecutionState::Abort;
            stage.ended = stage.ended.or(ended);
            updated = true;
        }
        for step in &mut stage.steps {
            if step.state == ExecutionState::Building {
                step.state = ExecutionState::Abort;
                step.ended = step.ended.or(ended);
                updated = true;
            }
        }
    }

    if execution.status.condition_message(ConditionType::Built) != ABORTED_MESSAGE {
        execution.status.set_condition(
            ConditionType::Built,
            ConditionStatus::False,
            Some(ABORTED_MESSAGE),
        );
        updated = true;
    }

    updated
}
