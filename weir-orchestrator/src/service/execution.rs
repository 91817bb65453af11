//! Execution Service
//!
//! Generation, rerun and stop of pipeline executions.
//!
//! An execution and the run counter of its pipeline live in two objects, so
//! creating one is two writes. The execution is written first under the name
//! `{pipeline}-{run}`; the counter is then advanced with
//! `next_run = max(next_run, run + 1)` and retried on version conflicts. Both
//! steps are safe to repeat: a reused run number collides on the execution
//! name and is retried with a fresh counter, and re-applying the counter
//! update never moves it backwards.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use weir_core::domain::execution::{PipelineExecution, TransitionError, Trigger};
use weir_core::domain::pipeline::{Pipeline, PipelineConfig, PipelineError};
use weir_core::domain::state::ExecutionState;

use crate::repository::{self, Store, StoreError};

/// Attempts before giving up on a contended pipeline
const MAX_ATTEMPTS: usize = 5;

/// Service error type
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(#[from] PipelineError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("pipeline {0} is being modified concurrently, giving up")]
    Contended(String),
}

impl ExecutionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecutionError::Store(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Create a new execution of `pipeline` and advance its run counter
pub async fn generate_execution(
    store: &dyn Store,
    pipeline: &Pipeline,
    trigger: Trigger,
) -> Result<PipelineExecution> {
    generate_execution_with_config(store, pipeline, pipeline.spec.config.clone(), trigger).await
}

/// Create a new execution of `pipeline` that runs `config` instead of the stored stages
///
/// Used for pipelines whose stages live in a pipeline file in the repository.
/// The pipeline itself is not modified beyond its run counter.
pub async fn generate_execution_with_config(
    store: &dyn Store,
    pipeline: &Pipeline,
    config: PipelineConfig,
    trigger: Trigger,
) -> Result<PipelineExecution> {
    config.source_code_config()?;

    let execution = create_next(store, pipeline.clone(), |current| {
        let mut source = current.clone();
        source.spec.config = config.clone();
        Ok(PipelineExecution::new(&source, trigger.clone(), Utc::now()))
    })
    .await?;

    info!(
        "Execution {} generated ({} trigger)",
        execution.meta.reference(),
        execution.spec.triggered_by
    );

    Ok(execution)
}

/// Start a finished execution again under the pipeline's next run number
pub async fn rerun(store: &dyn Store, namespace: &str, name: &str) -> Result<PipelineExecution> {
    let execution: PipelineExecution = repository::get(store, namespace, name).await?;
    if !execution.is_finished() {
        return Err(TransitionError::NotFinished(execution.meta.name.clone()).into());
    }

    let pipeline_ref = &execution.spec.pipeline_name;
    let pipeline: Pipeline =
        repository::get(store, &pipeline_ref.namespace, &pipeline_ref.name).await?;

    let rerun = create_next(store, pipeline, |pipeline| {
        Ok(execution.rerun(pipeline.status.next_run, Utc::now())?)
    })
    .await?;

    info!(
        "Execution {} rerun as {}",
        execution.meta.reference(),
        rerun.meta.reference()
    );

    Ok(rerun)
}

/// Abort an unfinished execution
///
/// The backend build is stopped by the syncer on its next pass.
pub async fn stop(store: &dyn Store, namespace: &str, name: &str) -> Result<PipelineExecution> {
    let mut execution: PipelineExecution = repository::get(store, namespace, name).await?;
    execution.abort(Utc::now())?;

    let execution = repository::update(store, &execution).await?;
    info!("Execution {} stopped", execution.meta.reference());

    Ok(execution)
}

// =============================================================================
// Run counter
// =============================================================================

/// Store the execution `build` makes from `pipeline`, then record it on the pipeline
async fn create_next<F>(
    store: &dyn Store,
    mut pipeline: Pipeline,
    build: F,
) -> Result<PipelineExecution>
where
    F: Fn(&Pipeline) -> Result<PipelineExecution>,
{
    let mut attempt = 0;
    let execution = loop {
        let execution = build(&pipeline)?;
        match repository::create(store, &execution).await {
            Ok(created) => break created,
            Err(e) if e.is_already_exists() && attempt < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(
                    "Run {} of {} is taken, reloading the pipeline",
                    execution.spec.run,
                    pipeline.meta.reference()
                );
                let taken = execution.spec.run;
                pipeline = repository::get(store, &pipeline.meta.namespace, &pipeline.meta.name)
                    .await?;
                // A counter that was never advanced past a stored run is moved on locally
                pipeline.status.next_run = pipeline.status.next_run.max(taken + 1);
            }
            Err(e) if e.is_already_exists() => {
                return Err(ExecutionError::Contended(pipeline.meta.reference().to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    };

    record_execution(store, pipeline, &execution).await?;
    Ok(execution)
}

/// Advance the pipeline's counter past `execution` and point it at the execution
async fn record_execution(
    store: &dyn Store,
    mut pipeline: Pipeline,
    execution: &PipelineExecution,
) -> Result<Pipeline> {
    for _ in 0..MAX_ATTEMPTS {
        let status = &mut pipeline.status;
        status.next_run = status.next_run.max(execution.spec.run + 1);
        status.last_execution_id = Some(execution.meta.reference());
        status.last_started = execution.status.started.or(execution.meta.created_at);
        status.last_run_state = Some(ExecutionState::Waiting);

        match repository::update(store, &pipeline).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() => {
                warn!(
                    "Pipeline {} changed while recording {}, retrying",
                    pipeline.meta.reference(),
                    execution.meta.name
                );
                pipeline =
                    repository::get(store, &pipeline.meta.namespace, &pipeline.meta.name).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ExecutionError::Contended(pipeline.meta.reference().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryStore;
    use crate::testing::pipeline;

    async fn seeded() -> (MemoryStore, Pipeline) {
        let store = MemoryStore::new();
        let pipeline = repository::create(&store, &pipeline()).await.unwrap();
        (store, pipeline)
    }

    #[tokio::test]
    async fn test_generate_advances_counter() {
        let (store, pipeline) = seeded().await;

        let execution = generate_execution(&store, &pipeline, Trigger::user("admin"))
            .await
            .unwrap();
        assert_eq!(execution.meta.name, "app-1");
        assert_eq!(execution.state(), ExecutionState::Waiting);
        assert_eq!(execution.status.stages.len(), 2);

        let pipeline: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert_eq!(pipeline.status.next_run, 2);
        assert_eq!(
            pipeline.status.last_execution_id,
            Some(execution.meta.reference())
        );
        assert_eq!(pipeline.status.last_run_state, Some(ExecutionState::Waiting));
        assert!(pipeline.status.last_started.is_some());
    }

    #[tokio::test]
    async fn test_run_numbers_are_monotonic_with_stale_pipeline() {
        let (store, pipeline) = seeded().await;

        // Every call passes the same, increasingly stale, pipeline object
        for expected in 1..=4u64 {
            let execution = generate_execution(&store, &pipeline, Trigger::default())
                .await
                .unwrap();
            assert_eq!(execution.spec.run, expected);
        }

        let pipeline: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert_eq!(pipeline.status.next_run, 5);
        let executions: Vec<PipelineExecution> = repository::list(&store, Some("p-1")).await.unwrap();
        assert_eq!(executions.len(), 4);
    }

    #[tokio::test]
    async fn test_generate_with_loaded_config_leaves_pipeline_stages() {
        let store = MemoryStore::new();
        let mut stored = pipeline();
        let config = std::mem::take(&mut stored.spec.config);
        let stored = repository::create(&store, &stored).await.unwrap();

        let execution =
            generate_execution_with_config(&store, &stored, config.clone(), Trigger::default())
                .await
                .unwrap();
        assert_eq!(execution.spec.pipeline_config, config);
        assert_eq!(execution.status.stages.len(), 2);

        let stored: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert!(stored.spec.config.stages.is_empty());
        assert_eq!(stored.status.next_run, 2);
    }

    #[tokio::test]
    async fn test_generate_recovers_unadvanced_counter() {
        let (store, pipeline) = seeded().await;

        // An execution stored without its counter update
        let orphan = PipelineExecution::new(&pipeline, Trigger::default(), Utc::now());
        repository::create(&store, &orphan).await.unwrap();

        let execution = generate_execution(&store, &pipeline, Trigger::default())
            .await
            .unwrap();
        assert_eq!(execution.meta.name, "app-2");

        let pipeline: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert_eq!(pipeline.status.next_run, 3);
    }

    #[tokio::test]
    async fn test_generate_rejects_pipeline_without_checkout() {
        let (store, mut pipeline) = seeded().await;
        pipeline.spec.config.stages.remove(0);

        let err = generate_execution(&store, &pipeline, Trigger::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::InvalidPipeline(PipelineError::FirstStepNotSourceCode)
        ));
    }

    #[tokio::test]
    async fn test_rerun_requires_finished_execution() {
        let (store, pipeline) = seeded().await;
        let execution = generate_execution(&store, &pipeline, Trigger::default())
            .await
            .unwrap();

        let err = rerun(&store, "p-1", &execution.meta.name).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Transition(TransitionError::NotFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_rerun_takes_next_run_number() {
        let (store, pipeline) = seeded().await;
        let mut execution = generate_execution(&store, &pipeline, Trigger::default())
            .await
            .unwrap();
        execution.set_state(ExecutionState::Fail);
        execution.status.ended = Some(Utc::now());
        repository::update(&store, &execution).await.unwrap();

        let rerun = rerun(&store, "p-1", "app-1").await.unwrap();
        assert_eq!(rerun.meta.name, "app-2");
        assert_eq!(rerun.state(), ExecutionState::Waiting);
        assert_eq!(rerun.status.ended, None);

        let pipeline: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert_eq!(pipeline.status.next_run, 3);
        assert_eq!(pipeline.status.last_execution_id, Some(rerun.meta.reference()));
    }

    #[tokio::test]
    async fn test_stop() {
        let (store, pipeline) = seeded().await;
        let mut execution = generate_execution(&store, &pipeline, Trigger::default())
            .await
            .unwrap();
        execution.set_state(ExecutionState::Building);
        repository::update(&store, &execution).await.unwrap();

        let stopped = stop(&store, "p-1", "app-1").await.unwrap();
        assert_eq!(stopped.state(), ExecutionState::Abort);
        assert!(stopped.status.ended.is_some());
        assert!(stopped.finish_label());

        let err = stop(&store, "p-1", "app-1").await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Transition(TransitionError::AlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_missing_execution() {
        let (store, _) = seeded().await;
        let err = stop(&store, "p-1", "app-9").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
