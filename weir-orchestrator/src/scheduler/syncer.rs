//! Execution syncer
//!
//! Reconciles executions with the CI backend on a fixed interval: waiting
//! executions are started (within the executor quota), running ones are
//! synced, and user-stopped ones are stopped on the backend.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use weir_core::domain::execution::{ConditionStatus, ConditionType, PipelineExecution};
use weir_core::domain::pipeline::Pipeline;
use weir_core::domain::state::ExecutionState;

use crate::engine::CiEngine;
use crate::engine::jenkins::sync::{ABORTED_MESSAGE, abort_building};
use crate::repository::{self, Store};

const MIRROR_ATTEMPTS: usize = 3;

/// What one pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub started: usize,
    pub synced: usize,
    pub stopped: usize,
    pub failed: usize,
}

pub struct ExecutionSyncer {
    store: Arc<dyn Store>,
    engine: Arc<dyn CiEngine>,
    interval: Duration,
    /// Max running executions, 0 for unlimited
    executor_quota: usize,
}

fn is_initialized(execution: &PipelineExecution) -> bool {
    execution
        .status
        .is_condition_true(ConditionType::Initialized)
}

/// Stopped by the user but not yet cleaned up
fn needs_abort(execution: &PipelineExecution) -> bool {
    execution.state() == ExecutionState::Abort
        && execution.status.condition_message(ConditionType::Built) != ABORTED_MESSAGE
}

impl ExecutionSyncer {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn CiEngine>,
        interval: Duration,
        executor_quota: usize,
    ) -> Self {
        Self {
            store,
            engine,
            interval,
            executor_quota,
        }
    }

    /// Starts the sync loop
    pub async fn run(&self) {
        info!("Starting execution syncer (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;

            match self.sync_once().await {
                Ok(report) if report != SyncReport::default() => debug!("Sync pass: {:?}", report),
                Ok(_) => {}
                Err(e) => error!("Error during sync pass: {:#}", e),
            }
        }
    }

    /// Performs a single reconciliation pass
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let executions: Vec<PipelineExecution> = repository::list(self.store.as_ref(), None)
            .await
            .context("Failed to list executions")?;

        let mut running = executions
            .iter()
            .filter(|e| !e.is_finished() && is_initialized(e))
            .count();
        let mut backend_ready: Option<bool> = None;
        let mut report = SyncReport::default();

        for execution in executions {
            let reference = execution.meta.reference();

            if needs_abort(&execution) {
                match self.abort(execution).await {
                    Ok(()) => report.stopped += 1,
                    Err(e) => error!("Failed to stop execution {}: {:#}", reference, e),
                }
                continue;
            }
            if execution.is_finished() {
                continue;
            }

            if is_initialized(&execution) {
                match self.sync(execution).await {
                    Ok(true) => report.synced += 1,
                    Ok(false) => {}
                    Err(e) => error!("Failed to sync execution {}: {:#}", reference, e),
                }
                continue;
            }

            if self.executor_quota > 0 && running >= self.executor_quota {
                debug!(
                    "Executor quota of {} reached, {} keeps waiting",
                    self.executor_quota, reference
                );
                continue;
            }

            let ready = match backend_ready {
                Some(ready) => ready,
                None => {
                    let ready = match self.engine.pre_check().await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("CI backend is not ready, not starting executions: {}", e);
                            false
                        }
                    };
                    backend_ready = Some(ready);
                    ready
                }
            };
            if !ready {
                continue;
            }

            match self.start(execution).await {
                Ok(true) => {
                    running += 1;
                    report.started += 1;
                }
                Ok(false) => report.failed += 1,
                Err(e) => error!("Failed to start execution {}: {:#}", reference, e),
            }
        }

        Ok(report)
    }

    /// Mark the execution initialized, then hand it to the backend
    ///
    /// Returns whether the backend accepted it.
    async fn start(&self, mut execution: PipelineExecution) -> Result<bool> {
        execution.status.set_condition(
            ConditionType::Initialized,
            ConditionStatus::True,
            Some("Execution handed to the CI backend"),
        );
        let mut execution = repository::update(self.store.as_ref(), &execution)
            .await
            .context("Failed to mark execution initialized")?;

        let started = match self.engine.run_pipeline_execution(&execution).await {
            Ok(()) => {
                info!("Started execution {}", execution.meta.reference());
                true
            }
            Err(e) => {
                error!(
                    "CI backend rejected execution {}: {:#}",
                    execution.meta.reference(),
                    e
                );
                execution.set_state(ExecutionState::Fail);
                execution.status.ended = Some(Utc::now());
                execution.status.set_condition(
                    ConditionType::Initialized,
                    ConditionStatus::False,
                    Some(&e.to_string()),
                );
                execution = repository::update(self.store.as_ref(), &execution)
                    .await
                    .context("Failed to record start failure")?;
                false
            }
        };

        self.mirror_last_run_state(&execution).await?;
        Ok(started)
    }

    async fn sync(&self, mut execution: PipelineExecution) -> Result<bool> {
        if !self.engine.sync_execution(&mut execution).await? {
            return Ok(false);
        }

        let execution = match repository::update(self.store.as_ref(), &execution).await {
            Ok(updated) => updated,
            Err(e) if e.is_conflict() => {
                debug!(
                    "Execution {} changed during sync, retrying next pass",
                    execution.meta.reference()
                );
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        self.mirror_last_run_state(&execution).await?;
        Ok(true)
    }

    async fn abort(&self, mut execution: PipelineExecution) -> Result<()> {
        if is_initialized(&execution) {
            self.engine
                .stop_execution(&execution)
                .await
                .context("Failed to stop backend build")?;
        }

        abort_building(&mut execution, Utc::now());
        let execution = repository::update(self.store.as_ref(), &execution).await?;
        info!("Execution {} aborted", execution.meta.reference());

        self.mirror_last_run_state(&execution).await
    }

    /// Copy the execution's state to its pipeline when it is the latest run
    async fn mirror_last_run_state(&self, execution: &PipelineExecution) -> Result<()> {
        let reference = execution.meta.reference();
        let pipeline_ref = &execution.spec.pipeline_name;

        for _ in 0..MIRROR_ATTEMPTS {
            let Some(mut pipeline) = repository::find::<Pipeline>(
                self.store.as_ref(),
                &pipeline_ref.namespace,
                &pipeline_ref.name,
            )
            .await?
            else {
                return Ok(());
            };

            if pipeline.status.last_execution_id.as_ref() != Some(&reference)
                || pipeline.status.last_run_state == Some(execution.state())
            {
                return Ok(());
            }

            pipeline.status.last_run_state = Some(execution.state());
            match repository::update(self.store.as_ref(), &pipeline).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Pipeline {} kept changing, last run state not recorded",
            pipeline_ref
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::jenkins::JenkinsEngine;
    use crate::repository::memory::MemoryStore;
    use crate::service::execution_service;
    use crate::testing::{FakeJenkins, credential, pipeline};
    use weir_core::domain::execution::Trigger;
    use weir_core::domain::meta::ResourceRef;
    use weir_core::domain::pipeline::Step;
    use weir_jenkins::{BuildInfo, WorkflowRun, WorkflowStage};

    struct Harness {
        store: Arc<MemoryStore>,
        api: Arc<FakeJenkins>,
        pipeline: Pipeline,
    }

    impl Harness {
        async fn new(with_credential: bool) -> Self {
            let store = Arc::new(MemoryStore::new());
            let mut pipeline = pipeline();
            if let Step::SourceCode(checkout) = &mut pipeline.spec.config.stages[0].steps[0] {
                checkout.source_code_credential_name =
                    Some(ResourceRef::new("u-1", "github-octocat"));
            }
            let pipeline = repository::create(store.as_ref(), &pipeline).await.unwrap();
            if with_credential {
                repository::create(store.as_ref(), &credential()).await.unwrap();
            }
            Self {
                store,
                api: Arc::new(FakeJenkins::new()),
                pipeline,
            }
        }

        fn syncer(&self, quota: usize) -> ExecutionSyncer {
            let engine = JenkinsEngine::new(self.api.clone(), self.store.clone());
            ExecutionSyncer::new(
                self.store.clone(),
                Arc::new(engine),
                Duration::from_secs(1),
                quota,
            )
        }

        async fn generate(&self) -> PipelineExecution {
            execution_service::generate_execution(
                self.store.as_ref(),
                &self.pipeline,
                Trigger::default(),
            )
            .await
            .unwrap()
        }

        async fn execution(&self, name: &str) -> PipelineExecution {
            repository::get(self.store.as_ref(), "p-1", name).await.unwrap()
        }

        async fn pipeline(&self) -> Pipeline {
            repository::get(self.store.as_ref(), "p-1", "app").await.unwrap()
        }
    }

    fn stage(name: &str, status: &str) -> WorkflowStage {
        WorkflowStage {
            id: name.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            start_time_millis: 1_700_000_000_000,
            duration_millis: 1_000,
        }
    }

    #[tokio::test]
    async fn test_waiting_execution_is_started_once() {
        let harness = Harness::new(true).await;
        harness.generate().await;
        let syncer = harness.syncer(0);

        let report = syncer.sync_once().await.unwrap();
        assert_eq!(report.started, 1);
        assert!(is_initialized(&harness.execution("app-1").await));
        assert_eq!(harness.api.state().triggered, vec!["pipeline_app-1".to_string()]);

        // Build not visible yet, still within the grace period
        let report = syncer.sync_once().await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(harness.api.state().triggered.len(), 1);
    }

    #[tokio::test]
    async fn test_executor_quota() {
        let harness = Harness::new(true).await;
        harness.generate().await;
        harness.generate().await;
        let syncer = harness.syncer(1);

        assert_eq!(syncer.sync_once().await.unwrap().started, 1);
        assert_eq!(syncer.sync_once().await.unwrap().started, 0);
        assert!(!is_initialized(&harness.execution("app-2").await));
    }

    #[tokio::test]
    async fn test_rejected_start_fails_execution() {
        let harness = Harness::new(false).await;
        harness.generate().await;

        let report = harness.syncer(0).sync_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let execution = harness.execution("app-1").await;
        assert_eq!(execution.state(), ExecutionState::Fail);
        assert!(execution.finish_label());
        assert!(!is_initialized(&execution));
        assert_eq!(
            harness.pipeline().await.status.last_run_state,
            Some(ExecutionState::Fail)
        );
    }

    #[tokio::test]
    async fn test_backend_not_ready_defers_start() {
        let harness = Harness::new(true).await;
        harness.generate().await;
        harness.api.state().quieting_down = true;

        let report = harness.syncer(0).sync_once().await.unwrap();
        assert_eq!(report.started, 0);
        assert!(!is_initialized(&harness.execution("app-1").await));
    }

    #[tokio::test]
    async fn test_sync_mirrors_last_run_state() {
        let harness = Harness::new(true).await;
        harness.generate().await;
        let syncer = harness.syncer(0);
        syncer.sync_once().await.unwrap();

        {
            let mut state = harness.api.state();
            state
                .builds
                .insert("pipeline_app-1".to_string(), BuildInfo::default());
            state.runs.insert(
                "pipeline_app-1".to_string(),
                WorkflowRun {
                    status: "SUCCESS".to_string(),
                    stages: vec![
                        stage("step-0-0", "SUCCESS"),
                        stage("step-1-0", "SUCCESS"),
                        stage("step-1-1", "SUCCESS"),
                    ],
                    ..Default::default()
                },
            );
        }

        assert_eq!(syncer.sync_once().await.unwrap().synced, 1);
        let execution = harness.execution("app-1").await;
        assert_eq!(execution.state(), ExecutionState::Success);
        assert!(execution.finish_label());
        assert_eq!(
            harness.pipeline().await.status.last_run_state,
            Some(ExecutionState::Success)
        );

        assert_eq!(syncer.sync_once().await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn test_stopped_execution_is_stopped_on_backend_once() {
        let harness = Harness::new(true).await;
        harness.generate().await;
        let syncer = harness.syncer(0);
        syncer.sync_once().await.unwrap();
        harness.api.state().builds.insert(
            "pipeline_app-1".to_string(),
            BuildInfo {
                building: true,
                number: 1,
                ..Default::default()
            },
        );

        execution_service::stop(harness.store.as_ref(), "p-1", "app-1")
            .await
            .unwrap();

        assert_eq!(syncer.sync_once().await.unwrap().stopped, 1);
        assert_eq!(
            harness.api.state().stopped,
            vec![("pipeline_app-1".to_string(), 1)]
        );
        let execution = harness.execution("app-1").await;
        assert_eq!(
            execution.status.condition_message(ConditionType::Built),
            ABORTED_MESSAGE
        );
        assert_eq!(
            harness.pipeline().await.status.last_run_state,
            Some(ExecutionState::Abort)
        );

        assert_eq!(syncer.sync_once().await.unwrap().stopped, 0);
        assert_eq!(harness.api.state().stopped.len(), 1);
    }
}
