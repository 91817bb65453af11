//! Jenkins driver
//!
//! Each execution gets its own backend job named `pipeline_{execution}`.
//! Running an execution compiles its snapshot into that job, provisions the
//! credentials the job references and triggers a build; syncing reads the
//! build and its workflow back into the status tree.

pub mod converter;
pub mod sync;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use weir_core::domain::execution::{PipelineExecution, TriggerType};
use weir_core::domain::meta::{ObjectMeta, ResourceRef};
use weir_core::domain::secret::Secret;
use weir_core::domain::source_code::SourceCodeCredential;
use weir_core::domain::state::ExecutionState;
use weir_jenkins::{Credential, JenkinsApi, JenkinsClient};

use self::converter::{Converter, publish_registries, registry_secret_name};
use self::sync::{
    apply_build_info, apply_preparing_log, apply_workflow_run, is_provisioning, mark_provisioned,
    step_name,
};
use super::{CiEngine, EngineError, Result};
use crate::config::{Config, JENKINS_TOKEN_KEY};
use crate::repository::{self, Store};

/// Prefix of every job the engine manages
pub const JOB_PREFIX: &str = "pipeline_";

/// Workflow node logging the executor preparation
const PREPARE_NODE_ID: &str = "3";

/// How long a triggered build may stay invisible before sync reports it missing
const BUILD_GRACE_SECONDS: i64 = 60;

const QUIET_DOWN_SCRIPT: &str = "println(Jenkins.instance.isQuietingDown())";

pub const REGISTRY_USERNAME_KEY: &str = "username";
pub const REGISTRY_PASSWORD_KEY: &str = "password";

/// Backend job of `execution`
pub fn job_name(execution: &PipelineExecution) -> String {
    format!("{}{}", JOB_PREFIX, execution.meta.name)
}

pub struct JenkinsEngine {
    api: Arc<dyn JenkinsApi>,
    store: Arc<dyn Store>,
}

impl JenkinsEngine {
    pub fn new(api: Arc<dyn JenkinsApi>, store: Arc<dyn Store>) -> Self {
        Self { api, store }
    }

    /// Connect to the configured backend with the token kept in the store
    pub async fn connect(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let reference = &config.jenkins_token_secret;
        let secret: Secret =
            repository::find(store.as_ref(), &reference.namespace, &reference.name)
                .await?
                .ok_or_else(|| {
                    EngineError::NotReady(format!("token secret {} does not exist", reference))
                })?;
        let token = secret.data.get(JENKINS_TOKEN_KEY).ok_or_else(|| {
            EngineError::NotReady(format!(
                "token secret {} has no {} key",
                reference, JENKINS_TOKEN_KEY
            ))
        })?;

        let client =
            JenkinsClient::connect(&config.jenkins_url, &config.jenkins_user, token).await?;
        info!("Connected to CI backend at {}", config.jenkins_url);

        Ok(Self::new(Arc::new(client), store))
    }

    /// Register the source credential with the backend unless it already is
    async fn set_credential(&self, reference: &ResourceRef) -> Result<()> {
        let id = reference.to_string();
        match self.api.get_credential(&id).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_not_found() => return Err(e.into()),
            Err(_) => {}
        }

        let credential: SourceCodeCredential =
            repository::get(self.store.as_ref(), &reference.namespace, &reference.name).await?;
        self.api
            .create_credential(&Credential::username_password(
                id.as_str(),
                credential.spec.git_login_name.as_str(),
                credential.spec.access_token.as_str(),
            ))
            .await?;

        debug!("Registered credential {} with the backend", id);
        Ok(())
    }

    /// Create or refresh the scoped secret each publish step pushes with
    async fn prepare_registry_credentials(&self, execution: &PipelineExecution) -> Result<()> {
        let registries = publish_registries(execution);
        if registries.is_empty() {
            return Ok(());
        }

        let namespace = execution.meta.namespace.as_str();
        let secrets: Vec<Secret> = repository::list(self.store.as_ref(), Some(namespace)).await?;

        for registry in registries {
            let (username, password) = secrets
                .iter()
                .find_map(|s| s.docker_auth(&registry))
                .unwrap_or_else(|| {
                    warn!(
                        "No registry credentials for {} in namespace {}",
                        registry, namespace
                    );
                    Default::default()
                });

            let mut data = BTreeMap::new();
            data.insert(REGISTRY_USERNAME_KEY.to_string(), username);
            data.insert(REGISTRY_PASSWORD_KEY.to_string(), password);

            let name = registry_secret_name(namespace, &registry);
            let secret = Secret::opaque(ObjectMeta::new(namespace, name.as_str()), data);

            match repository::create(self.store.as_ref(), &secret).await {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => {
                    let mut existing: Secret =
                        repository::get(self.store.as_ref(), namespace, &name).await?;
                    existing.data = secret.data;
                    repository::update(self.store.as_ref(), &existing).await?;
                }
                Err(e) => return Err(e.into()),
            }
            debug!("Prepared registry secret {} for {}", name, registry);
        }

        Ok(())
    }
}

#[async_trait]
impl CiEngine for JenkinsEngine {
    async fn pre_check(&self) -> Result<()> {
        let output = self.api.exec_script(QUIET_DOWN_SCRIPT).await?;
        if output.trim() != "false" {
            return Err(EngineError::NotReady(
                "backend is quieting down".to_string(),
            ));
        }
        Ok(())
    }

    async fn run_pipeline_execution(&self, execution: &PipelineExecution) -> Result<()> {
        let job = job_name(execution);
        let config = Converter::new(execution).job_config()?;

        match self.api.get_job_info(&job).await {
            Ok(_) => self.api.update_job(&job, &config).await?,
            Err(e) if e.is_not_found() => self.api.create_job(&job, &config).await?,
            Err(e) => return Err(e.into()),
        }

        let checkout = execution.spec.pipeline_config.source_code_config()?;
        if let Some(reference) = &checkout.source_code_credential_name {
            self.set_credential(reference).await?;
        }
        self.prepare_registry_credentials(execution).await?;

        self.api.build_job(&job).await?;
        info!(
            "Execution {} started as job {}",
            execution.meta.reference(),
            job
        );

        Ok(())
    }

    async fn rerun_execution(&self, execution: &PipelineExecution) -> Result<()> {
        let mut execution = execution.clone();
        execution.spec.triggered_by = TriggerType::User;
        self.run_pipeline_execution(&execution).await
    }

    async fn stop_execution(&self, execution: &PipelineExecution) -> Result<()> {
        let job = job_name(execution);
        let info = match self.api.get_job_info(&job).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if info.in_queue {
            let item = info.queue_item.ok_or_else(|| {
                EngineError::Inconsistent(format!("job {} is queued without a queue item", job))
            })?;
            self.api.cancel_queue_item(item.id).await?;
            info!("Cancelled queued build of {}", job);
            return Ok(());
        }

        let build = match self.api.get_build_info(&job).await {
            Ok(build) => build,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if build.building {
            self.api.stop_build(&job, build.number).await?;
            info!("Stopped build {} of {}", build.number, job);
        }

        Ok(())
    }

    async fn get_step_log(
        &self,
        execution: &PipelineExecution,
        stage: usize,
        step: usize,
    ) -> Result<String> {
        let state = execution
            .status
            .stages
            .get(stage)
            .and_then(|s| s.steps.get(step))
            .map(|s| s.state)
            .ok_or(EngineError::InvalidStep { stage, step })?;
        if state == ExecutionState::Waiting {
            return Ok(String::new());
        }

        let job = job_name(execution);
        let name = step_name(stage, step);
        let run = self.api.get_workflow_run(&job).await?;
        let node_id = run
            .stages
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id.clone())
            .ok_or_else(|| EngineError::NotFound(format!("workflow node of {}", name)))?;

        let node = self.api.get_workflow_node(&job, &node_id).await?;
        let log_node = node
            .stage_flow_nodes
            .first()
            .ok_or_else(|| EngineError::NotFound(format!("log node of {}", name)))?;

        debug!("Reading log node {} of {}", log_node.id, job);
        let log = self.api.get_workflow_node_log(&job, &log_node.id).await?;
        Ok(log.text)
    }

    async fn sync_execution(&self, execution: &mut PipelineExecution) -> Result<bool> {
        let job = job_name(execution);
        let now = Utc::now();

        let build = match self.api.get_build_info(&job).await {
            Ok(build) => build,
            Err(e) if e.is_not_found() => {
                let since = execution.status.started.or(execution.meta.created_at);
                let waited = since.map_or(Duration::zero(), |t| now - t);
                if waited < Duration::seconds(BUILD_GRACE_SECONDS) {
                    debug!("Build of {} not visible yet", job);
                    return Ok(false);
                }
                return Err(EngineError::NotFound(format!("build of job {}", job)));
            }
            Err(e) => return Err(e.into()),
        };
        let mut updated = apply_build_info(execution, &build, now);

        let run = match self.api.get_workflow_run(&job).await {
            Ok(run) => run,
            Err(e) if e.is_not_found() => return Ok(updated),
            Err(e) => return Err(e.into()),
        };
        updated |= apply_workflow_run(execution, &run, now)?;

        if execution.state() == ExecutionState::Building {
            if is_provisioning(execution) {
                match self.api.get_workflow_node_log(&job, PREPARE_NODE_ID).await {
                    Ok(log) => updated |= apply_preparing_log(execution, &log.text),
                    Err(e) if e.is_not_found() => return Ok(updated),
                    Err(e) => return Err(e.into()),
                }
            } else {
                updated |= mark_provisioned(execution);
            }
        }

        Ok(updated)
    }
}
