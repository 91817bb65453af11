//! Fixtures and in-memory fakes shared by the unit tests

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use weir_core::domain::execution::{PipelineExecution, Trigger};
use weir_core::domain::meta::{ObjectMeta, ResourceRef};
use weir_core::domain::pipeline::{
    Pipeline, PipelineConfig, PipelineSpec, PipelineStatus, RunScriptConfig, SourceCodeConfig,
    Stage, Step,
};
use weir_core::domain::source_code::{
    SourceCodeCredential, SourceCodeCredentialSpec, SourceCodeRepositorySpec, SourceCodeType,
};
use weir_jenkins::types::{BuildRef, QueueItem};
use weir_jenkins::{
    BuildInfo, ClientError, Credential, JenkinsApi, JobInfo, NodeLog, WorkflowNode, WorkflowRun,
};
use weir_remote::{Remote, RemoteError};

// =============================================================================
// Fixtures
// =============================================================================

fn run_script(script: &str) -> Step {
    Step::RunScript(RunScriptConfig {
        image: "golang:1.22".to_string(),
        shell_script: script.to_string(),
        ..Default::default()
    })
}

/// `p-1:app`: a checkout stage followed by a two-step test stage
pub fn pipeline() -> Pipeline {
    let repository_url = "https://github.com/acme/app.git".to_string();
    Pipeline {
        meta: ObjectMeta::new("p-1", "app"),
        spec: PipelineSpec {
            project_name: "c-1:p-1".to_string(),
            display_name: "app".to_string(),
            trigger_webhook_push: true,
            trigger_webhook_pr: true,
            trigger_webhook_tag: true,
            repository_url: repository_url.clone(),
            source_code_credential_name: None,
            config: PipelineConfig {
                stages: vec![
                    Stage {
                        name: "Clone".to_string(),
                        steps: vec![Step::SourceCode(SourceCodeConfig {
                            url: repository_url,
                            branch: "main".to_string(),
                            ..Default::default()
                        })],
                    },
                    Stage {
                        name: "Test".to_string(),
                        steps: vec![run_script("go test ./..."), run_script("go vet ./...")],
                    },
                ],
                timeout_minutes: None,
            },
        },
        status: PipelineStatus::default(),
    }
}

/// GitHub credential of `octocat`, stored for platform user `u-1`
pub fn credential() -> SourceCodeCredential {
    SourceCodeCredential {
        meta: ObjectMeta::new("u-1", "github-octocat"),
        spec: login_spec(SourceCodeType::Github),
    }
}

/// Run 1 of [`pipeline`], checking out with [`credential`]
pub fn execution() -> PipelineExecution {
    let mut pipeline = pipeline();
    if let Some(Step::SourceCode(checkout)) = pipeline.spec.config.stages[0].steps.first_mut() {
        checkout.source_code_credential_name = Some(ResourceRef::new("u-1", "github-octocat"));
    }
    PipelineExecution::new(&pipeline, Trigger::default(), Utc::now())
}

fn login_spec(source_code_type: SourceCodeType) -> SourceCodeCredentialSpec {
    SourceCodeCredentialSpec {
        cluster_name: String::new(),
        user_name: "u-1".to_string(),
        source_code_type,
        login_name: "octocat".to_string(),
        display_name: "The Octocat".to_string(),
        avatar_url: String::new(),
        html_url: String::new(),
        git_login_name: "octocat".to_string(),
        access_token: "token".to_string(),
    }
}

// =============================================================================
// Remote provider
// =============================================================================

#[derive(Default)]
struct FakeRemoteState {
    repos: Vec<SourceCodeRepositorySpec>,
    fail_repos: bool,
    hooks: Vec<(String, String)>,
    next_hook: u64,
    pipeline_file: Option<Vec<u8>>,
}

/// A provider that answers from memory
pub struct FakeRemote {
    source_code_type: SourceCodeType,
    state: Mutex<FakeRemoteState>,
}

impl FakeRemote {
    pub fn new(source_code_type: SourceCodeType) -> Self {
        Self {
            source_code_type,
            state: Mutex::new(FakeRemoteState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeRemoteState> {
        self.state.lock().unwrap()
    }

    pub fn set_repos(&self, repos: Vec<SourceCodeRepositorySpec>) {
        self.state().repos = repos;
    }

    pub fn fail_repos(&self) {
        self.state().fail_repos = true;
    }

    pub fn set_pipeline_file(&self, content: Vec<u8>) {
        self.state().pipeline_file = Some(content);
    }

    /// Pipelines that currently have a hook registered
    pub fn hooks(&self) -> Vec<String> {
        self.state().hooks.iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl Remote for FakeRemote {
    fn source_code_type(&self) -> SourceCodeType {
        self.source_code_type
    }

    async fn login(
        &self,
        _redirect_url: Option<&str>,
        _code: &str,
    ) -> weir_remote::Result<SourceCodeCredentialSpec> {
        let mut spec = login_spec(self.source_code_type);
        spec.user_name = String::new();
        Ok(spec)
    }

    async fn repos(
        &self,
        _credential: &SourceCodeCredentialSpec,
    ) -> weir_remote::Result<Vec<SourceCodeRepositorySpec>> {
        let state = self.state();
        if state.fail_repos {
            return Err(RemoteError::api_error(502, "upstream unavailable"));
        }
        Ok(state.repos.clone())
    }

    async fn create_hook(&self, pipeline: &Pipeline, _access_token: &str) -> weir_remote::Result<String> {
        let mut state = self.state();
        state.next_hook += 1;
        let id = format!("hook-{}", state.next_hook);
        state
            .hooks
            .push((pipeline.meta.reference().to_string(), id.clone()));
        Ok(id)
    }

    async fn delete_hook(&self, pipeline: &Pipeline, _access_token: &str) -> weir_remote::Result<()> {
        let reference = pipeline.meta.reference().to_string();
        self.state().hooks.retain(|(p, _)| *p != reference);
        Ok(())
    }

    async fn get_pipeline_file_in_repo(
        &self,
        _repo_url: &str,
        _git_ref: Option<&str>,
        _access_token: &str,
    ) -> weir_remote::Result<Option<Vec<u8>>> {
        Ok(self.state().pipeline_file.clone())
    }

    async fn get_default_branch(&self, _repo_url: &str, _access_token: &str) -> weir_remote::Result<String> {
        Ok("main".to_string())
    }
}

// =============================================================================
// CI backend
// =============================================================================

/// Everything the fake backend knows, open for tests to arrange and inspect
#[derive(Default)]
pub struct FakeJenkinsState {
    pub jobs: BTreeMap<String, String>,
    pub queued: BTreeMap<String, QueueItem>,
    pub triggered: Vec<String>,
    pub builds: BTreeMap<String, BuildInfo>,
    pub runs: BTreeMap<String, WorkflowRun>,
    pub nodes: BTreeMap<(String, String), WorkflowNode>,
    pub logs: BTreeMap<(String, String), String>,
    pub credentials: BTreeMap<String, Credential>,
    pub stopped: Vec<(String, u64)>,
    pub cancelled: Vec<u64>,
    pub quieting_down: bool,
    /// Status every call fails with when set
    pub fail_with: Option<u16>,
}

pub struct FakeJenkins {
    state: Mutex<FakeJenkinsState>,
}

impl FakeJenkins {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeJenkinsState::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeJenkinsState> {
        self.state.lock().unwrap()
    }

    fn checked(&self) -> weir_jenkins::Result<MutexGuard<'_, FakeJenkinsState>> {
        let state = self.state();
        match state.fail_with {
            Some(status) => Err(ClientError::status(status, "injected failure")),
            None => Ok(state),
        }
    }
}

fn not_found(what: impl Into<String>) -> ClientError {
    ClientError::NotFound(what.into())
}

#[async_trait]
impl JenkinsApi for FakeJenkins {
    async fn create_job(&self, name: &str, config_xml: &str) -> weir_jenkins::Result<()> {
        let mut state = self.checked()?;
        if state.jobs.contains_key(name) {
            return Err(ClientError::status(400, format!("job {} exists", name)));
        }
        state.jobs.insert(name.to_string(), config_xml.to_string());
        Ok(())
    }

    async fn update_job(&self, name: &str, config_xml: &str) -> weir_jenkins::Result<()> {
        let mut state = self.checked()?;
        let job = state.jobs.get_mut(name).ok_or_else(|| not_found(name))?;
        *job = config_xml.to_string();
        Ok(())
    }

    async fn get_job_info(&self, name: &str) -> weir_jenkins::Result<JobInfo> {
        let state = self.checked()?;
        if !state.jobs.contains_key(name) {
            return Err(not_found(name));
        }
        let queue_item = state.queued.get(name).cloned();
        Ok(JobInfo {
            name: name.to_string(),
            in_queue: queue_item.is_some(),
            queue_item,
            last_build: state
                .builds
                .get(name)
                .map(|b| BuildRef { number: b.number }),
        })
    }

    async fn build_job(&self, name: &str) -> weir_jenkins::Result<()> {
        let mut state = self.checked()?;
        if !state.jobs.contains_key(name) {
            return Err(not_found(name));
        }
        state.triggered.push(name.to_string());
        Ok(())
    }

    async fn stop_build(&self, name: &str, build_number: u64) -> weir_jenkins::Result<()> {
        self.checked()?
            .stopped
            .push((name.to_string(), build_number));
        Ok(())
    }

    async fn cancel_queue_item(&self, id: u64) -> weir_jenkins::Result<()> {
        let mut state = self.checked()?;
        state.queued.retain(|_, item| item.id != id);
        state.cancelled.push(id);
        Ok(())
    }

    async fn get_build_info(&self, name: &str) -> weir_jenkins::Result<BuildInfo> {
        self.checked()?
            .builds
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn get_workflow_run(&self, name: &str) -> weir_jenkins::Result<WorkflowRun> {
        self.checked()?
            .runs
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn get_workflow_node(&self, name: &str, node_id: &str) -> weir_jenkins::Result<WorkflowNode> {
        self.checked()?
            .nodes
            .get(&(name.to_string(), node_id.to_string()))
            .cloned()
            .ok_or_else(|| not_found(node_id))
    }

    async fn get_workflow_node_log(&self, name: &str, node_id: &str) -> weir_jenkins::Result<NodeLog> {
        self.checked()?
            .logs
            .get(&(name.to_string(), node_id.to_string()))
            .map(|text| NodeLog {
                node_id: node_id.to_string(),
                text: text.clone(),
                ..Default::default()
            })
            .ok_or_else(|| not_found(node_id))
    }

    async fn create_credential(&self, credential: &Credential) -> weir_jenkins::Result<()> {
        self.checked()?
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> weir_jenkins::Result<()> {
        if self.checked()?.credentials.contains_key(id) {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    async fn exec_script(&self, _script: &str) -> weir_jenkins::Result<String> {
        Ok(format!("{}\n", self.checked()?.quieting_down))
    }
}
