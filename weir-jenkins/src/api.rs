//! Backend API seam
//!
//! Engines talk to the backend through this trait so they can be driven by
//! an in-memory fake in tests.

use async_trait::async_trait;

use crate::JenkinsClient;
use crate::error::Result;
use crate::types::{BuildInfo, Credential, JobInfo, NodeLog, WorkflowNode, WorkflowRun};

/// Operations the CI engine needs from the backend
#[async_trait]
pub trait JenkinsApi: Send + Sync {
    async fn create_job(&self, name: &str, config_xml: &str) -> Result<()>;

    async fn update_job(&self, name: &str, config_xml: &str) -> Result<()>;

    /// Returns `ClientError::NotFound` when the job does not exist
    async fn get_job_info(&self, name: &str) -> Result<JobInfo>;

    async fn build_job(&self, name: &str) -> Result<()>;

    async fn stop_build(&self, name: &str, build_number: u64) -> Result<()>;

    async fn cancel_queue_item(&self, id: u64) -> Result<()>;

    async fn get_build_info(&self, name: &str) -> Result<BuildInfo>;

    async fn get_workflow_run(&self, name: &str) -> Result<WorkflowRun>;

    async fn get_workflow_node(&self, name: &str, node_id: &str) -> Result<WorkflowNode>;

    async fn get_workflow_node_log(&self, name: &str, node_id: &str) -> Result<NodeLog>;

    async fn create_credential(&self, credential: &Credential) -> Result<()>;

    /// Returns `ClientError::NotFound` when the credential does not exist
    async fn get_credential(&self, id: &str) -> Result<()>;

    async fn exec_script(&self, script: &str) -> Result<String>;
}

#[async_trait]
impl JenkinsApi for JenkinsClient {
    async fn create_job(&self, name: &str, config_xml: &str) -> Result<()> {
        JenkinsClient::create_job(self, name, config_xml).await
    }

    async fn update_job(&self, name: &str, config_xml: &str) -> Result<()> {
        JenkinsClient::update_job(self, name, config_xml).await
    }

    async fn get_job_info(&self, name: &str) -> Result<JobInfo> {
        JenkinsClient::get_job_info(self, name).await
    }

    async fn build_job(&self, name: &str) -> Result<()> {
        JenkinsClient::build_job(self, name).await
    }

    async fn stop_build(&self, name: &str, build_number: u64) -> Result<()> {
        JenkinsClient::stop_build(self, name, build_number).await
    }

    async fn cancel_queue_item(&self, id: u64) -> Result<()> {
        JenkinsClient::cancel_queue_item(self, id).await
    }

    async fn get_build_info(&self, name: &str) -> Result<BuildInfo> {
        JenkinsClient::get_build_info(self, name).await
    }

    async fn get_workflow_run(&self, name: &str) -> Result<WorkflowRun> {
        JenkinsClient::get_workflow_run(self, name).await
    }

    async fn get_workflow_node(&self, name: &str, node_id: &str) -> Result<WorkflowNode> {
        JenkinsClient::get_workflow_node(self, name, node_id).await
    }

    async fn get_workflow_node_log(&self, name: &str, node_id: &str) -> Result<NodeLog> {
        JenkinsClient::get_workflow_node_log(self, name, node_id).await
    }

    async fn create_credential(&self, credential: &Credential) -> Result<()> {
        JenkinsClient::create_credential(self, credential).await
    }

    async fn get_credential(&self, id: &str) -> Result<()> {
        JenkinsClient::get_credential(self, id).await
    }

    async fn exec_script(&self, script: &str) -> Result<String> {
        JenkinsClient::exec_script(self, script).await
    }
}
