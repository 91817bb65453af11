//! Build and workflow status endpoints

use reqwest::Method;

use crate::JenkinsClient;
use crate::error::Result;
use crate::types::{BuildInfo, NodeLog, WorkflowNode, WorkflowRun};

impl JenkinsClient {
    // =============================================================================
    // Build Status
    // =============================================================================

    /// Get the last build of a job
    pub async fn get_build_info(&self, name: &str) -> Result<BuildInfo> {
        let path = format!("{}/lastBuild/api/json", Self::job_path(name));
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Get the workflow view of the last build, one entry per pipeline stage
    pub async fn get_workflow_run(&self, name: &str) -> Result<WorkflowRun> {
        let path = format!("{}/lastBuild/wfapi/describe", Self::job_path(name));
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Workflow Nodes
    // =============================================================================

    /// Get a workflow node of the last build
    ///
    /// # Arguments
    /// * `name` - The job name
    /// * `node_id` - The node id reported by the workflow view
    pub async fn get_workflow_node(&self, name: &str, node_id: &str) -> Result<WorkflowNode> {
        let path = format!(
            "{}/lastBuild/execution/node/{}/wfapi/describe",
            Self::job_path(name),
            urlencoding::encode(node_id)
        );
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Get the log of a workflow node of the last build
    pub async fn get_workflow_node_log(&self, name: &str, node_id: &str) -> Result<NodeLog> {
        let path = format!(
            "{}/lastBuild/execution/node/{}/wfapi/log",
            Self::job_path(name),
            urlencoding::encode(node_id)
        );
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use crate::JenkinsClient;
    use crate::testing::serve;
    use axum::{Json, Router, routing::get};

    #[tokio::test]
    async fn test_get_workflow_run() {
        let router = Router::new().route(
            "/job/{name}/lastBuild/wfapi/describe",
            get(|| async {
                Json(serde_json::json!({
                    "id": "7",
                    "name": "#7",
                    "status": "IN_PROGRESS",
                    "startTimeMillis": 1700000000000i64,
                    "durationMillis": 1500,
                    "stages": [
                        { "id": "12", "name": "step-0-0", "status": "SUCCESS",
                          "startTimeMillis": 1700000000000i64, "durationMillis": 900 },
                        { "id": "19", "name": "step-1-0", "status": "IN_PROGRESS",
                          "startTimeMillis": 1700000000900i64, "durationMillis": 600 }
                    ]
                }))
            }),
        );
        let client = JenkinsClient::connect(serve(router).await, "admin", "token")
            .await
            .unwrap();

        let run = client.get_workflow_run("pipeline_app-7").await.unwrap();
        assert_eq!(run.status, "IN_PROGRESS");
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[1].name, "step-1-0");
        assert_eq!(run.stages[0].duration_millis, 900);
    }

    #[tokio::test]
    async fn test_get_workflow_node_log() {
        let router = Router::new().route(
            "/job/{name}/lastBuild/execution/node/{id}/wfapi/log",
            get(|| async {
                Json(serde_json::json!({
                    "nodeId": "13",
                    "nodeStatus": "SUCCESS",
                    "length": 12,
                    "hasMore": false,
                    "text": "hello world\n"
                }))
            }),
        );
        let client = JenkinsClient::connect(serve(router).await, "admin", "token")
            .await
            .unwrap();

        let log = client.get_workflow_node_log("pipeline_app-7", "13").await.unwrap();
        assert_eq!(log.text, "hello world\n");
        assert!(!log.has_more);
    }
}
