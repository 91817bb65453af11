//! Response and request bodies of the Jenkins JSON APIs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Crumb {
    pub crumb: String,
    #[serde(rename = "crumbRequestField")]
    pub field: String,
}

/// `GET /job/{name}/api/json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub in_queue: bool,
    #[serde(default)]
    pub queue_item: Option<QueueItem>,
    #[serde(default)]
    pub last_build: Option<BuildRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRef {
    pub number: u64,
}

/// `GET /job/{name}/lastBuild/api/json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub number: u64,
    /// `SUCCESS`, `FAILURE`, `ABORTED`, or absent while running
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub actions: Vec<BuildAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAction {
    #[serde(default)]
    pub last_built_revision: Option<Revision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    #[serde(rename = "SHA1")]
    pub sha1: String,
}

impl BuildInfo {
    /// Head commit checked out by the git plugin, if it reported one
    pub fn commit(&self) -> Option<&str> {
        self.actions
            .iter()
            .filter_map(|a| a.last_built_revision.as_ref())
            .map(|r| r.sha1.as_str())
            .find(|sha| !sha.is_empty())
    }
}

/// `GET /job/{name}/lastBuild/wfapi/describe`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `SUCCESS`, `FAILED`, `IN_PROGRESS`, `ABORTED`, `NOT_EXECUTED`, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub start_time_millis: i64,
    #[serde(default)]
    pub duration_millis: i64,
    #[serde(default)]
    pub stages: Vec<WorkflowStage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub start_time_millis: i64,
    #[serde(default)]
    pub duration_millis: i64,
}

/// `GET /job/{name}/lastBuild/execution/node/{id}/wfapi/describe`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub stage_flow_nodes: Vec<WorkflowStage>,
}

/// `GET /job/{name}/lastBuild/execution/node/{id}/wfapi/log`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLog {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub node_status: String,
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub console_url: String,
}

/// Username/password credential stored in the backend's global domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "$class")]
    pub class: String,
    pub scope: String,
    pub id: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub description: String,
}

impl Credential {
    pub const USERNAME_PASSWORD_CLASS: &'static str =
        "com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl";

    pub fn username_password(
        id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            class: Self::USERNAME_PASSWORD_CLASS.to_string(),
            scope: "GLOBAL".to_string(),
            id: id.into(),
            username: username.into(),
            password: password.into(),
            description: String::new(),
        }
    }
}
