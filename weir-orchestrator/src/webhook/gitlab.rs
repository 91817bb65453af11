//! GitLab deliveries
//!
//! Authenticated by the pipeline's webhook token echoed in `X-Gitlab-Token`.

use async_trait::async_trait;
use serde::Deserialize;
use weir_core::domain::execution::{CommitDetails, PipelineExecution, WebhookEvent};

use super::{HookEvent, Result, WebhookDriver, WebhookError, WebhookRequest};
use crate::repository::Store;

pub const EVENT_HEADER: &str = "x-gitlab-event";
pub const TOKEN_HEADER: &str = "x-gitlab-token";

const PUSH_HOOK: &str = "Push Hook";
const TAG_PUSH_HOOK: &str = "Tag Push Hook";
const MERGE_REQUEST_HOOK: &str = "Merge Request Hook";

/// Merge request actions that build
const MR_ACTIONS: [&str; 3] = ["open", "update", "reopen"];

/// Commit id GitLab reports for deleted refs
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Default, Deserialize)]
struct Author {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Commit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    author: Author,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    checkout_sha: Option<String>,
    #[serde(default)]
    after: String,
    #[serde(default)]
    user_username: Option<String>,
    #[serde(default)]
    user_avatar: Option<String>,
    #[serde(default)]
    commits: Vec<Commit>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestPayload {
    #[serde(default)]
    user: MergeRequestUser,
    object_attributes: MergeRequest,
}

#[derive(Debug, Default, Deserialize)]
struct MergeRequestUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    target_branch: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    last_commit: Commit,
}

fn parse<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

/// Branch and tag pushes, `None` when the ref was deleted
fn push_event(body: &[u8], tag_push: bool) -> Result<Option<HookEvent>> {
    let payload: PushPayload = parse(body)?;
    let commit = payload
        .checkout_sha
        .clone()
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| payload.after.clone());
    if commit.is_empty() || commit == NULL_SHA {
        return Ok(None);
    }

    let head = payload
        .commits
        .into_iter()
        .find(|c| c.id == commit)
        .unwrap_or_default();
    let details = CommitDetails {
        html_link: head.url,
        title: head.title,
        message: head.message,
        author: head.author.name.or_else(|| payload.user_username.clone()),
        avatar_url: payload.user_avatar,
        email: head.author.email,
    };

    let (event, branch, tag) = match payload.git_ref.strip_prefix("refs/tags/") {
        Some(tag) if tag_push => (WebhookEvent::Tag, tag.to_string(), Some(tag.to_string())),
        _ => {
            let branch = payload
                .git_ref
                .strip_prefix("refs/heads/")
                .unwrap_or(&payload.git_ref);
            (WebhookEvent::Push, branch.to_string(), None)
        }
    };

    Ok(Some(HookEvent {
        event,
        branch,
        commit,
        git_ref: payload.git_ref.clone(),
        tag,
        user: payload.user_username,
        details,
    }))
}

fn merge_request_event(body: &[u8]) -> Result<Option<HookEvent>> {
    let payload: MergeRequestPayload = parse(body)?;
    let mr = payload.object_attributes;
    if !mr
        .action
        .as_deref()
        .is_some_and(|action| MR_ACTIONS.contains(&action))
    {
        return Ok(None);
    }

    Ok(Some(HookEvent {
        event: WebhookEvent::PullRequest,
        branch: mr.target_branch,
        commit: mr.last_commit.id,
        git_ref: format!("refs/merge-requests/{}/head", mr.iid),
        tag: None,
        user: payload.user.username.clone(),
        details: CommitDetails {
            html_link: mr.url,
            title: mr.title,
            message: mr.description,
            author: payload.user.username,
            avatar_url: payload.user.avatar_url,
            email: mr.last_commit.author.email,
        },
    }))
}

pub struct GitlabDriver;

#[async_trait]
impl WebhookDriver for GitlabDriver {
    fn event_header(&self) -> &'static str {
        EVENT_HEADER
    }

    async fn execute(
        &self,
        store: &dyn Store,
        request: &WebhookRequest,
    ) -> Result<Option<PipelineExecution>> {
        let token = request
            .header(TOKEN_HEADER)
            .ok_or(WebhookError::MissingHeader("X-Gitlab-Token"))?;

        let event = request.header(EVENT_HEADER).unwrap_or_default();
        if ![PUSH_HOOK, TAG_PUSH_HOOK, MERGE_REQUEST_HOOK].contains(&event) {
            return Err(WebhookError::UnsupportedEvent(event.to_string()));
        }

        let pipeline = super::resolve_pipeline(store, request).await?;
        match pipeline.status.token.as_deref() {
            Some(expected) if !expected.is_empty() && expected == token => {}
            _ => return Err(WebhookError::InvalidSignature),
        }

        let announced = match event {
            MERGE_REQUEST_HOOK => WebhookEvent::PullRequest,
            TAG_PUSH_HOOK => WebhookEvent::Tag,
            _ => WebhookEvent::Push,
        };
        super::check_policy(&pipeline, announced)?;

        let hook = match event {
            MERGE_REQUEST_HOOK => merge_request_event(&request.body)?,
            _ => push_event(&request.body, event == TAG_PUSH_HOOK)?,
        };
        let Some(hook) = hook else {
            return Ok(None);
        };

        super::trigger(store, &pipeline, hook).await
    }
}
