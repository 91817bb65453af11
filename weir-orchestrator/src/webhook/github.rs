//! GitHub deliveries
//!
//! Authenticated with an HMAC-SHA1 of the raw body keyed by the pipeline's
//! webhook token, sent as `X-Hub-Signature: sha1=<hex>`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use weir_core::domain::execution::{CommitDetails, PipelineExecution, WebhookEvent};

use super::{HookEvent, Result, WebhookDriver, WebhookError, WebhookRequest};
use crate::repository::Store;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

const PING_EVENT: &str = "ping";
const PUSH_EVENT: &str = "push";
const PULL_REQUEST_EVENT: &str = "pull_request";

const SIGNATURE_PREFIX: &str = "sha1=";
/// `sha1=` followed by 40 hex digits
const SIGNATURE_LEN: usize = 45;

/// Pull request actions that build
const PR_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

type HmacSha1 = Hmac<Sha1>;

/// Check a `sha1=<hex>` signature of `body`
///
/// Malformed headers are rejected before any digest is computed.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    if signature.len() != SIGNATURE_LEN {
        return false;
    }
    let Some(digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    login: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HeadCommit {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    head_commit: Option<HeadCommit>,
    #[serde(default)]
    sender: User,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: u64,
    pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: User,
    base: PullRequestRef,
    head: PullRequestRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

fn parse<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

/// The build a push asks for, `None` for branch deletions
fn push_event(body: &[u8]) -> Result<Option<HookEvent>> {
    let payload: PushPayload = parse(body)?;
    if payload.deleted {
        return Ok(None);
    }

    let commit = payload.head_commit.unwrap_or_default();
    let details = CommitDetails {
        html_link: commit.url,
        title: commit
            .message
            .as_ref()
            .and_then(|m| m.lines().next())
            .map(str::to_string),
        message: commit.message,
        author: commit.author.name.or_else(|| Some(payload.sender.login.clone())),
        avatar_url: payload.sender.avatar_url,
        email: commit.author.email,
    };
    let user = Some(payload.sender.login).filter(|l| !l.is_empty());

    if let Some(tag) = payload.git_ref.strip_prefix("refs/tags/") {
        return Ok(Some(HookEvent {
            event: WebhookEvent::Tag,
            branch: tag.to_string(),
            commit: payload.after,
            tag: Some(tag.to_string()),
            git_ref: payload.git_ref.clone(),
            user,
            details,
        }));
    }

    let branch = payload
        .git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(&payload.git_ref)
        .to_string();
    Ok(Some(HookEvent {
        event: WebhookEvent::Push,
        branch,
        commit: payload.after,
        git_ref: payload.git_ref.clone(),
        tag: None,
        user,
        details,
    }))
}

/// The build a pull request asks for, `None` for actions that do not change its code
fn pull_request_event(body: &[u8]) -> Result<Option<HookEvent>> {
    let payload: PullRequestPayload = parse(body)?;
    if !PR_ACTIONS.contains(&payload.action.as_str()) {
        return Ok(None);
    }

    let pr = payload.pull_request;
    Ok(Some(HookEvent {
        event: WebhookEvent::PullRequest,
        branch: pr.base.git_ref,
        commit: pr.head.sha,
        git_ref: format!("refs/pull/{}/head", payload.number),
        tag: None,
        user: Some(pr.user.login.clone()).filter(|l| !l.is_empty()),
        details: CommitDetails {
            html_link: pr.html_url,
            title: pr.title,
            message: pr.body,
            author: Some(pr.user.login).filter(|l| !l.is_empty()),
            avatar_url: pr.user.avatar_url,
            email: None,
        },
    }))
}

/// The event kind a delivery announces, known before its payload is validated
fn announced_event(event: &str, body: &[u8]) -> WebhookEvent {
    #[derive(Deserialize)]
    struct RefOnly {
        #[serde(rename = "ref", default)]
        git_ref: String,
    }

    match event {
        PULL_REQUEST_EVENT => WebhookEvent::PullRequest,
        _ => match serde_json::from_slice::<RefOnly>(body) {
            Ok(r) if r.git_ref.starts_with("refs/tags/") => WebhookEvent::Tag,
            _ => WebhookEvent::Push,
        },
    }
}

pub struct GithubDriver;

#[async_trait]
impl WebhookDriver for GithubDriver {
    fn event_header(&self) -> &'static str {
        EVENT_HEADER
    }

    async fn execute(
        &self,
        store: &dyn Store,
        request: &WebhookRequest,
    ) -> Result<Option<PipelineExecution>> {
        let signature = request
            .header(SIGNATURE_HEADER)
            .ok_or(WebhookError::MissingHeader("X-Hub-Signature"))?;

        let event = request.header(EVENT_HEADER).unwrap_or_default();
        match event {
            PING_EVENT => return Ok(None),
            PUSH_EVENT | PULL_REQUEST_EVENT => {}
            other => return Err(WebhookError::UnsupportedEvent(other.to_string())),
        }

        let pipeline = super::resolve_pipeline(store, request).await?;
        let token = pipeline.status.token.as_deref().unwrap_or_default();
        if token.is_empty() || !verify_signature(token.as_bytes(), &request.body, signature) {
            return Err(WebhookError::InvalidSignature);
        }
        super::check_policy(&pipeline, announced_event(event, &request.body))?;

        let hook = match event {
            PUSH_EVENT => push_event(&request.body)?,
            _ => pull_request_event(&request.body)?,
        };
        let Some(hook) = hook else {
            return Ok(None);
        };

        super::trigger(store, &pipeline, hook).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{self, memory::MemoryStore};
    use crate::testing::pipeline;
    use crate::webhook::WebhookRouter;
    use axum::body::{Bytes, to_bytes};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use weir_core::domain::execution::TriggerType;
    use weir_core::domain::pipeline::Pipeline;

    const TOKEN: &str = "hook-secret";

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn request(event: &str, body: serde_json::Value, secret: &str) -> WebhookRequest {
        raw_request(event, serde_json::to_vec(&body).unwrap(), secret)
    }

    fn raw_request(event: &str, body: Vec<u8>, secret: &str) -> WebhookRequest {
        let body = Bytes::from(body);
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(secret, &body)).unwrap(),
        );
        WebhookRequest {
            headers,
            pipeline_id: Some("p-1:app".to_string()),
            body,
        }
    }

    fn push_body(git_ref: &str) -> serde_json::Value {
        serde_json::json!({
            "ref": git_ref,
            "after": "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c",
            "head_commit": {
                "message": "Fix flaky test\n\nDetails",
                "url": "https://github.com/acme/app/commit/0d1a26e",
                "author": { "name": "Mona", "email": "mona@example.com" }
            },
            "sender": { "login": "octocat", "avatar_url": "https://avatars/octocat" }
        })
    }

    fn pr_body(action: &str) -> serde_json::Value {
        serde_json::json!({
            "action": action,
            "number": 7,
            "pull_request": {
                "title": "Add feature",
                "html_url": "https://github.com/acme/app/pull/7",
                "user": { "login": "hubot" },
                "base": { "ref": "main", "sha": "1111111" },
                "head": { "ref": "feature", "sha": "2222222" }
            }
        })
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut pipeline = pipeline();
        pipeline.status.token = Some(TOKEN.to_string());
        repository::create(&store, &pipeline).await.unwrap();
        store
    }

    #[test]
    fn test_verify_signature() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let signature = sign(TOKEN, body);
        assert!(verify_signature(TOKEN.as_bytes(), body, &signature));

        let mut mutated = body.to_vec();
        mutated[3] ^= 0x01;
        assert!(!verify_signature(TOKEN.as_bytes(), &mutated, &signature));
        assert!(!verify_signature(b"hook-secreu", body, &signature));

        let wrong_prefix = signature.replacen("sha1=", "sha2=", 1);
        assert!(!verify_signature(TOKEN.as_bytes(), body, &wrong_prefix));
        assert!(!verify_signature(TOKEN.as_bytes(), body, &signature[..44]));
        let not_hex = format!("sha1={}", "z".repeat(40));
        assert!(!verify_signature(TOKEN.as_bytes(), body, &not_hex));
    }

    #[test]
    fn test_push_and_tag_events() {
        let body = serde_json::to_vec(&push_body("refs/heads/main")).unwrap();
        let event = push_event(&body).unwrap().unwrap();
        assert_eq!(event.event, WebhookEvent::Push);
        assert_eq!(event.branch, "main");
        assert_eq!(event.details.title.as_deref(), Some("Fix flaky test"));
        assert_eq!(event.details.author.as_deref(), Some("Mona"));

        let body = serde_json::to_vec(&push_body("refs/tags/v1.2.0")).unwrap();
        let event = push_event(&body).unwrap().unwrap();
        assert_eq!(event.event, WebhookEvent::Tag);
        assert_eq!(event.tag.as_deref(), Some("v1.2.0"));
        assert_eq!(event.git_ref, "refs/tags/v1.2.0");
    }

    #[test]
    fn test_pull_request_event() {
        let body = serde_json::to_vec(&pr_body("synchronize")).unwrap();
        let event = pull_request_event(&body).unwrap().unwrap();
        assert_eq!(event.branch, "main");
        assert_eq!(event.commit, "2222222");
        assert_eq!(event.git_ref, "refs/pull/7/head");

        let body = serde_json::to_vec(&pr_body("closed")).unwrap();
        assert!(pull_request_event(&body).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_generates_execution() {
        let store = seeded().await;
        let request = request("push", push_body("refs/heads/main"), TOKEN);

        let execution = GithubDriver.execute(&store, &request).await.unwrap().unwrap();
        assert_eq!(execution.meta.name, "app-1");
        assert_eq!(execution.spec.triggered_by, TriggerType::Webhook);
        assert_eq!(execution.status.stages.len(), 2);

        let pipeline: Pipeline = repository::get(&store, "p-1", "app").await.unwrap();
        assert_eq!(pipeline.status.next_run, 2);
    }

    #[tokio::test]
    async fn test_rejections() {
        let store = seeded().await;

        let mut missing = request("push", push_body("refs/heads/main"), TOKEN);
        missing.headers.remove(SIGNATURE_HEADER);
        assert!(matches!(
            GithubDriver.execute(&store, &missing).await,
            Err(WebhookError::MissingHeader(_))
        ));

        let bad = request("push", push_body("refs/heads/main"), "wrong");
        assert!(matches!(
            GithubDriver.execute(&store, &bad).await,
            Err(WebhookError::InvalidSignature)
        ));

        let unknown = request("issues", serde_json::json!({}), TOKEN);
        assert!(matches!(
            GithubDriver.execute(&store, &unknown).await,
            Err(WebhookError::UnsupportedEvent(_))
        ));

        let ping = request("ping", serde_json::json!({ "zen": "hi" }), TOKEN);
        assert!(GithubDriver.execute(&store, &ping).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_trigger() {
        let store = MemoryStore::new();
        let mut pipeline = pipeline();
        pipeline.status.token = Some(TOKEN.to_string());
        pipeline.spec.trigger_webhook_pr = false;
        repository::create(&store, &pipeline).await.unwrap();

        let request = request("pull_request", pr_body("opened"), TOKEN);
        let err = GithubDriver.execute(&store, &request).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 451);
    }

    #[tokio::test]
    async fn test_disabled_trigger_wins_over_bad_payload() {
        let store = MemoryStore::new();
        let mut pipeline = pipeline();
        pipeline.status.token = Some(TOKEN.to_string());
        pipeline.spec.trigger_webhook_push = false;
        repository::create(&store, &pipeline).await.unwrap();

        let malformed = raw_request("push", b"{not json".to_vec(), TOKEN);
        let err = GithubDriver.execute(&store, &malformed).await.unwrap_err();
        assert!(matches!(err, WebhookError::TriggerDisabled("push")));
        assert_eq!(err.status().as_u16(), 451);

        let mut deleted = push_body("refs/heads/main");
        deleted["deleted"] = serde_json::json!(true);
        let err = GithubDriver
            .execute(&store, &request("push", deleted, TOKEN))
            .await
            .unwrap_err();
        assert_eq!(err.status().as_u16(), 451);

        let tag = request("push", push_body("refs/tags/v1.0.0"), TOKEN);
        assert!(GithubDriver.execute(&store, &tag).await.unwrap().is_some());
    }

    #[test]
    fn test_announced_event() {
        let tag = serde_json::to_vec(&push_body("refs/tags/v1.0.0")).unwrap();
        assert_eq!(announced_event(PUSH_EVENT, &tag), WebhookEvent::Tag);
        assert_eq!(announced_event(PUSH_EVENT, b"garbage"), WebhookEvent::Push);
        assert_eq!(announced_event(PULL_REQUEST_EVENT, b""), WebhookEvent::PullRequest);
    }

    #[tokio::test]
    async fn test_router_responses() {
        let store = seeded().await;
        let router = WebhookRouter::default();

        let ok = router
            .dispatch(&store, &request("push", push_body("refs/heads/main"), TOKEN))
            .await;
        assert_eq!(ok.status(), StatusCode::OK);

        let rejected = router
            .dispatch(&store, &request("push", push_body("refs/heads/main"), "wrong"))
            .await;
        assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = to_bytes(rejected.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["status"], 422);
        assert_eq!(body["code"], "InvalidBodyContent");

        let executions: Vec<weir_core::domain::execution::PipelineExecution> =
            repository::list(&store, Some("p-1")).await.unwrap();
        assert_eq!(executions.len(), 1);
    }
}
