//! ---
//! prflow_section: "05-testing-qa"
//! prflow_subsection: "integration"
//! prflow_type: "source"
//! prflow_scope: "test"
//! prflow_description: "GitHub adapter wire format against a local stub server."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use prflow_clients::GitHubClient;
use prflow_core::{CommitState, CommitStatus, OrchestrationError, SourceHost};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::net::TcpListener;
use url::Url;

const ZIPBALL: &[u8] = b"PK\x05\x06\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0";

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    authorization: Option<String>,
    body: Option<Value>,
}

type Calls = Arc<Mutex<Vec<Recorded>>>;

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn zipball(
    State(calls): State<Calls>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    calls.lock().push(Recorded {
        path: format!("/repos/{owner}/{repo}/zipball/{sha}"),
        authorization: authorization(&headers),
        body: None,
    });
    if sha == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response();
    }
    ZIPBALL.to_vec().into_response()
}

async fn statuses(
    State(calls): State<Calls>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    calls.lock().push(Recorded {
        path: format!("/repos/{owner}/{repo}/statuses/{sha}"),
        authorization: authorization(&headers),
        body: Some(body.clone()),
    });
    let payload = json!({
        "url": format!("https://api.github.com/repos/{owner}/{repo}/statuses/{sha}"),
        "avatar_url": "https://github.com/images/error/hubot_happy.gif",
        "id": 1,
        "node_id": "MDY6U3RhdHVzMQ==",
        "state": body["state"],
        "description": body["description"],
        "target_url": null,
        "context": body["context"],
        "created_at": "2024-05-01T12:00:00Z",
        "updated_at": "2024-05-01T12:00:00Z",
        "creator": {
            "login": "octocat",
            "id": 1,
            "node_id": "MDQ6VXNlcjE=",
            "avatar_url": "https://github.com/images/error/octocat_happy.gif",
            "gravatar_id": "",
            "url": "https://api.github.com/users/octocat",
            "html_url": "https://github.com/octocat",
            "followers_url": "https://api.github.com/users/octocat/followers",
            "following_url": "https://api.github.com/users/octocat/following{/other_user}",
            "gists_url": "https://api.github.com/users/octocat/gists{/gist_id}",
            "starred_url": "https://api.github.com/users/octocat/starred{/owner}{/repo}",
            "subscriptions_url": "https://api.github.com/users/octocat/subscriptions",
            "organizations_url": "https://api.github.com/users/octocat/orgs",
            "repos_url": "https://api.github.com/users/octocat/repos",
            "events_url": "https://api.github.com/users/octocat/events{/privacy}",
            "received_events_url": "https://api.github.com/users/octocat/received_events",
            "type": "User",
            "site_admin": false
        }
    });
    (StatusCode::CREATED, Json(payload)).into_response()
}

async fn spawn_stub() -> (SocketAddr, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/repos/:owner/:repo/zipball/:sha", get(zipball))
        .route("/repos/:owner/:repo/statuses/:sha", post(statuses))
        .with_state(calls.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, calls)
}

fn client(addr: SocketAddr) -> GitHubClient {
    GitHubClient::new(Url::parse(&format!("http://{addr}")).unwrap()).unwrap()
}

#[tokio::test]
async fn zipball_is_written_to_destination_with_token() {
    let (addr, calls) = spawn_stub().await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("0a1b2c3.zip");

    client(addr)
        .download_archive("ghp_test", "nimbusscale", "thebestest", "0a1b2c3", &dest)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), ZIPBALL);
    let calls = calls.lock();
    assert_eq!(calls[0].path, "/repos/nimbusscale/thebestest/zipball/0a1b2c3");
    assert_eq!(calls[0].authorization.as_deref(), Some("token ghp_test"));
}

#[tokio::test]
async fn missing_zipball_is_a_service_error() {
    let (addr, _calls) = spawn_stub().await;
    let dir = tempdir().unwrap();

    let err = client(addr)
        .download_archive("ghp_test", "nimbusscale", "thebestest", "missing", &dir.path().join("x.zip"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestrationError::Service {
            service: "github",
            operation: "download_archive",
            ..
        }
    ));
}

#[tokio::test]
async fn commit_status_posts_state_context_and_description() {
    let (addr, calls) = spawn_stub().await;
    let status = CommitStatus::new(CommitState::Pending, "prflow-pipeline-test-17", "exec-1");

    client(addr)
        .create_commit_status("ghp_test", "nimbusscale", "thebestest", "0a1b2c3", &status)
        .await
        .unwrap();

    let calls = calls.lock();
    let recorded = &calls[0];
    assert_eq!(recorded.path, "/repos/nimbusscale/thebestest/statuses/0a1b2c3");
    assert!(recorded
        .authorization
        .as_deref()
        .is_some_and(|header| header.ends_with("ghp_test")));
    let body = recorded.body.as_ref().unwrap();
    assert_eq!(body["state"], json!("pending"));
    assert_eq!(body["context"], json!("prflow-pipeline-test-17"));
    assert_eq!(body["description"], json!("exec-1"));
}
