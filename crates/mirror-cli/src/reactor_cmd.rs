//! The Reactor webhook server: verifies inbound GitHub webhook signatures
//! and dispatches to [`mirror_core::reactor`] (§4.2).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use mirror_core::{Config, Error, Result};
use mirror_host::{CommitStatusState, GitHubHostClient};
use mirror_store::SqliteStore;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::bootstrap;
use crate::webhook::{self, CheckRunEvent, IssuesEvent, PullRequestEvent, StatusEvent};

struct AppState {
    store: SqliteStore,
    clients: HashMap<String, GitHubHostClient>,
    webhook_secret: String,
}

/// Build the store and host clients, then serve the webhook endpoint on
/// `0.0.0.0:<port>` until the process is killed.
///
/// # Errors
/// Returns an error if `webhook_secret` is unset, the database can't be
/// opened, installation discovery fails, or the listener can't bind.
pub async fn run(config: Config, port: u16) -> Result<()> {
    let webhook_secret = config
        .webhook_secret
        .clone()
        .ok_or_else(|| Error::Config("webhook_secret must be set to run the reactor".into()))?;

    let store = SqliteStore::open(&config.db_path)?;
    let auth = bootstrap::load_app_auth(&config)?;
    let clients = bootstrap::build_clients(&config, &auth).await?;

    let state = Arc::new(AppState { store, clients, webhook_secret });
    let app = Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/status", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(Error::Io)?;
    info!(addr, "reactor listening");
    axum::serve(listener, app).await.map_err(Error::Io)?;
    Ok(())
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers.get("X-Hub-Signature-256").and_then(|v| v.to_str().ok()) else {
        warn!("webhook delivery missing X-Hub-Signature-256");
        return StatusCode::UNAUTHORIZED;
    };
    if !webhook::verify_signature(&state.webhook_secret, &body, signature) {
        warn!("webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let Some(event) = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };

    let result = match event {
        "issues" => dispatch_issues(&state, &body).await,
        "pull_request" => dispatch_pull_request(&state, &body).await,
        "check_run" | "check_suite" => dispatch_check_run(&state, &body).await,
        "status" => dispatch_status(&state, &body).await,
        other => {
            info!(event = other, "ignoring webhook event we don't react to");
            Ok(())
        }
    };

    match result {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "webhook handler failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn dispatch_issues(state: &AppState, body: &[u8]) -> Result<()> {
    let payload: IssuesEvent = serde_json::from_slice(body)?;
    if payload.action != "closed" {
        return Ok(());
    }
    let fork_org = &payload.repository.owner.login;
    let Some(client) = state.clients.get(fork_org) else {
        warn!(fork_org, "no authenticated client for this fork org, dropping event");
        return Ok(());
    };
    let fork_repo = state.store.get_or_create_repo(fork_org, &payload.repository.name).await?;
    mirror_core::reactor::handle_issue_closed(
        &state.store,
        client,
        fork_org,
        &payload.repository.name,
        fork_repo.id,
        payload.issue.number,
    )
    .await?;
    Ok(())
}

async fn dispatch_pull_request(state: &AppState, body: &[u8]) -> Result<()> {
    let payload: PullRequestEvent = serde_json::from_slice(body)?;
    if payload.action != "closed" {
        return Ok(());
    }
    let fork_org = &payload.repository.owner.login;
    let fork_repo = state.store.get_or_create_repo(fork_org, &payload.repository.name).await?;
    mirror_core::reactor::handle_pr_closed(&state.store, fork_repo.id, payload.number).await
}

async fn dispatch_check_run(state: &AppState, body: &[u8]) -> Result<()> {
    let payload: CheckRunEvent = serde_json::from_slice(body)?;
    if payload.action != "completed" {
        return Ok(());
    }
    // `completed` implies `conclusion` is set; treat a missing one as failure
    // rather than guessing a pass.
    let success = payload.check_run.conclusion.is_some_and(mirror_host::CheckConclusion::is_success);
    react_to_ci_signal(
        state,
        &payload.repository.owner.login,
        &payload.repository.name,
        &payload.check_run.head_sha,
        &payload.check_run.name,
        success,
    )
    .await
}

async fn dispatch_status(state: &AppState, body: &[u8]) -> Result<()> {
    let payload: StatusEvent = serde_json::from_slice(body)?;
    if payload.state == CommitStatusState::Pending {
        return Ok(());
    }
    react_to_ci_signal(
        state,
        &payload.repository.owner.login,
        &payload.repository.name,
        &payload.sha,
        &payload.context,
        payload.state.is_success(),
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn react_to_ci_signal(
    state: &AppState,
    fork_org: &str,
    repo: &str,
    sha: &str,
    check_name: &str,
    success: bool,
) -> Result<()> {
    let Some(client) = state.clients.get(fork_org) else {
        warn!(fork_org, "no authenticated client for this fork org, dropping event");
        return Ok(());
    };
    let fork_repo = state.store.get_or_create_repo(fork_org, repo).await?;
    mirror_core::reactor::handle_ci_signal(&state.store, client, fork_org, repo, fork_repo.id, sha, check_name, success)
        .await
}
