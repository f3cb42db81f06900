//! HTTP server for the flow service.
//!
//! The server provides:
//! - The JSON endpoints over axum
//! - Single ownership of the store (one task drives the `Service`)
//! - PID file and signal-driven shutdown

use crate::auth::TokenTable;
use crate::config::Config;
use crate::kv::KvStore;
use crate::protocol::{PageParams, Request, Response, SaveBody};
use crate::service::Service;
use crate::store::FlowStore;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use eyre::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

/// Queue depth between handlers and the store task.
const CHANNEL_CAPACITY: usize = 100;

/// A request waiting for the store task, with the slot for its answer.
pub type Job = (Request, oneshot::Sender<Response>);

#[derive(Clone)]
struct AppState {
    tx: mpsc::Sender<Job>,
}

/// Build the router. Every handler forwards to the store task behind `tx`.
pub fn router(tx: mpsc::Sender<Job>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/events/public", get(list_public))
        .route("/api/events/timeline", get(public_timeline))
        .route("/api/flows/load", get(load))
        .route("/api/flows/save", post(save))
        .route("/api/flows/delete", delete(delete_flow))
        .route("/api/flows/timeline", get(owned_timeline))
        .route("/api/auth/sync-user", post(sync_user))
        .with_state(AppState { tx })
}

/// Drive the service until every sender is gone.
pub async fn serve_loop<K: KvStore>(mut service: Service<K>, mut rx: mpsc::Receiver<Job>) {
    while let Some((request, reply)) = rx.recv().await {
        let response = service.handle(request);
        // The caller may have gone away
        let _ = reply.send(response);
    }
    log::debug!("Store task finished");
}

fn into_http(response: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body())).into_response()
}

async fn forward(state: &AppState, request: Request) -> axum::response::Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.tx.send((request, reply_tx)).await.is_err() {
        log::error!("Store task is gone");
        return into_http(Response::error(500, "internal error"));
    }
    match reply_rx.await {
        Ok(response) => into_http(response),
        Err(_) => {
            log::error!("Store task dropped a request");
            into_http(Response::error(500, "internal error"))
        }
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn bad_body(e: serde_json::Error) -> axum::response::Response {
    log::debug!("Rejected request body: {}", e);
    into_http(Response::error(400, format!("invalid request body: {}", e)))
}

/// Parse an optional JSON body; an empty body is the default value.
fn parse_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> serde_json::Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        serde_json::from_slice(body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoadParams {
    #[serde(default)]
    flow_id: Option<String>,
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteBody {
    #[serde(default)]
    flow_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncUserBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn healthz(State(state): State<AppState>) -> axum::response::Response {
    forward(&state, Request::Ping).await
}

async fn list_public(State(state): State<AppState>, Query(page): Query<PageParams>) -> axum::response::Response {
    forward(&state, Request::ListPublic { page }).await
}

async fn public_timeline(State(state): State<AppState>) -> axum::response::Response {
    forward(&state, Request::PublicTimeline).await
}

async fn load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LoadParams>,
) -> axum::response::Response {
    let request = Request::Load {
        auth: authorization(&headers),
        flow_id: params.flow_id,
        page: PageParams {
            limit: params.limit,
            cursor: params.cursor,
        },
    };
    forward(&state, request).await
}

async fn save(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    let auth = authorization(&headers);
    let body: SaveBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return bad_body(e),
    };
    forward(&state, Request::Save { auth, body }).await
}

async fn delete_flow(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    let auth = authorization(&headers);
    let body: DeleteBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return bad_body(e),
    };
    forward(
        &state,
        Request::Delete {
            auth,
            flow_id: body.flow_id,
        },
    )
    .await
}

async fn owned_timeline(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    forward(
        &state,
        Request::OwnedTimeline {
            auth: authorization(&headers),
        },
    )
    .await
}

async fn sync_user(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> axum::response::Response {
    let auth = authorization(&headers);
    let body: SyncUserBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return bad_body(e),
    };
    forward(
        &state,
        Request::SyncUser {
            auth,
            name: body.name,
            description: body.description,
        },
    )
    .await
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    log::info!("Shutdown signal received");
}

/// The flow server.
pub struct Server {
    listen: SocketAddr,
    pid_path: PathBuf,
    service: Service,
}

impl Server {
    /// Open the store and build the service from a config.
    pub fn new(config: &Config) -> Result<Self> {
        let store = FlowStore::open(&config.database, config.store_timeout()).context("Failed to open store")?;
        let tokens = TokenTable::new(&config.tokens);
        if tokens.is_empty() {
            log::warn!("No tokens configured; only public endpoints will succeed");
        }

        Ok(Self {
            listen: config.listen_addr()?,
            pid_path: config.pid_path(),
            service: Service::new(store, tokens, config.page_limits()),
        })
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen))?;

        fs::write(&self.pid_path, std::process::id().to_string()).context("Failed to write PID file")?;
        log::info!("Server listening on {}", self.listen);

        let (tx, rx) = mpsc::channel::<Job>(CHANNEL_CAPACITY);
        let worker = tokio::spawn(serve_loop(self.service, rx));

        let result = axum::serve(listener, router(tx))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error");

        // The router (and its sender) is gone, so the store task drains and exits
        if let Err(e) = worker.await {
            log::error!("Store task panicked: {}", e);
        }

        fs::remove_file(&self.pid_path).ok();
        log::info!("Server stopped");
        result
    }
}

fn read_pid(pid_path: &Path) -> Option<i32> {
    fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

/// Check whether the server recorded in `pid_path` is alive. Stale PID
/// files are removed.
pub fn is_server_running(pid_path: &Path) -> bool {
    if let Some(pid) = read_pid(pid_path) {
        // Signal 0 checks for existence without delivering anything
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
    }

    fs::remove_file(pid_path).ok();
    false
}

/// Ask a running server to shut down.
pub fn stop_server(pid_path: &Path) -> Result<()> {
    let pid = read_pid(pid_path).ok_or_else(|| eyre::eyre!("No PID file at {}", pid_path.display()))?;

    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("Failed to signal process {}", pid));
    }
    Ok(())
}
