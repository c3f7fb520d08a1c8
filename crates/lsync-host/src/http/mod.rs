pub mod webhook;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{CollectionConfig, CollectionKind, HttpServerConfig};
use crate::error::SyncError;
use crate::scheduler::TaskScheduler;

#[derive(Clone)]
pub struct HttpState {
    pub scheduler: TaskScheduler,
    /// Collections accepting notifications, with their secrets.
    pub collections: Arc<BTreeMap<CollectionKind, CollectionConfig>>,
}

impl HttpState {
    pub fn new(
        scheduler: TaskScheduler,
        collections: BTreeMap<CollectionKind, CollectionConfig>,
    ) -> Self {
        Self {
            scheduler,
            collections: Arc::new(collections),
        }
    }
}

/// Error surfaced to webhook callers as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::Authentication(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/webhook/{kind}", post(webhook::handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "in_flight": state.scheduler.in_flight(),
    }))
}

/// Bind the listener and serve in the background until shutdown is broadcast.
///
/// Binding happens before spawning so an unusable address fails startup.
pub async fn spawn_http_server(
    config: HttpServerConfig,
    state: HttpState,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<Option<HttpServer>, SyncError> {
    if !config.enabled {
        return Ok(None);
    }
    let addr = config.bind;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SyncError::config(format!("bind {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| SyncError::config(format!("bind {addr}: {e}")))?;
    tracing::info!("HTTP server listening on http://{}", local_addr);

    let app = router(state);
    let shutdown_rx = shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        if let Err(err) = serve(listener, app, shutdown_rx).await {
            tracing::error!("http server error: {err}");
        }
    });
    Ok(Some(HttpServer { local_addr, handle }))
}

/// Running HTTP server task.
pub struct HttpServer {
    pub local_addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
}
