//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_rpc};
use crate::proxy::handle_proxy;
use axum::{
    routing::{get, post},
    Router,
};
use lingua_core::{LinguaApi, LoadProgress, ProgressCallback};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use url::Url;

/// Proxied model downloads allowed at once.
const PROXY_CONCURRENCY: usize = 8;

/// Latest load progress per pair key, for polling front ends.
#[derive(Default)]
pub struct ProgressBoard {
    latest: Mutex<HashMap<String, LoadProgress>>,
}

impl ProgressBoard {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LoadProgress>> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, progress: LoadProgress) {
        self.lock().insert(progress.pair.clone(), progress);
    }

    pub fn latest(&self, pair: &str) -> Option<LoadProgress> {
        self.lock().get(pair).cloned()
    }

    pub fn forget(&self, pair: &str) {
        self.lock().remove(pair);
    }

    /// Callback that records into this board.
    pub fn callback(self: &Arc<Self>) -> ProgressCallback {
        let board = self.clone();
        Arc::new(move |progress| board.record(progress))
    }
}

/// Application state shared across handlers.
pub struct AppState {
    /// Core orchestrator
    pub api: LinguaApi,
    /// Only URLs under this base may be proxied
    pub storage_base: Url,
    /// Client for proxied model downloads
    pub http: reqwest::Client,
    pub progress: Arc<ProgressBoard>,
}

impl AppState {
    pub fn new(api: LinguaApi, storage_base: Url) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("lingua-rpc/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api,
            storage_base,
            http,
            progress: Arc::new(ProgressBoard::default()),
        })
    }
}

/// Build the router for the given state.
pub fn router(state: Arc<AppState>) -> Router {
    // Configure CORS for the reader front end
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // The proxy sets its own CORS headers, so it sits outside the CORS layer.
    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .route(
            "/proxy",
            get(handle_proxy).layer(ConcurrencyLimitLayer::new(PROXY_CONCURRENCY)),
        )
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
