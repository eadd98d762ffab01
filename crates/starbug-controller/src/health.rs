use crate::cache::SyncedFlag;
use crate::config::HealthConfig;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Liveness and readiness endpoints for the controller process
pub struct HealthServer {
    config: HealthConfig,
    synced: Arc<Vec<SyncedFlag>>,
}

impl HealthServer {
    /// `synced` are the informer flags `/readyz` waits on
    pub fn new(config: HealthConfig, synced: Vec<SyncedFlag>) -> Self {
        Self {
            config,
            synced: Arc::new(synced),
        }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.synced.clone())
    }

    /// Serve until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!("Starting health server on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }
}

/// Health check endpoint
async fn healthz() -> &'static str {
    "ok"
}

/// Liveness probe
async fn livez() -> &'static str {
    "ok"
}

/// Readiness probe: ready once every informer cache has synced
async fn readyz(State(synced): State<Arc<Vec<SyncedFlag>>>) -> impl IntoResponse {
    if synced.iter().all(|flag| flag.is_synced()) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "caches not synced")
    }
}
