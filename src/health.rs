//! HTTP server exposing liveness, readiness, and Prometheus metrics.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Error;
use crate::metrics;

/// Build the health router: `/healthz` (always 200), `/readyz` (200 once
/// the controller has completed a successful cycle since the most recent
/// failure, 503 otherwise), and the metrics path.
pub fn router(ready: Arc<AtomicBool>, metrics_path: &str) -> Router {
    let metrics_path = if metrics_path.starts_with('/') {
        metrics_path.to_string()
    } else {
        format!("/{metrics_path}")
    };

    Router::new()
        .route("/healthz", get(|| async { (StatusCode::OK, "ok\n") }))
        .route(
            "/readyz",
            get(move || {
                let ready = ready.clone();
                async move {
                    if ready.load(Ordering::SeqCst) {
                        (StatusCode::OK, "ok\n")
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
                    }
                }
            }),
        )
        .route(&metrics_path, get(|| async { metrics::gather() }))
}

/// Serve the health router on the given port until the token is
/// cancelled. A port of 0 disables the server.
pub async fn serve(
    port: u16,
    metrics_path: &str,
    ready: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    if port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port, metrics = metrics_path, "health server listening");

    let app = router(ready, metrics_path);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| {
            error!(error = %e, "health server error");
            Error::Io(e)
        })
}
