//! Metrics and probe endpoints.

use crate::error::ControllerError;
use crate::metrics::EngineMetrics;
use axum::extract::State as AxumState;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct State {
    metrics: EngineMetrics,
    ready: CancellationToken,
}

impl State {
    /// `ready` is cancelled once the process can serve traffic.
    pub fn new(metrics: EngineMetrics, ready: CancellationToken) -> Self {
        Self { metrics, ready }
    }
}

pub async fn serve(
    addr: SocketAddr,
    state: Arc<State>,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

pub fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn metrics(AxumState(state): AxumState<Arc<State>>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "Ok"
}

async fn readyz(AxumState(state): AxumState<Arc<State>>) -> Response {
    if state.ready.is_cancelled() {
        (StatusCode::OK, "Ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NotReady").into_response()
    }
}
