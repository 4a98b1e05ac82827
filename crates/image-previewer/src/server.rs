//! HTTP server for the previewer endpoints
//!
//! Provides /health and /fill/{width}/{height}/{source} endpoints.

use crate::pipeline::{Pipeline, Thumbnail};
use crate::transform::OUTPUT_CONTENT_TYPE;
use crate::types::HealthResponse;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub pipeline: Pipeline,
    pub request_timeout: Duration,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(pipeline: Pipeline, request_timeout: Duration) -> Self {
        Self {
            pipeline,
            request_timeout,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/fill", get(fill))
        .route("/fill/", get(fill))
        .route("/fill/{*rest}", get(fill))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and run until `shutdown` resolves.
///
/// After `shutdown` the listener stops accepting and in-flight requests get
/// at most `drain_timeout` to finish.
pub async fn start_server(
    state: SharedState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, router, shutdown, drain_timeout).await
}

async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, router)
        .with_graceful_shutdown({
            let stop = stop.clone();
            async move { stop.notified().await }
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result,
        _ = shutdown => {
            info!("Shutting down server");
            stop.notify_one();
        }
    }

    match tokio::time::timeout(drain_timeout, server).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                timeout_secs = drain_timeout.as_secs(),
                "In-flight requests did not finish before shutdown timeout"
            );
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.pipeline.cache().stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

/// Resize endpoint: GET /fill/{width}/{height}/{source}
async fn fill(State(state): State<SharedState>, uri: Uri, headers: HeaderMap) -> Response {
    // Fires when this future is dropped, i.e. when the client disconnects
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let processed = tokio::time::timeout(
        state.request_timeout,
        state.pipeline.process(target, &headers, &cancel),
    )
    .await;

    match processed {
        Ok(Ok(thumbnail)) => thumbnail_response(thumbnail),
        Ok(Err(e)) => e.into_response(),
        Err(_) => {
            cancel.cancel();
            warn!(
                path = %target,
                timeout_secs = state.request_timeout.as_secs(),
                "Request timed out"
            );
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse {
                    error: "Request timed out".to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn thumbnail_response(thumbnail: Thumbnail) -> Response {
    let (body, cache_header) = match thumbnail {
        Thumbnail::Cached { file, .. } => (Body::from_stream(ReaderStream::new(file)), "HIT"),
        Thumbnail::Fresh { data } => (Body::from(data), "MISS"),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, OUTPUT_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .header("X-Cache", cache_header)
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
