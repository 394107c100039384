//! HTTP ingestion gateway
//!
//! Axum front end for the relay: validates method, path, authorization, and
//! body, then hands the decoded bulk to the broker publish session. Every
//! error before the publish step is the client's problem (4xx, resubmit); a
//! failed publish is ours (500).

mod auth;
mod decode;
mod path;

pub use auth::{ApiKeys, AuthError};
pub use decode::{decode_messages, DecodeError};
pub use path::{resolve, PathError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::TryStreamExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::metrics::RelayMetrics;
use crate::types::Publisher;

/// Shared gateway state
#[derive(Clone)]
struct AppState {
    publisher: Arc<dyn Publisher>,
    api_keys: Arc<ApiKeys>,
    metrics: Arc<RelayMetrics>,
}

/// HTTP ingestion server
pub struct GatewayServer {
    config: HttpConfig,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<RelayMetrics>,
}

impl GatewayServer {
    pub fn new(config: HttpConfig, publisher: Arc<dyn Publisher>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            config,
            publisher,
            metrics,
        }
    }

    /// Build the request router. Every path goes through the same pipeline;
    /// routing decisions (including 405/400) live in the handler.
    pub fn router(&self) -> Router {
        let state = AppState {
            publisher: Arc::clone(&self.publisher),
            api_keys: Arc::new(ApiKeys::new(&self.config.api_keys)),
            metrics: Arc::clone(&self.metrics),
        };
        Router::new()
            .fallback(ingest)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(self.config.timeout_secs),
            ))
    }

    /// Serve until the shutdown signal fires
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .context("Invalid HTTP listen address")?;

        let app = self.router();

        let listener = TcpListener::bind(&addr)
            .await
            .context("Failed to bind HTTP server")?;
        info!(addr = %addr, "gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .context("HTTP server failed")?;

        info!("gateway stopped");
        Ok(())
    }
}

async fn ingest(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    state.metrics.http_requests_total.inc();

    let result = pipe(&state, request).await;

    let elapsed = start.elapsed();
    state.metrics.http_request_time.observe(elapsed);

    match result {
        Ok((index, doc_type)) => {
            state.metrics.http_response(200).inc();
            debug!(
                status = 200,
                index,
                r#type = doc_type,
                duration_ms = elapsed.as_millis() as u64,
                "bulk accepted"
            );
            StatusCode::OK.into_response()
        }
        Err((status, message)) => {
            state.metrics.http_response(status.as_u16()).inc();
            warn!(status = status.as_u16(), error = %message, "request pipeline failed");
            (status, message).into_response()
        }
    }
}

/// The ingestion pipeline: method, path, auth, decode, publish
async fn pipe(state: &AppState, request: Request) -> Result<(String, String), (StatusCode, String)> {
    if request.method() != Method::POST {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            "only POST method supported".to_string(),
        ));
    }

    let (index, doc_type) = path::resolve(request.uri().path())
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    state
        .api_keys
        .authorize(auth_header, &index)
        .map_err(|e| (e.status(), e.to_string()))?;

    // Stream the body line by line instead of collecting it whole
    let body = StreamReader::new(
        request
            .into_body()
            .into_data_stream()
            .map_err(std::io::Error::other),
    );
    let bulk = decode::decode_messages(&index, &doc_type, body)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    state
        .publisher
        .publish(bulk)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((index, doc_type))
}
