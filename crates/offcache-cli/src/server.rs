//! The local proxy.
//!
//! Every request is resolved against the origin and handed to the
//! registration as one long-lived client, so the active worker answers it
//! cache-first. `GET /__offcache/status` reports on the intermediary itself.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use offcache_core::network::client::is_hop_by_hop;
use offcache_core::{
    CacheRequest, CachedResponse, ClientId, Config, InterceptOutcome, Registration, UpdateOutcome,
    Url,
};

use crate::Runtime;

pub const STATUS_PATH: &str = "/__offcache/status";

/// Response header naming how the request was answered (`hit`, `miss`, ...)
pub const OUTCOME_HEADER: &str = "x-offcache";

struct AppState {
    origin: Url,
    registration: Arc<Registration>,
    client: ClientId,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .fallback(proxy)
        .with_state(state)
}

pub async fn run(config: &Config, runtime: Runtime) -> Result<()> {
    let origin = config.origin()?;

    match runtime.registration.resume(runtime.worker(config)?).await {
        Ok(UpdateOutcome::Activated(report)) => info!(
            bucket = %report.bucket,
            deleted = report.deleted.len(),
            "Cache ready"
        ),
        Ok(UpdateOutcome::Waiting) => info!("New cache version waiting for clients to close"),
        Err(e) => warn!(error = %e, "Install failed, requests go straight to the network"),
    }

    let client = runtime.registration.open_client().await;
    let state = Arc::new(AppState {
        origin: origin.clone(),
        registration: runtime.registration.clone(),
        client,
    });

    let listen = config.listen();
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!(%listen, %origin, "offcache listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    let flushed = runtime.registration.settle().await;
    info!(flushed, "offcache shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down, waiting for in-flight requests");
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let active = state.registration.active().await;
    let waiting = state.registration.waiting().await;
    Json(json!({
        "origin": state.origin.as_str(),
        "bucket": active.as_ref().map(|w| w.cache_name().to_string()),
        "state": active.as_ref().map(|w| w.state()),
        "pending": active.as_ref().map(|w| w.pending_tasks()).unwrap_or(0),
        "waiting": waiting.as_ref().map(|w| w.cache_name().to_string()),
        "clients": state.registration.clients().len(),
    }))
}

async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match to_cache_request(&state.origin, &method, &uri, &headers, body) {
        Ok(request) => request,
        Err(reason) => {
            warn!(%method, %uri, %reason, "Rejected request");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    let result = state.registration.fetch(state.client, request).await;
    debug!(%method, %uri, outcome = %result.outcome, status = result.response.status, "Served");
    to_http_response(result.response, result.outcome)
}

/// Resolve an incoming request against the origin. Paths that would leave
/// the origin (e.g. `//other-host/`) are refused.
fn to_cache_request(
    origin: &Url,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> std::result::Result<CacheRequest, String> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let request =
        CacheRequest::for_path(method.as_str(), origin, path).map_err(|e| e.to_string())?;
    if request.url().origin() != origin.origin() {
        return Err(format!("{} does not belong to {}", path, origin));
    }

    let request = headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(request, |request, (name, value)| request.with_header(name, value));
    Ok(request.with_body(body))
}

fn to_http_response(response: CachedResponse, outcome: InterceptOutcome) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => debug!(header = %name, "Dropping header that cannot be forwarded"),
        }
    }

    builder
        .header(OUTCOME_HEADER, outcome.as_str())
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
