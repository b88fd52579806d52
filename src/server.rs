//! Offline-first HTTP front end.
//!
//! Every request that is not a status endpoint is resolved against the
//! registration scope and answered through [`Registration::handle_fetch`],
//! so installed assets are served without reaching the upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{Error, Result};
use crate::message::{AssetRequest, AssetResponse};
use crate::network::Network;
use crate::registration::Registration;
use crate::storage::CacheStorage;
use crate::worker::WorkerState;

/// Prefix of the front end's own endpoints; never forwarded.
pub const STATUS_PREFIX: &str = "/__asset-cache";

/// Headers that describe one hop and are not replayed.
const HOP_HEADERS: [&str; 4] = ["connection", "content-length", "keep-alive", "transfer-encoding"];

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    active_cache: Option<String>,
}

#[derive(Serialize)]
struct EntriesResponse {
    cache_name: Option<String>,
    urls: Vec<String>,
}

async fn health<S, N>(State(registration): State<Arc<Registration<S, N>>>) -> impl IntoResponse
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let active_cache = registration
        .active()
        .await
        .filter(|w| w.state() == WorkerState::Active)
        .map(|w| w.config().cache_name.clone());
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        active_cache,
    })
}

async fn entries<S, N>(State(registration): State<Arc<Registration<S, N>>>) -> Response
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let Some(worker) = registration.active().await else {
        return axum::Json(EntriesResponse {
            cache_name: None,
            urls: Vec::new(),
        })
        .into_response();
    };
    match worker.cached_urls().await {
        Ok(urls) => axum::Json(EntriesResponse {
            cache_name: Some(worker.config().cache_name.clone()),
            urls,
        })
        .into_response(),
        Err(e) => {
            log::error!("Listing cache entries failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn proxy<S, N>(
    State(registration): State<Arc<Registration<S, N>>>,
    method: Method,
    uri: Uri,
) -> Response
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let target = uri.path_and_query().map_or("", |pq| pq.as_str());
    let Some(url) = scoped_url(registration.scope(), target) else {
        log::warn!("Refusing {method} {uri}: outside {}", registration.scope());
        return (StatusCode::BAD_REQUEST, format!("path {uri} is outside the scope"))
            .into_response();
    };

    let request = AssetRequest::new(method, url);
    match registration.handle_fetch(&request).await {
        Ok(response) => into_http_response(response),
        Err(e) => {
            log::warn!("{} {} failed: {e}", request.method(), request.url());
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Resolves a request target against `scope`.
///
/// Returns `None` unless the result stays on the scope's origin and under
/// its path, so a target can never redirect the request to another host.
fn scoped_url(scope: &Url, target: &str) -> Option<Url> {
    let url = scope.join(target.trim_start_matches('/')).ok()?;
    (url.origin() == scope.origin() && url.path().starts_with(scope.path())).then_some(url)
}

fn into_http_response(response: AssetResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        if HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            log::error!("Invalid stored response for {}: {e}", response.url);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Builds the front end router.
pub fn router<S, N>(registration: Arc<Registration<S, N>>) -> Router
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&format!("{STATUS_PREFIX}/health"), get(health::<S, N>))
        .route(&format!("{STATUS_PREFIX}/entries"), get(entries::<S, N>))
        .fallback(proxy::<S, N>)
        .layer(cors)
        .with_state(registration)
}

/// Serves the front end until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server<S, N>(
    registration: Arc<Registration<S, N>>,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        Error::Config(format!("bind address {host}:{port}: {e}"))
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "Serving {} on http://{}",
        registration.scope(),
        listener.local_addr()?
    );

    axum::serve(listener, router(registration))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
