//! HTTP server setup and handlers.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown token fires, then drain
//!
//! # Routes
//! - `GET|POST /priv/doc` signs `fetch` as `sign`
//! - `GET /amppkg/cert/{cert_name}` serves the certificate chain
//! - `GET /healthz` reports status and the current runtime version
//! - `GET /` answers `hello world`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::certs::responder::{CertResponder, CHAIN_MAX_AGE_SECS};
use crate::certs::CHAIN_CONTENT_TYPE;
use crate::config::PackagerConfig;
use crate::error::PackagerError;
use crate::http::request::{form_pairs, sign_params, RequestIdExt, RequestIdLayer};
use crate::http::response::{error_response, signed_exchange_response};
use crate::packager::Packager;
use crate::rtv::RtvCache;
use crate::security::limits::MAX_REQUEST_BODY;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub packager: Arc<Packager>,
    pub responder: Arc<CertResponder>,
    pub rtv: Option<Arc<RtvCache>>,
    /// Cancelled on shutdown; aborts in-flight origin fetches.
    pub cancel: CancellationToken,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &PackagerConfig, state: AppState) -> Self {
        Self {
            router: build_router(config, state),
        }
    }

    /// Serve on `listener` until `shutdown` is cancelled, then drain
    /// in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &PackagerConfig, state: AppState) -> Router {
    Router::new()
        .route("/priv/doc", get(sign_handler).post(sign_handler))
        .route("/amppkg/cert/{cert_name}", get(cert_handler))
        .route("/healthz", get(health_handler))
        .route("/", get(root_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.timeouts.request_secs,
        )))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request.request_id(),
            )
        }))
        .layer(RequestIdLayer)
}

async fn sign_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let mut pairs = Vec::new();
    if parts.method == Method::POST {
        match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
            Ok(bytes) => pairs.extend(form_pairs(&bytes)),
            Err(e) => {
                return PackagerError::Client(format!("error reading form body: {e}"))
                    .into_response()
            }
        }
    }
    if let Some(query) = parts.uri.query() {
        pairs.extend(form_pairs(query.as_bytes()));
    }

    let params = match sign_params(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let fetch = params.fetch.unwrap_or_default();

    match state
        .packager
        .package(&fetch, &params.sign, &state.cancel)
        .await
    {
        Ok(bytes) => signed_exchange_response(bytes),
        Err(e) => e.into_response(),
    }
}

async fn cert_handler(
    State(state): State<AppState>,
    Path(cert_name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let message = match state.responder.lookup(&cert_name).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            tracing::debug!(cert_name = %cert_name, "Unknown certificate requested");
            return error_response(StatusCode::NOT_FOUND, false);
        }
        Err(e) => return PackagerError::from(e).into_response(),
    };

    let etag = state.responder.etag();
    let mut response = if if_none_match(&headers, &etag) {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        let mut response = Response::new(Body::from(message));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(CHAIN_CONTENT_TYPE),
        );
        response
    };

    let out = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={CHAIN_MAX_AGE_SECS}")) {
        out.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&etag) {
        out.insert(header::ETAG, value);
    }
    response
}

/// Whether any `If-None-Match` entry matches `etag` (or is `*`).
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == "*" || tag == etag)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let rtv = state.rtv.as_ref().map(|cache| cache.version());
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rtv": rtv,
    }))
}

async fn root_handler() -> &'static str {
    "hello world"
}
