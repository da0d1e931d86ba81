//! Response construction and error mapping.
//!
//! # Responsibilities
//! - Map [`PackagerError`] to a status code and a generic body
//! - Mark every error response uncacheable
//! - Build the signed-exchange success response
//!
//! # Design Decisions
//! - Internal detail goes to the log, never to the client
//! - Contention is retryable and says so with `Retry-After`

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::PackagerError;
use crate::exchange::CONTENT_TYPE;

impl PackagerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PackagerError::Client(_) => StatusCode::BAD_REQUEST,
            PackagerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PackagerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PackagerError::Unavailable(_) | PackagerError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for PackagerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            PackagerError::Internal(_) => tracing::error!(error = %self, "Request failed"),
            PackagerError::Cancelled => tracing::info!(error = %self, "Request failed"),
            _ => tracing::warn!(error = %self, status = status.as_u16(), "Request failed"),
        }
        error_response(status, matches!(self, PackagerError::Unavailable(_)))
    }
}

/// A plain-text `"{code} {reason}"` response that must not be cached.
pub fn error_response(status: StatusCode, retryable: bool) -> Response {
    let body = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("error").to_lowercase()
    );
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if retryable {
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

/// A 200 carrying a serialized exchange.
pub fn signed_exchange_response(bytes: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-transform"));
    response
}
