//! Request identification and parameter extraction.
//!
//! # Responsibilities
//! - Assign a UUID v4 request ID when the client did not send one
//! - Echo the ID back on the response
//! - Collect the `fetch` and `sign` form parameters from query and body
//!
//! # Design Decisions
//! - The request ID is set before tracing so every span carries it
//! - Parameters are counted, not just looked up, so duplicates are rejected

use axum::http::{HeaderName, HeaderValue, Request};
use tower::Layer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestId, PropagateRequestIdLayer, RequestId as TowerRequestId,
    SetRequestId, SetRequestIdLayer,
};

use crate::error::PackagerError;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestId;

impl MakeRequestId for RequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(TowerRequestId::new)
    }
}

/// Sets `x-request-id` on the request if missing and copies it to the
/// response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = SetRequestId<PropagateRequestId<S>, RequestId>;

    fn layer(&self, inner: S) -> Self::Service {
        let header = HeaderName::from_static(X_REQUEST_ID);
        let propagate = PropagateRequestIdLayer::new(header.clone()).layer(inner);
        SetRequestIdLayer::new(header, RequestId).layer(propagate)
    }
}

/// Read the request ID back off a request.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

/// The URL pair of a signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignParams {
    pub fetch: Option<String>,
    pub sign: String,
}

/// Collect `fetch` and `sign` from the query string and an urlencoded body.
/// More than one `fetch`, or anything but exactly one `sign`, is a client
/// error.
pub fn sign_params<'a, I>(pairs: I) -> Result<SignParams, PackagerError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut fetch = Vec::new();
    let mut sign = Vec::new();
    for (key, value) in pairs {
        match key {
            "fetch" => fetch.push(value.to_string()),
            "sign" => sign.push(value.to_string()),
            _ => {}
        }
    }

    if fetch.len() > 1 {
        return Err(PackagerError::Client(format!(
            "more than 1 fetch param: {fetch:?}"
        )));
    }
    if sign.len() != 1 {
        return Err(PackagerError::Client(format!(
            "not exactly 1 sign param: {sign:?}"
        )));
    }
    Ok(SignParams {
        fetch: fetch.pop(),
        sign: sign.remove(0),
    })
}

/// Decode `application/x-www-form-urlencoded` pairs.
pub fn form_pairs(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_params_single_pair() {
        let params = sign_params([("fetch", "http://a/"), ("sign", "https://a/")]).unwrap();
        assert_eq!(params.fetch.as_deref(), Some("http://a/"));
        assert_eq!(params.sign, "https://a/");
    }

    #[test]
    fn test_sign_params_fetch_optional() {
        let params = sign_params([("sign", "https://a/"), ("other", "x")]).unwrap();
        assert_eq!(params.fetch, None);
    }

    #[test]
    fn test_sign_params_rejects_duplicates() {
        assert!(sign_params([("fetch", "a"), ("fetch", "b"), ("sign", "c")]).is_err());
        assert!(sign_params([("sign", "a"), ("sign", "b")]).is_err());
        assert!(sign_params([("fetch", "a")]).is_err());
    }

    #[test]
    fn test_form_pairs_decodes() {
        let pairs = form_pairs(b"fetch=http%3A%2F%2Fa%2Fb%3Fc%3Dd&sign=x+y");
        assert_eq!(
            pairs,
            vec![
                ("fetch".to_string(), "http://a/b?c=d".to_string()),
                ("sign".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn test_request_id_ext_defaults() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(req.request_id(), "unknown");

        let req = Request::builder()
            .header(X_REQUEST_ID, "abc")
            .body(())
            .unwrap();
        assert_eq!(req.request_id(), "abc");
    }
}
