//! Response header sanitization.
//!
//! # Responsibilities
//! - Reject or strip stateful headers before they are signed
//! - Strip hop-by-hop headers, including those named by `Connection`
//!
//! # Design Decisions
//! - Stateful headers are always stripped; the policy flag only decides
//!   whether their presence is an error first
//! - Header names compare case-insensitively (`HeaderName` is lowercase)

use axum::http::header::{self, HeaderMap, HeaderName};

/// Headers that establish or reflect session or authentication state, and so
/// must not be replayed to arbitrary third parties.
pub const STATEFUL_HEADERS: &[&str] = &[
    "authentication-control",
    "authentication-info",
    "optional-www-authenticate",
    "proxy-authenticate",
    "proxy-authentication-info",
    "sec-websocket-accept",
    "set-cookie",
    "set-cookie2",
    "setprofile",
    "www-authenticate",
];

/// Headers meaningful only for a single transport-level connection.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Stateful headers present in `headers`, in deny-list order.
pub fn stateful_headers_present(headers: &HeaderMap) -> Vec<&'static str> {
    STATEFUL_HEADERS
        .iter()
        .copied()
        .filter(|name| headers.contains_key(*name))
        .collect()
}

/// Apply the stateful-header policy. Returns the offending names when
/// `error_on_stateful` is set and any are present; otherwise strips them.
pub fn sanitize_stateful(
    headers: &mut HeaderMap,
    error_on_stateful: bool,
) -> Result<(), Vec<&'static str>> {
    let present = stateful_headers_present(headers);
    if error_on_stateful && !present.is_empty() {
        return Err(present);
    }
    for name in present {
        headers.remove(name);
    }
    Ok(())
}

/// Remove hop-by-hop headers and every header listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(*v));
        }
        map
    }

    #[test]
    fn test_clean_response_never_errors() {
        for flag in [true, false] {
            let mut h = headers(&[("content-type", "text/html"), ("cache-control", "max-age=60")]);
            assert!(sanitize_stateful(&mut h, flag).is_ok());
            assert_eq!(h.len(), 2);
        }
    }

    #[test]
    fn test_set_cookie_with_error_flag() {
        let mut h = headers(&[("set-cookie", "a=b"), ("www-authenticate", "Basic")]);
        let err = sanitize_stateful(&mut h, true).unwrap_err();
        assert_eq!(err, vec!["set-cookie", "www-authenticate"]);
    }

    #[test]
    fn test_stateful_stripped_without_flag() {
        let mut h = headers(&[
            ("set-cookie", "a=b"),
            ("set-cookie", "c=d"),
            ("content-type", "text/html"),
        ]);
        sanitize_stateful(&mut h, false).unwrap();
        assert!(!h.contains_key("set-cookie"));
        assert!(h.contains_key("content-type"));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut h = headers(&[
            ("connection", "close, x-internal"),
            ("x-internal", "1"),
            ("keep-alive", "timeout=5"),
            ("transfer-encoding", "chunked"),
            ("content-type", "text/html"),
        ]);
        strip_hop_by_hop(&mut h);
        assert_eq!(h.len(), 1);
        assert!(h.contains_key("content-type"));
    }
}
