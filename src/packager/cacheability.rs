//! Shared-cache storability (RFC 7234 §3).
//!
//! Only a response a shared cache may store can be signed, since the
//! resulting exchange is served to arbitrary third parties.

use std::fmt;

use axum::http::header::{HeaderMap, AUTHORIZATION, CACHE_CONTROL, EXPIRES};
use axum::http::StatusCode;
use thiserror::Error;

/// Directives whose value must be delta-seconds.
const NUMERIC_DIRECTIVES: &[&str] = &["max-age", "s-maxage", "min-fresh"];

/// Status codes a cache may store without explicit freshness (RFC 7231 §6.1).
const CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheControlError {
    #[error("directive {directive} requires delta-seconds, got {value:?}")]
    InvalidDeltaSeconds { directive: String, value: String },

    #[error("header is not valid ASCII")]
    NotAscii,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonCacheableReason {
    RequestNoStore,
    RequestAuthorization,
    ResponseNoStore,
    ResponsePrivate,
    UncacheableByDefault,
}

impl fmt::Display for NonCacheableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NonCacheableReason::RequestNoStore => "request has no-store",
            NonCacheableReason::RequestAuthorization => "request has Authorization",
            NonCacheableReason::ResponseNoStore => "response has no-store",
            NonCacheableReason::ResponsePrivate => "response is private",
            NonCacheableReason::UncacheableByDefault => {
                "response status is not cacheable by default and has no explicit freshness"
            }
        })
    }
}

/// Parsed `Cache-Control` directives, names lowercased.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<(String, Option<String>)>,
}

impl CacheControl {
    /// Parse every `Cache-Control` value in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CacheControlError> {
        let mut directives = Vec::new();
        for value in headers.get_all(CACHE_CONTROL) {
            let value = value.to_str().map_err(|_| CacheControlError::NotAscii)?;
            for token in split_unquoted(value) {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                let (name, arg) = match token.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"').to_string())),
                    None => (token, None),
                };
                let name = name.to_ascii_lowercase();
                if NUMERIC_DIRECTIVES.contains(&name.as_str()) {
                    let valid = arg.as_deref().is_some_and(|a| a.parse::<u64>().is_ok());
                    if !valid {
                        return Err(CacheControlError::InvalidDeltaSeconds {
                            directive: name,
                            value: arg.unwrap_or_default(),
                        });
                    }
                }
                directives.push((name, arg));
            }
        }
        Ok(Self { directives })
    }

    pub fn has(&self, name: &str) -> bool {
        self.directives.iter().any(|(n, _)| n == name)
    }
}

/// Reasons a shared cache must not store this response. Empty means
/// storable.
pub fn non_cacheable_reasons(
    request_headers: &HeaderMap,
    status: StatusCode,
    response_headers: &HeaderMap,
) -> Result<Vec<NonCacheableReason>, CacheControlError> {
    let request = CacheControl::from_headers(request_headers)?;
    let response = CacheControl::from_headers(response_headers)?;
    let mut reasons = Vec::new();

    if request.has("no-store") {
        reasons.push(NonCacheableReason::RequestNoStore);
    }
    if response.has("no-store") {
        reasons.push(NonCacheableReason::ResponseNoStore);
    }
    if response.has("private") {
        reasons.push(NonCacheableReason::ResponsePrivate);
    }
    if request_headers.contains_key(AUTHORIZATION)
        && !(response.has("must-revalidate") || response.has("public") || response.has("s-maxage"))
    {
        reasons.push(NonCacheableReason::RequestAuthorization);
    }

    let explicit = response_headers.contains_key(EXPIRES)
        || response.has("max-age")
        || response.has("s-maxage")
        || response.has("public");
    if !explicit && !CACHEABLE_BY_DEFAULT.contains(&status.as_u16()) {
        reasons.push(NonCacheableReason::UncacheableByDefault);
    }

    Ok(reasons)
}

/// Split on commas that are not inside a quoted string.
fn split_unquoted(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_cache_control(value: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CACHE_CONTROL, HeaderValue::from_static(value));
        h
    }

    #[test]
    fn test_plain_200_is_storable() {
        let reasons =
            non_cacheable_reasons(&HeaderMap::new(), StatusCode::OK, &HeaderMap::new()).unwrap();
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_public_max_age_is_storable() {
        let reasons = non_cacheable_reasons(
            &HeaderMap::new(),
            StatusCode::OK,
            &with_cache_control("public, max-age=3600"),
        )
        .unwrap();
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_private_and_no_store() {
        let reasons = non_cacheable_reasons(
            &HeaderMap::new(),
            StatusCode::OK,
            &with_cache_control("private, No-Store"),
        )
        .unwrap();
        assert_eq!(
            reasons,
            vec![NonCacheableReason::ResponseNoStore, NonCacheableReason::ResponsePrivate]
        );
    }

    #[test]
    fn test_private_with_field_names() {
        let reasons = non_cacheable_reasons(
            &HeaderMap::new(),
            StatusCode::OK,
            &with_cache_control("private=\"set-cookie, x-user\", max-age=60"),
        )
        .unwrap();
        assert_eq!(reasons, vec![NonCacheableReason::ResponsePrivate]);
    }

    #[test]
    fn test_authorization_requires_explicit_permission() {
        let mut request = HeaderMap::new();
        request.insert(AUTHORIZATION, HeaderValue::from_static("Bearer x"));

        let reasons = non_cacheable_reasons(&request, StatusCode::OK, &HeaderMap::new()).unwrap();
        assert_eq!(reasons, vec![NonCacheableReason::RequestAuthorization]);

        let reasons =
            non_cacheable_reasons(&request, StatusCode::OK, &with_cache_control("s-maxage=60"))
                .unwrap();
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_malformed_delta_seconds() {
        let err = non_cacheable_reasons(
            &HeaderMap::new(),
            StatusCode::OK,
            &with_cache_control("max-age=soon"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CacheControlError::InvalidDeltaSeconds {
                directive: "max-age".to_string(),
                value: "soon".to_string(),
            }
        );
        assert!(CacheControl::from_headers(&with_cache_control("s-maxage")).is_err());
    }

    #[test]
    fn test_uncacheable_status_without_freshness() {
        let reasons =
            non_cacheable_reasons(&HeaderMap::new(), StatusCode::CREATED, &HeaderMap::new())
                .unwrap();
        assert_eq!(reasons, vec![NonCacheableReason::UncacheableByDefault]);
    }
}
