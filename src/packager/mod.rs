//! Signing pipeline.
//!
//! # Data Flow
//! ```text
//! (fetch, sign) strings
//!     → routing (resolve against URL sets)
//!     → fetch the origin (no redirects, bounded time, cancellable)
//!     → cacheability.rs (status 200, shared-cache storable)
//!     → security::headers (hop-by-hop, stateful policy)
//!     → security::limits (bounded body)
//!     → exchange (MI-encode, sign, serialize b0)
//! ```
//!
//! # Design Decisions
//! - Any error short-circuits; nothing is retried
//! - The packager is immutable and shared behind `Arc`
//! - Signatures are backdated one day to tolerate client clock skew

pub mod cacheability;

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::http::header::{self, HeaderMap, HeaderValue};
use p256::ecdsa::SigningKey;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::certs::{Certificates, CERT_URL_PREFIX};
use crate::config::PackagerConfig;
use crate::error::PackagerError;
use crate::exchange::{Exchange, Signer};
use crate::observability::metrics;
use crate::routing::{Resolved, Router};
use crate::security::headers::{sanitize_stateful, strip_hop_by_hop};
use crate::security::limits::{append_bounded, MAX_BODY_LENGTH};

/// Sent on every origin fetch. Should look like a mobile device.
pub const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 5X Build/MMB29P) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/41.0.2272.96 Mobile \
     Safari/537.36 (compatible; sxg-packager; +https://github.com/ampproject/amppackager)";

/// URL a client may consult for updated signature validity.
pub const VALIDITY_URL: &str = "https://cdn.ampproject.org/null-validity";

/// MI record size of the signed payload.
pub const MI_RECORD_SIZE: usize = 4096;

const ONE_DAY_SECS: u64 = 24 * 60 * 60;

/// How far the signature date is backdated.
pub const SIGNATURE_BACKDATE_SECS: u64 = ONE_DAY_SECS;

/// Signature lifetime measured from now. With the backdate the whole window
/// stays within the seven days a signature may cover.
pub const SIGNATURE_LIFETIME_SECS: u64 = 6 * ONE_DAY_SECS;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to build fetch client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid packager_base {base:?}: {source}")]
    PackagerBase {
        base: String,
        #[source]
        source: url::ParseError,
    },

    #[error("url_set.{index}.{role}: {message}")]
    UrlSet {
        index: usize,
        role: String,
        message: String,
    },
}

pub struct Packager {
    certs: Certificates,
    key: SigningKey,
    cert_url: Url,
    validity_url: Url,
    client: reqwest::Client,
    router: Router,
}

impl std::fmt::Debug for Packager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packager")
            .field("cert_url", &self.cert_url.as_str())
            .field("url_sets", &self.router.len())
            .finish_non_exhaustive()
    }
}

impl Packager {
    pub fn new(
        config: &PackagerConfig,
        certs: Certificates,
        key: SigningKey,
    ) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.timeouts.fetch_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(BuildError::Client)?;
        Self::with_client(config, certs, key, client)
    }

    /// Build with a caller-supplied fetch client. The client should not
    /// follow redirects.
    pub fn with_client(
        config: &PackagerConfig,
        certs: Certificates,
        key: SigningKey,
        client: reqwest::Client,
    ) -> Result<Self, BuildError> {
        let router = Router::from_config(&config.url_sets).map_err(|(index, role, e)| {
            BuildError::UrlSet {
                index,
                role: role.to_string(),
                message: e.to_string(),
            }
        })?;

        let cert_url = cert_url(&config.packager_base, certs.name())?;
        let validity_url = Url::parse(VALIDITY_URL).map_err(|source| BuildError::PackagerBase {
            base: VALIDITY_URL.to_string(),
            source,
        })?;

        tracing::info!(
            cert_url = %cert_url,
            url_sets = router.len(),
            "Packager initialized"
        );

        Ok(Self {
            certs,
            key,
            cert_url,
            validity_url,
            client,
            router,
        })
    }

    /// Where the certificate chain used for signing is published.
    pub fn cert_url(&self) -> &Url {
        &self.cert_url
    }

    /// Fetch `fetch`, sign it as `sign`, and return the serialized exchange.
    pub async fn package(
        &self,
        fetch: &str,
        sign: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, PackagerError> {
        let start = Instant::now();
        let result = self.package_inner(fetch, sign, cancel).await;
        let outcome = match &result {
            Ok(_) => "signed",
            Err(e) => e.outcome(),
        };
        metrics::record_request(outcome, start.elapsed());
        result
    }

    async fn package_inner(
        &self,
        fetch: &str,
        sign: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, PackagerError> {
        let resolved = self.router.resolve(fetch, sign)?;
        tracing::debug!(
            fetch = %resolved.fetch_url,
            sign = %resolved.sign_url,
            "Resolved URL pair"
        );

        let (status, headers, body) = tokio::select! {
            fetched = self.fetch(&resolved) => fetched?,
            _ = cancel.cancelled() => return Err(PackagerError::Cancelled),
        };

        let exchange_headers = headers.iter().map(|(name, value)| {
            (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned())
        });
        let mut exchange = Exchange::new(
            &resolved.sign_url,
            status,
            exchange_headers,
            &body,
            MI_RECORD_SIZE,
        )?;

        let now = unix_now()?;
        let signer = Signer {
            date: now.saturating_sub(SIGNATURE_BACKDATE_SECS),
            expires: now + SIGNATURE_LIFETIME_SECS,
            certs: self.certs.chain(),
            cert_url: &self.cert_url,
            validity_url: &self.validity_url,
            key: &self.key,
        };
        exchange.add_signature(&signer)?;
        let bytes = exchange.to_b0()?;

        tracing::info!(
            fetch = %resolved.fetch_url,
            sign = %resolved.sign_url,
            body_bytes = body.len(),
            sxg_bytes = bytes.len(),
            "Signed exchange"
        );
        Ok(bytes)
    }

    /// Fetch and validate the origin response. Returns status, filtered
    /// headers and body.
    async fn fetch(&self, resolved: &Resolved) -> Result<(u16, HeaderMap, Vec<u8>), PackagerError> {
        let url = resolved.fetch_url.as_str();
        let mut response = self
            .client
            .get(resolved.fetch_url.clone())
            .send()
            .await
            .map_err(|e| PackagerError::Upstream(format!("error fetching {url}: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PackagerError::Upstream(format!(
                "non-OK fetch of {url}: {status}"
            )));
        }

        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        let reasons =
            cacheability::non_cacheable_reasons(&request_headers, status, response.headers())
                .map_err(|e| {
                    PackagerError::Upstream(format!("error parsing cache headers of {url}: {e}"))
                })?;
        if !reasons.is_empty() {
            let listed: Vec<String> = reasons.iter().map(ToString::to_string).collect();
            return Err(PackagerError::Upstream(format!(
                "response of {url} is not cacheable by a shared cache: {}",
                listed.join(", ")
            )));
        }

        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        sanitize_stateful(&mut headers, resolved.error_on_stateful_headers).map_err(|found| {
            PackagerError::Upstream(format!(
                "response of {url} has stateful headers: {}",
                found.join(", ")
            ))
        })?;

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PackagerError::Upstream(format!("error reading body of {url}: {e}")))?
        {
            append_bounded(&mut body, &chunk, MAX_BODY_LENGTH).map_err(|total| {
                PackagerError::Upstream(format!(
                    "body of {url} exceeds {MAX_BODY_LENGTH} bytes (read {total})"
                ))
            })?;
        }

        Ok((status.as_u16(), headers, body))
    }
}

/// `{base}amppkg/cert/{name}`. `base` is expected to end with `/`.
pub fn cert_url(base: &str, name: &str) -> Result<Url, BuildError> {
    let parse_err = |source| BuildError::PackagerBase {
        base: base.to_string(),
        source,
    };
    Url::parse(base)
        .and_then(|b| b.join(&format!("{CERT_URL_PREFIX}{name}")))
        .map_err(parse_err)
}

fn unix_now() -> Result<u64, PackagerError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| PackagerError::Internal(format!("system clock before epoch: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_url_joins_base() {
        let url = cert_url("https://example.com/", "abc_-=").unwrap();
        assert_eq!(url.as_str(), "https://example.com/amppkg/cert/abc_-=");

        let url = cert_url("https://example.com/pkg/", "n").unwrap();
        assert_eq!(url.as_str(), "https://example.com/pkg/amppkg/cert/n");
    }

    #[test]
    fn test_cert_url_rejects_relative_base() {
        assert!(matches!(
            cert_url("example.com/", "n"),
            Err(BuildError::PackagerBase { .. })
        ));
    }

    #[test]
    fn test_signature_window_within_seven_days() {
        assert!(SIGNATURE_BACKDATE_SECS + SIGNATURE_LIFETIME_SECS <= 7 * ONE_DAY_SECS);
    }
}
