//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the packager.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the packager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Port to listen on.
    pub port: u16,

    /// Bind to the loopback interface only.
    pub local_only: bool,

    /// The base URL under which `amppkg/` URLs are served on the internet.
    /// Normalized to end with `/` during validation.
    pub packager_base: String,

    /// PEM file holding the full certificate chain, leaf first.
    pub cert_file: String,

    /// PEM file holding the P-256 private key of the leaf certificate.
    pub key_file: String,

    /// Where the certificate-chain message is persisted. When unset, the
    /// chain is served from memory.
    pub cert_cache_file: Option<String>,

    /// Ordered URL sets. The first set matching a request wins.
    #[serde(rename = "url_set")]
    pub url_sets: Vec<UrlSetConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Runtime version cache settings.
    pub rtv: RtvConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            local_only: false,
            packager_base: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            cert_cache_file: None,
            url_sets: Vec::new(),
            timeouts: TimeoutConfig::default(),
            rtv: RtvConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl PackagerConfig {
    /// Address the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        let host = if self.local_only { "127.0.0.1" } else { "0.0.0.0" };
        format!("{}:{}", host, self.port)
    }
}

/// A pair of patterns describing which fetch URLs may be signed as which
/// sign URLs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UrlSetConfig {
    /// Require the fetch and sign URLs to share path and query.
    #[serde(default = "default_same_path")]
    pub same_path: bool,

    /// Pattern the fetch URL must match.
    pub fetch: UrlPatternConfig,

    /// Pattern the sign URL must match.
    pub sign: UrlPatternConfig,
}

fn default_same_path() -> bool {
    true
}

/// A single URL pattern as written in the config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UrlPatternConfig {
    /// Allowed schemes. Empty means every scheme allowed for the role.
    pub scheme: Vec<String>,

    /// Exact host (with port, if any) the URL must have.
    pub domain: String,

    /// Regex the escaped path must fully match. Defaults to `.*`.
    pub path_re: Option<String>,

    /// Regexes the escaped path must not fully match.
    pub path_exclude_re: Vec<String>,

    /// Regex the raw query must fully match. Defaults to `.*`.
    pub query_re: Option<String>,

    /// Reject responses carrying stateful headers instead of stripping them.
    /// Only meaningful on the fetch pattern.
    pub error_on_stateful_headers: bool,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overall timeout for fetching the resource to sign, in seconds.
    pub fetch_secs: u64,

    /// Total time allowed to serve one inbound request, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: 60,
            request_secs: 120,
        }
    }
}

/// Runtime version cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RtvConfig {
    /// Populate and refresh the cache.
    pub enabled: bool,

    /// Host serving `/v0/version.txt` and `/rtv/{version}/v0.css`.
    pub host: String,

    /// Refresh interval in seconds.
    pub poll_interval_secs: u64,

    /// Timeout for each fetch, in seconds.
    pub timeout_secs: u64,
}

impl Default for RtvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "https://cdn.ampproject.org".to_string(),
            poll_interval_secs: 3600,
            timeout_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
