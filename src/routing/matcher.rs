//! URL pattern matching logic.
//!
//! # Responsibilities
//! - Match scheme against an allowed set
//! - Match host (with port) exactly, no wildcards. The configured domain is
//!   lowercased and an explicit port is compared against the URL's
//!   effective port, so `example.test:443` matches `https://example.test/`
//! - Match escaped path and raw query against fully-anchored regexes
//! - Reject userinfo and opaque (cannot-be-a-base) URLs
//!
//! # Design Decisions
//! - Regexes are compiled once, when the config is loaded
//! - Every regex is wrapped as `\A(?:re)\z`, so a partial match never passes
//!   even when the configured expression is unanchored
//! - An empty query is matched as the empty string

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::config::schema::UrlPatternConfig;

/// Regex used when `path_re` or `query_re` is omitted.
pub const MATCH_ANYTHING: &str = ".*";

/// Which side of a URL set a pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The URL the packager fetches from.
    Fetch,
    /// The URL the exchange is signed as.
    Sign,
}

impl Role {
    /// Schemes a pattern in this role may list. Also the default list.
    pub fn allowed_schemes(self) -> &'static [&'static str] {
        match self {
            Role::Fetch => &["http", "https"],
            Role::Sign => &["https"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Fetch => "fetch",
            Role::Sign => "sign",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while compiling a pattern from config.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("scheme contains invalid value {0:?}")]
    InvalidScheme(String),

    #[error("domain must be specified")]
    MissingDomain,

    #[error("domain {0:?} is not a host with an optional numeric port")]
    InvalidDomain(String),

    #[error("{field} contains invalid regexp {pattern:?}: {source}")]
    InvalidRegex {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled, immutable URL pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    schemes: Vec<String>,
    domain: String,
    host: String,
    port: Option<u16>,
    path: Regex,
    path_exclude: Vec<Regex>,
    query: Regex,
    error_on_stateful_headers: bool,
}

impl UrlPattern {
    /// Compile a pattern for the given role, applying defaults for omitted
    /// fields.
    pub fn compile(config: &UrlPatternConfig, role: Role) -> Result<Self, PatternError> {
        let allowed = role.allowed_schemes();
        let schemes = if config.scheme.is_empty() {
            allowed.iter().map(|s| s.to_string()).collect()
        } else {
            for scheme in &config.scheme {
                if !allowed.contains(&scheme.as_str()) {
                    return Err(PatternError::InvalidScheme(scheme.clone()));
                }
            }
            config.scheme.clone()
        };

        if config.domain.is_empty() {
            return Err(PatternError::MissingDomain);
        }
        let (host, port) = split_domain(&config.domain)?;

        let path = full_match_regex(
            "path_re",
            config.path_re.as_deref().unwrap_or(MATCH_ANYTHING),
        )?;
        let path_exclude = config
            .path_exclude_re
            .iter()
            .map(|re| full_match_regex("path_exclude_re", re))
            .collect::<Result<Vec<_>, _>>()?;
        let query = full_match_regex(
            "query_re",
            config.query_re.as_deref().unwrap_or(MATCH_ANYTHING),
        )?;

        Ok(Self {
            schemes,
            domain: config.domain.to_ascii_lowercase(),
            host,
            port,
            path,
            path_exclude,
            query,
            error_on_stateful_headers: config.error_on_stateful_headers,
        })
    }

    /// Returns true if the URL satisfies every condition of this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        if !self.schemes.iter().any(|s| s == url.scheme()) {
            return false;
        }
        if url.cannot_be_a_base() {
            return false;
        }
        if !url.username().is_empty() || url.password().is_some() {
            return false;
        }
        if url.host_str() != Some(self.host.as_str()) {
            return false;
        }
        // No port in the domain means the scheme default.
        let expected = self.port.or_else(|| default_port(url.scheme()));
        if url.port_or_known_default() != expected {
            return false;
        }
        let path = url.path();
        if !self.path.is_match(path) {
            return false;
        }
        if self.path_exclude.iter().any(|re| re.is_match(path)) {
            return false;
        }
        self.query.is_match(url.query().unwrap_or(""))
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn error_on_stateful_headers(&self) -> bool {
        self.error_on_stateful_headers
    }
}

fn full_match_regex(field: &'static str, pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(&format!(r"\A(?:{})\z", pattern)).map_err(|source| PatternError::InvalidRegex {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

/// Split `host[:port]` into a lowercased host and its port, if any.
/// Bracketed IPv6 hosts keep their brackets, matching `Url::host_str`.
fn split_domain(domain: &str) -> Result<(String, Option<u16>), PatternError> {
    let invalid = || PatternError::InvalidDomain(domain.to_string());
    let (host, port) = match domain.rsplit_once(':') {
        Some((host, port)) if !domain.ends_with(']') => {
            (host, Some(port.parse::<u16>().map_err(|_| invalid())?))
        }
        _ => (domain, None),
    };
    if host.is_empty() || host.contains(['/', '@', '?', '#']) {
        return Err(invalid());
    }
    Ok((host.to_ascii_lowercase(), port))
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Path plus `?query` whenever the URL has a query, even an empty one, so
/// `/a?` and `/a` are different request-URIs.
pub fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
