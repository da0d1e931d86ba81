//! URL set lookup.
//!
//! # Responsibilities
//! - Store compiled URL sets in configuration order
//! - Parse the inbound `fetch` and `sign` parameters
//! - Return the first matching set's stateful-header policy, or an explicit
//!   no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - First match wins; reordering `[[url_set]]` entries changes behavior
//! - Dot segments are resolved by the URL parser before matching, so
//!   `/amp/../secret` cannot slip past a path regex

use thiserror::Error;
use url::Url;

use crate::config::schema::UrlSetConfig;
use crate::routing::matcher::{request_uri, PatternError, Role, UrlPattern};

/// Errors produced while resolving the inbound URL pair. All of them are the
/// client's fault.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0} URL is unspecified")]
    Unspecified(Role),

    #[error("error parsing {role} URL: {source}")]
    Parse {
        role: Role,
        #[source]
        source: url::ParseError,
    },

    #[error("{0} URL is relative")]
    Relative(Role),

    #[error("fetch/sign URLs do not match config")]
    NoMatch,
}

/// A compiled `[[url_set]]` entry.
#[derive(Debug, Clone)]
pub struct UrlSet {
    same_path: bool,
    fetch: UrlPattern,
    sign: UrlPattern,
}

impl UrlSet {
    pub fn compile(config: &UrlSetConfig) -> Result<Self, (Role, PatternError)> {
        Ok(Self {
            same_path: config.same_path,
            fetch: UrlPattern::compile(&config.fetch, Role::Fetch).map_err(|e| (Role::Fetch, e))?,
            sign: UrlPattern::compile(&config.sign, Role::Sign).map_err(|e| (Role::Sign, e))?,
        })
    }

    /// Both URLs match their role, and share a request-URI when `same_path`
    /// is set.
    pub fn urls_match(&self, fetch: &Url, sign: &Url) -> bool {
        self.fetch.matches(fetch)
            && self.sign.matches(sign)
            && (!self.same_path || request_uri(fetch) == request_uri(sign))
    }

    pub fn fetch(&self) -> &UrlPattern {
        &self.fetch
    }

    pub fn sign(&self) -> &UrlPattern {
        &self.sign
    }
}

/// The outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub fetch_url: Url,
    pub sign_url: Url,
    pub error_on_stateful_headers: bool,
}

/// Ordered collection of URL sets.
#[derive(Debug, Clone)]
pub struct Router {
    url_sets: Vec<UrlSet>,
}

impl Router {
    /// Compile every set, keeping configuration order.
    pub fn from_config(configs: &[UrlSetConfig]) -> Result<Self, (usize, Role, PatternError)> {
        let url_sets = configs
            .iter()
            .enumerate()
            .map(|(i, c)| UrlSet::compile(c).map_err(|(role, e)| (i, role, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { url_sets })
    }

    pub fn new(url_sets: Vec<UrlSet>) -> Self {
        Self { url_sets }
    }

    /// Parse both URLs and find the first set allowing the pair.
    pub fn resolve(&self, fetch: &str, sign: &str) -> Result<Resolved, ResolveError> {
        let fetch_url = parse_url(fetch, Role::Fetch)?;
        let sign_url = parse_url(sign, Role::Sign)?;

        let set = self
            .url_sets
            .iter()
            .find(|set| set.urls_match(&fetch_url, &sign_url))
            .ok_or(ResolveError::NoMatch)?;

        Ok(Resolved {
            error_on_stateful_headers: set.fetch.error_on_stateful_headers(),
            fetch_url,
            sign_url,
        })
    }

    pub fn len(&self) -> usize {
        self.url_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.url_sets.is_empty()
    }
}

fn parse_url(raw: &str, role: Role) -> Result<Url, ResolveError> {
    if raw.is_empty() {
        return Err(ResolveError::Unspecified(role));
    }
    Url::parse(raw).map_err(|source| match source {
        url::ParseError::RelativeUrlWithoutBase => ResolveError::Relative(role),
        source => ResolveError::Parse { role, source },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::UrlPatternConfig;

    fn set(fetch_domain: &str, sign_domain: &str, stateful: bool) -> UrlSetConfig {
        UrlSetConfig {
            same_path: true,
            fetch: UrlPatternConfig {
                domain: fetch_domain.to_string(),
                path_re: Some("/amp/.*".to_string()),
                error_on_stateful_headers: stateful,
                ..Default::default()
            },
            sign: UrlPatternConfig {
                domain: sign_domain.to_string(),
                path_re: Some("/amp/.*".to_string()),
                ..Default::default()
            },
        }
    }

    fn router(sets: &[UrlSetConfig]) -> Router {
        Router::from_config(sets).unwrap()
    }

    #[test]
    fn test_resolve_match() {
        let r = router(&[set("origin.test", "example.test", false)]);
        let resolved = r
            .resolve("http://origin.test/amp/a.html", "https://example.test/amp/a.html")
            .unwrap();
        assert_eq!(resolved.sign_url.as_str(), "https://example.test/amp/a.html");
        assert!(!resolved.error_on_stateful_headers);
    }

    #[test]
    fn test_same_path_requires_identical_request_uri() {
        let r = router(&[set("origin.test", "example.test", false)]);
        assert!(r
            .resolve("http://origin.test/amp/a.html?x=1", "https://example.test/amp/a.html?x=1")
            .is_ok());
        assert!(matches!(
            r.resolve("http://origin.test/amp/a.html", "https://example.test/amp/b.html"),
            Err(ResolveError::NoMatch)
        ));
        assert!(matches!(
            r.resolve("http://origin.test/amp/a.html?x=1", "https://example.test/amp/a.html?x=2"),
            Err(ResolveError::NoMatch)
        ));
        assert!(matches!(
            r.resolve("http://origin.test/amp/a.html?", "https://example.test/amp/a.html"),
            Err(ResolveError::NoMatch)
        ));
    }

    #[test]
    fn test_same_path_disabled() {
        let mut config = set("origin.test", "example.test", false);
        config.same_path = false;
        let r = router(&[config]);
        assert!(r
            .resolve("http://origin.test/amp/a.html", "https://example.test/amp/b.html")
            .is_ok());
    }

    #[test]
    fn test_first_match_wins() {
        let r = router(&[
            set("origin.test", "example.test", true),
            set("origin.test", "example.test", false),
        ]);
        let resolved = r
            .resolve("http://origin.test/amp/a.html", "https://example.test/amp/a.html")
            .unwrap();
        assert!(resolved.error_on_stateful_headers);

        let reordered = router(&[
            set("origin.test", "example.test", false),
            set("origin.test", "example.test", true),
        ]);
        let resolved = reordered
            .resolve("http://origin.test/amp/a.html", "https://example.test/amp/a.html")
            .unwrap();
        assert!(!resolved.error_on_stateful_headers);
    }

    #[test]
    fn test_falls_through_to_later_set() {
        let r = router(&[
            set("other.test", "other.test", true),
            set("origin.test", "example.test", false),
        ]);
        let resolved = r
            .resolve("http://origin.test/amp/a.html", "https://example.test/amp/a.html")
            .unwrap();
        assert!(!resolved.error_on_stateful_headers);
    }

    #[test]
    fn test_empty_and_relative_are_client_errors() {
        let r = router(&[set("origin.test", "example.test", false)]);
        assert!(matches!(
            r.resolve("", "https://example.test/amp/a.html"),
            Err(ResolveError::Unspecified(Role::Fetch))
        ));
        assert!(matches!(
            r.resolve("http://origin.test/amp/a.html", ""),
            Err(ResolveError::Unspecified(Role::Sign))
        ));
        assert!(matches!(
            r.resolve("/amp/a.html", "https://example.test/amp/a.html"),
            Err(ResolveError::Relative(Role::Fetch))
        ));
        assert!(matches!(
            r.resolve("http://origin.test/amp/a.html", "amp/a.html"),
            Err(ResolveError::Relative(Role::Sign))
        ));
        assert!(matches!(
            r.resolve("http://[::1", "https://example.test/amp/a.html"),
            Err(ResolveError::Parse { role: Role::Fetch, .. })
        ));
    }

    #[test]
    fn test_dot_segments_resolved_before_matching() {
        let mut config = set("origin.test", "example.test", false);
        config.fetch.path_exclude_re = vec!["/secret/.*".to_string()];
        config.fetch.path_re = Some(".*".to_string());
        config.sign.path_re = Some(".*".to_string());
        let r = router(&[config]);
        assert!(matches!(
            r.resolve(
                "http://origin.test/amp/../secret/x",
                "https://example.test/amp/../secret/x"
            ),
            Err(ResolveError::NoMatch)
        ));
    }

    #[test]
    fn test_sign_must_be_https() {
        let r = router(&[set("example.test", "example.test", false)]);
        assert!(matches!(
            r.resolve("http://example.test/amp/a.html", "http://example.test/amp/a.html"),
            Err(ResolveError::NoMatch)
        ));
    }
}
