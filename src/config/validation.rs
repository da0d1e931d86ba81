//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Require the certificate, key and at least one URL set
//! - Normalize `packager_base` to an absolute URL ending in `/`
//! - Compile every URL pattern so bad regexes fail at startup
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::fmt;

use url::Url;

use crate::config::schema::PackagerConfig;
use crate::routing::matcher::{PatternError, Role};
use crate::routing::UrlSet;

/// A single semantic problem with the config.
#[derive(Debug)]
pub enum ValidationError {
    MissingField(&'static str),
    NoUrlSets,
    InvalidPackagerBase(String),
    UrlSet {
        index: usize,
        role: Role,
        source: PatternError,
    },
    SignStatefulHeaders(usize),
    ZeroTimeout(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "must specify {}", field),
            ValidationError::NoUrlSets => write!(f, "must specify one or more [[url_set]]"),
            ValidationError::InvalidPackagerBase(reason) => {
                write!(f, "packager_base is invalid: {}", reason)
            }
            ValidationError::UrlSet { index, role, source } => {
                write!(f, "url_set.{}.{}: {}", index, role, source)
            }
            ValidationError::SignStatefulHeaders(index) => write!(
                f,
                "url_set.{}.sign: error_on_stateful_headers is not allowed; \
                 perhaps you meant to put this in the fetch section?",
                index
            ),
            ValidationError::ZeroTimeout(field) => write!(f, "{} must be greater than zero", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check the config and normalize it in place.
pub fn validate_config(config: &mut PackagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cert_file.is_empty() {
        errors.push(ValidationError::MissingField("cert_file"));
    }
    if config.key_file.is_empty() {
        errors.push(ValidationError::MissingField("key_file"));
    }

    if config.packager_base.is_empty() {
        errors.push(ValidationError::MissingField("packager_base"));
    } else {
        match normalize_packager_base(&config.packager_base) {
            Ok(base) => config.packager_base = base,
            Err(reason) => errors.push(ValidationError::InvalidPackagerBase(reason)),
        }
    }

    if config.url_sets.is_empty() {
        errors.push(ValidationError::NoUrlSets);
    }
    for (index, set) in config.url_sets.iter().enumerate() {
        if set.sign.error_on_stateful_headers {
            errors.push(ValidationError::SignStatefulHeaders(index));
        }
        if let Err((role, source)) = UrlSet::compile(set) {
            errors.push(ValidationError::UrlSet { index, role, source });
        }
    }

    if config.timeouts.fetch_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.fetch_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.request_secs"));
    }
    if config.rtv.enabled {
        if config.rtv.poll_interval_secs == 0 {
            errors.push(ValidationError::ZeroTimeout("rtv.poll_interval_secs"));
        }
        if config.rtv.timeout_secs == 0 {
            errors.push(ValidationError::ZeroTimeout("rtv.timeout_secs"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn normalize_packager_base(raw: &str) -> Result<String, String> {
    let mut base = raw.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let url = Url::parse(&base).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(base),
        other => Err(format!("unsupported scheme {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{UrlPatternConfig, UrlSetConfig};

    fn valid() -> PackagerConfig {
        PackagerConfig {
            packager_base: "https://packager.test".to_string(),
            cert_file: "cert.pem".to_string(),
            key_file: "key.pem".to_string(),
            url_sets: vec![UrlSetConfig {
                same_path: true,
                fetch: UrlPatternConfig {
                    domain: "example.test".to_string(),
                    ..Default::default()
                },
                sign: UrlPatternConfig {
                    domain: "example.test".to_string(),
                    ..Default::default()
                },
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_normalizes_base() {
        let mut config = valid();
        validate_config(&mut config).unwrap();
        assert_eq!(config.packager_base, "https://packager.test/");

        // Idempotent on an already-normalized base.
        validate_config(&mut config).unwrap();
        assert_eq!(config.packager_base, "https://packager.test/");
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = PackagerConfig::default();
        let errors = validate_config(&mut config).unwrap_err();
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(messages.contains(&"must specify cert_file".to_string()));
        assert!(messages.contains(&"must specify key_file".to_string()));
        assert!(messages.contains(&"must specify packager_base".to_string()));
        assert!(messages.contains(&"must specify one or more [[url_set]]".to_string()));
    }

    #[test]
    fn test_rejects_non_http_base() {
        let mut config = valid();
        config.packager_base = "ftp://packager.test/".to_string();
        let errors = validate_config(&mut config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidPackagerBase(_)));
    }

    #[test]
    fn test_sign_stateful_headers_hint() {
        let mut config = valid();
        config.url_sets[0].sign.error_on_stateful_headers = true;
        let errors = validate_config(&mut config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .to_string()
            .contains("perhaps you meant to put this in the fetch section?"));
    }

    #[test]
    fn test_bad_pattern_reports_set_and_role() {
        let mut config = valid();
        config.url_sets[0].sign.scheme = vec!["http".to_string()];
        let errors = validate_config(&mut config).unwrap_err();
        assert!(matches!(
            errors[0],
            ValidationError::UrlSet { index: 0, role: Role::Sign, .. }
        ));
        assert!(errors[0].to_string().starts_with("url_set.0.sign:"));
    }

    #[test]
    fn test_zero_timeouts() {
        let mut config = valid();
        config.timeouts.fetch_secs = 0;
        config.rtv.poll_interval_secs = 0;
        let errors = validate_config(&mut config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
