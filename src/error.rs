//! Request-level error taxonomy.
//!
//! Every failure on the signing and certificate paths ends up as a
//! [`PackagerError`]; `http::response` maps it to a status code.

use thiserror::Error;

use crate::certs::CertError;
use crate::exchange::ExchangeError;
use crate::routing::ResolveError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum PackagerError {
    /// The caller sent something unusable.
    #[error("client error: {0}")]
    Client(String),

    /// The origin fetch failed or returned something that cannot be signed.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A retryable condition such as store lock contention.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,
}

impl PackagerError {
    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            PackagerError::Client(_) => "client_error",
            PackagerError::Upstream(_) => "upstream_error",
            PackagerError::Internal(_) => "internal_error",
            PackagerError::Unavailable(_) => "unavailable",
            PackagerError::Cancelled => "cancelled",
        }
    }
}

impl From<ResolveError> for PackagerError {
    fn from(e: ResolveError) -> Self {
        PackagerError::Client(e.to_string())
    }
}

impl From<StorageError> for PackagerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Contention(msg) => PackagerError::Unavailable(msg),
            StorageError::Cancelled => PackagerError::Cancelled,
            StorageError::Io(e) => PackagerError::Internal(e.to_string()),
        }
    }
}

impl From<ExchangeError> for PackagerError {
    fn from(e: ExchangeError) -> Self {
        PackagerError::Internal(e.to_string())
    }
}

impl From<CertError> for PackagerError {
    fn from(e: CertError) -> Self {
        PackagerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Role;

    #[test]
    fn test_storage_contention_is_unavailable() {
        let err: PackagerError = StorageError::Contention("locked".into()).into();
        assert!(matches!(err, PackagerError::Unavailable(_)));
        assert_eq!(err.outcome(), "unavailable");

        let err: PackagerError = StorageError::Cancelled.into();
        assert!(matches!(err, PackagerError::Cancelled));
    }

    #[test]
    fn test_resolve_errors_are_client_errors() {
        let err: PackagerError = ResolveError::Unspecified(Role::Sign).into();
        assert!(matches!(err, PackagerError::Client(_)));
        let err: PackagerError = ResolveError::NoMatch.into();
        assert_eq!(err.to_string(), "client error: fetch/sign URLs do not match config");
    }
}
