//! Serves the certificate chain under its public name.
//!
//! When a cache file is configured the chain message is read through the
//! [`Updateable`] store, so every process sharing the file serves the same
//! bytes and a process started with a rotated certificate rewrites it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::certs::{CertError, Certificates};
use crate::observability::metrics;
use crate::storage::{StorageError, Updateable};

/// Cache lifetime of the served chain, in seconds.
pub const CHAIN_MAX_AGE_SECS: u64 = 604_800;

#[derive(Clone)]
pub struct CertResponder {
    name: String,
    message: Arc<Vec<u8>>,
    store: Option<Arc<dyn Updateable>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CertResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertResponder")
            .field("name", &self.name)
            .field("message_bytes", &self.message.len())
            .field("persisted", &self.store.is_some())
            .finish()
    }
}

impl CertResponder {
    pub fn new(
        certs: &Certificates,
        store: Option<Arc<dyn Updateable>>,
        cancel: CancellationToken,
    ) -> Result<Self, CertError> {
        Ok(Self {
            name: certs.name().to_string(),
            message: Arc::new(certs.chain_message()?),
            store,
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The quoted entity tag of the chain.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.name)
    }

    /// The chain message for `name`, or `None` if no such certificate is
    /// served here.
    pub async fn lookup(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if name != self.name {
            return Ok(None);
        }
        let Some(store) = self.store.clone() else {
            return Ok(Some(self.message.as_ref().clone()));
        };

        let expected = Arc::clone(&self.message);
        let cancel = self.cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            store.read(
                &cancel,
                &|stored: &[u8]| stored != expected.as_slice(),
                &|previous: &[u8]| {
                    tracing::info!(
                        previous_bytes = previous.len(),
                        bytes = expected.len(),
                        "Writing certificate chain to cache file"
                    );
                    expected.as_ref().clone()
                },
            )
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        metrics::record_cert_store_read(match &result {
            Ok(_) => "ok",
            Err(StorageError::Contention(_)) => "contention",
            Err(StorageError::Cancelled) => "cancelled",
            Err(StorageError::Io(_)) => "error",
        });
        result.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFile;

    fn certs() -> Certificates {
        Certificates::from_der(vec![b"leaf".to_vec(), b"intermediate".to_vec()]).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_name() {
        let responder = CertResponder::new(&certs(), None, CancellationToken::new()).unwrap();
        assert_eq!(responder.lookup("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let certs = certs();
        let responder = CertResponder::new(&certs, None, CancellationToken::new()).unwrap();
        let body = responder.lookup(certs.name()).await.unwrap().unwrap();
        assert_eq!(body, certs.chain_message().unwrap());
        assert_eq!(responder.etag(), format!("\"{}\"", certs.name()));
    }

    #[tokio::test]
    async fn test_store_backed_lookup_rewrites_stale_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain");
        std::fs::write(&path, b"chain from an old certificate").unwrap();

        let certs = certs();
        let store: Arc<dyn Updateable> = Arc::new(LocalFile::new(&path));
        let responder = CertResponder::new(&certs, Some(store), CancellationToken::new()).unwrap();

        let body = responder.lookup(certs.name()).await.unwrap().unwrap();
        assert_eq!(body, certs.chain_message().unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), body);

        // Second read finds it fresh.
        assert_eq!(responder.lookup(certs.name()).await.unwrap().unwrap(), body);
    }

    #[tokio::test]
    async fn test_cancelled_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Updateable> = Arc::new(LocalFile::new(dir.path().join("chain")));
        let cancel = CancellationToken::new();
        let certs = certs();
        let responder = CertResponder::new(&certs, Some(store), cancel.clone()).unwrap();

        cancel.cancel();
        assert!(matches!(
            responder.lookup(certs.name()).await,
            Err(StorageError::Cancelled)
        ));
    }
}
