//! Read-mostly, update-rarely blob storage.
//!
//! # Data Flow
//! ```text
//! read(cancel, is_expired, update)
//!     → shared lock (non-blocking)       ── busy → Contention
//!     → read contents (missing = empty)
//!     → cancelled?                       ── yes  → Cancelled
//!     → is_expired(contents)?            ── no   → contents
//!     → upgrade to exclusive (non-blocking) ── busy → Contention
//!     → update(contents) → stage + rename
//!     → new contents
//! ```
//!
//! # Design Decisions
//! - Never waits on a lock. Under concurrent staleness exactly one caller
//!   refreshes and the others fail fast with a retryable error
//! - Locks live on a sidecar `<path>.lock` so the atomic rename of the data
//!   file does not change lock identity
//! - Scoped to cooperating processes on one host; not a consensus mechanism

mod local_file;

pub use local_file::LocalFile;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors returned by [`Updateable::read`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another reader or writer holds a conflicting lock. Retry shortly.
    #[error("lock contention on {0}")]
    Contention(String),

    #[error("read cancelled")]
    Cancelled,

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A blob that is read often and refreshed lazily by whichever caller first
/// observes it as expired.
pub trait Updateable: Send + Sync {
    /// Return fresh contents, refreshing them through `update` if
    /// `is_expired` says the stored bytes are stale.
    ///
    /// Blocking; call from `spawn_blocking` inside async code.
    fn read(
        &self,
        cancel: &CancellationToken,
        is_expired: &dyn Fn(&[u8]) -> bool,
        update: &dyn Fn(&[u8]) -> Vec<u8>,
    ) -> Result<Vec<u8>, StorageError>;
}
