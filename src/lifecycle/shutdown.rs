//! Shutdown coordination for the packager.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Holds the root cancellation token. Long-running tasks take a child token
/// so they observe the root being cancelled without being able to cancel
/// each other.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    root: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled when shutdown is triggered.
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.root.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wait until shutdown is triggered.
    pub async fn triggered(&self) {
        self.root.cancelled().await
    }
}
