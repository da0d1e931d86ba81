//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Logging → Certificates → Packager → Responder
//!     → RTV (first fetch) → Metrics → Listener
//!
//! Shutdown (shutdown.rs):
//!     Root token cancelled → RTV loop exits, in-flight fetches abort
//!     → axum drains connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - One root cancellation token; every task holds a child of it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Application, StartupError};
