//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Fetched response:
//!     → limits.rs (bound the body)
//!     → headers.rs (stateful policy, hop-by-hop stripping)
//!     → Pass to exchange construction
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in upstream headers

pub mod headers;
pub mod limits;
