//! URL set routing subsystem.
//!
//! # Data Flow
//! ```text
//! Signing request (fetch, sign)
//!     → router.rs (parse both URLs, scan URL sets in order)
//!     → matcher.rs (evaluate one pattern against one URL)
//!     → Return: Resolved { fetch_url, sign_url, error_on_stateful_headers }
//!       or ResolveError
//!
//! URL set compilation (at startup):
//!     UrlSetConfig[]
//!     → Default schemes / regexes per role
//!     → Compile anchored regexes
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - URL sets compiled at startup, immutable at runtime
//! - Deterministic: same input always resolves to the same set
//! - First match wins (configuration order)

pub mod matcher;
pub mod router;

pub use matcher::{PatternError, Role, UrlPattern};
pub use router::{Resolved, ResolveError, Router, UrlSet};
