//! Signed exchange packager library.

pub mod certs;
pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod packager;
pub mod routing;
pub mod rtv;
pub mod security;
pub mod storage;

pub use config::schema::PackagerConfig;
pub use error::PackagerError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use packager::Packager;
