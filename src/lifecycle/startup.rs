//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (RTV refresh, metrics)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, including the first RTV fetch
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::certs::responder::CertResponder;
use crate::certs::{load_signing_key, CertError, Certificates};
use crate::config::{load_config, ConfigError, PackagerConfig};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::observability::{logging, metrics};
use crate::packager::{BuildError, Packager};
use crate::rtv::{RtvCache, RtvError};
use crate::storage::{LocalFile, Updateable};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("certificate error: {0}")]
    Certs(#[from] CertError),

    #[error("packager error: {0}")]
    Packager(#[from] BuildError),

    #[error("initial RTV fetch failed: {0}")]
    Rtv(#[from] RtvError),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// A fully initialized packager, ready to bind.
pub struct Application {
    config: PackagerConfig,
    server: HttpServer,
    rtv: Option<Arc<RtvCache>>,
    shutdown: Shutdown,
}

impl Application {
    /// Initialize certificates, the packager, the certificate responder and
    /// the RTV cache, in that order.
    pub async fn build(config: PackagerConfig, shutdown: Shutdown) -> Result<Self, StartupError> {
        let certs = Certificates::load(&config.cert_file)?;
        let key = load_signing_key(&config.key_file)?;
        certs.check_key(&key)?;
        tracing::info!(
            cert_name = %certs.name(),
            chain_len = certs.chain().len(),
            "Certificates loaded"
        );

        let store: Option<Arc<dyn Updateable>> = config
            .cert_cache_file
            .as_ref()
            .map(|path| Arc::new(LocalFile::new(path)) as Arc<dyn Updateable>);
        let responder = CertResponder::new(&certs, store, shutdown.token())?;
        let packager = Packager::new(&config, certs, key)?;

        let rtv = if config.rtv.enabled {
            let cache = RtvCache::new(&config.rtv).await?;
            tracing::info!(version = %cache.version(), "RTV cache populated");
            Some(Arc::new(cache))
        } else {
            None
        };

        let state = AppState {
            packager: Arc::new(packager),
            responder: Arc::new(responder),
            rtv: rtv.clone(),
            cancel: shutdown.token(),
        };
        let server = HttpServer::new(&config, state);

        Ok(Self {
            config,
            server,
            rtv,
            shutdown,
        })
    }

    /// Start background tasks, bind, and serve until shutdown.
    pub async fn run(self) -> Result<(), StartupError> {
        let refresh = self.rtv.map(|cache| {
            cache.spawn_refresh_loop(
                Duration::from_secs(self.config.rtv.poll_interval_secs),
                self.shutdown.token(),
            )
        });

        if self.config.observability.metrics_enabled {
            let addr: SocketAddr = self
                .config
                .observability
                .metrics_address
                .parse()
                .map_err(|e| StartupError::Metrics(format!("invalid metrics_address: {e}")))?;
            metrics::init_metrics(addr).map_err(|e| StartupError::Metrics(e.to_string()))?;
        }

        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })?;

        self.server
            .run(listener, self.shutdown.token())
            .await
            .map_err(StartupError::Serve)?;

        self.shutdown.trigger();
        if let Some(handle) = refresh {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "RTV refresh task did not exit cleanly");
            }
        }
        Ok(())
    }
}

/// Load `config_path` and run the packager until a shutdown signal.
pub async fn start(config_path: &Path) -> Result<(), StartupError> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        config = %config_path.display(),
        bind_address = %config.bind_address(),
        url_sets = config.url_sets.len(),
        rtv_enabled = config.rtv.enabled,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let app = Application::build(config, shutdown).await?;
    app.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
