//! Runtime version (RTV) cache.
//!
//! # Responsibilities
//! - Fetch the current runtime version and the CSS published for it
//! - Hold both as one snapshot, replaced atomically
//! - Refresh on a fixed interval until shutdown
//!
//! # Design Decisions
//! - Readers never block: the snapshot lives behind `ArcSwap`
//! - A refresh stages version and CSS and commits both or neither
//! - CSS is only fetched when the version changes
//! - The first population is fatal on failure; later failures keep the
//!   previous snapshot and log a warning

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::schema::RtvConfig;
use crate::observability::metrics;

/// Width the version string is zero-padded to.
pub const VERSION_WIDTH: usize = 15;

#[derive(Debug, Error)]
pub enum RtvError {
    #[error("failed to build RTV client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("error fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("non-200 response fetching {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid RTV version {0:?}")]
    InvalidVersion(String),
}

/// One consistent (version, css) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RtvSnapshot {
    pub version: String,
    pub css: String,
}

impl RtvSnapshot {
    fn is_populated(&self) -> bool {
        !self.version.is_empty()
    }
}

/// What a successful refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refreshed {
    Updated,
    Unchanged,
}

pub struct RtvCache {
    client: reqwest::Client,
    host: String,
    current: ArcSwap<RtvSnapshot>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for RtvCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtvCache")
            .field("host", &self.host)
            .field("version", &self.current.load().version)
            .finish_non_exhaustive()
    }
}

impl RtvCache {
    /// Build the cache and populate it once. Failure here must abort startup.
    pub async fn new(config: &RtvConfig) -> Result<Self, RtvError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(RtvError::Client)?;
        let cache = Self::with_client(client, &config.host);
        cache.refresh().await?;
        Ok(cache)
    }

    /// An empty cache using `client`. Nothing is fetched until
    /// [`refresh`](Self::refresh).
    pub fn with_client(client: reqwest::Client, host: &str) -> Self {
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            current: ArcSwap::from_pointee(RtvSnapshot::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<RtvSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> String {
        self.current.load().version.clone()
    }

    pub fn css(&self) -> String {
        self.current.load().css.clone()
    }

    /// Fetch and commit a new snapshot. On error the previous snapshot is
    /// untouched.
    pub async fn refresh(&self) -> Result<Refreshed, RtvError> {
        let _serialized = self.refresh_lock.lock().await;
        let result = self.fetch_if_changed().await;
        metrics::record_rtv_refresh(match &result {
            Ok(Refreshed::Updated) => "updated",
            Ok(Refreshed::Unchanged) => "unchanged",
            Err(_) => "failed",
        });
        result
    }

    async fn fetch_if_changed(&self) -> Result<Refreshed, RtvError> {
        let raw = self.get(&format!("{}/v0/version.txt", self.host)).await?;
        let version = parse_version(&raw)?;

        let current = self.current.load_full();
        if current.is_populated() && current.version == version {
            tracing::debug!(version = %version, "RTV unchanged");
            return Ok(Refreshed::Unchanged);
        }

        let css = self.get(&format!("{}/rtv/{}/v0.css", self.host, version)).await?;

        tracing::info!(
            previous = %current.version,
            version = %version,
            css_bytes = css.len(),
            "RTV updated"
        );
        self.current.store(Arc::new(RtvSnapshot { version, css }));
        Ok(Refreshed::Updated)
    }

    async fn get(&self, url: &str) -> Result<String, RtvError> {
        tracing::debug!(url = %url, "Fetching RTV resource");
        let fetch_err = |source| RtvError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(fetch_err)?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(RtvError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        response.text().await.map_err(fetch_err)
    }

    /// Refresh every `interval` until `cancel` fires. The first tick is one
    /// interval from now, since [`new`](Self::new) already populated the cache.
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "RTV refresh loop starting");
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            tracing::warn!(
                                error = %e,
                                version = %self.version(),
                                "RTV refresh failed, keeping cached values"
                            );
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::info!("RTV refresh loop received shutdown signal, exiting");
                        break;
                    }
                }
            }
        })
    }
}

/// Trim and validate a `version.txt` body. A version is a non-empty run of
/// ASCII digits; it ends up in the CSS path, so nothing else is accepted.
pub fn parse_version(raw: &str) -> Result<String, RtvError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RtvError::InvalidVersion(trimmed.to_string()));
    }
    Ok(pad_version(trimmed))
}

/// Left-pad with zeros to [`VERSION_WIDTH`].
pub fn pad_version(raw: &str) -> String {
    format!("{:0>width$}", raw, width = VERSION_WIDTH)
}
