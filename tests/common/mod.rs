//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;

use sxg_packager::certs::{signing_key_from_pem, Certificates};
use sxg_packager::config::{PackagerConfig, UrlPatternConfig, UrlSetConfig};
use sxg_packager::packager::Packager;

/// Domain the mock origin answers for.
pub const ORIGIN_DOMAIN: &str = "example.test";

/// A self-signed P-256 certificate and key written to a temp dir.
pub struct TestCerts {
    pub dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCerts {
    pub fn generate() -> Self {
        let generated = rcgen::generate_simple_self_signed(vec![ORIGIN_DOMAIN.to_string()])
            .expect("generate certificate");
        let cert_pem = generated.cert.pem();
        let key_pem = generated.key_pair.serialize_pem();

        let dir = tempfile::tempdir().expect("tempdir");
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, &cert_pem).expect("write cert");
        std::fs::write(&key_path, &key_pem).expect("write key");

        Self {
            dir,
            cert_path,
            key_path,
            cert_pem,
            key_pem,
        }
    }

    pub fn certificates(&self) -> Certificates {
        Certificates::from_pem(self.cert_pem.as_bytes(), "test").expect("parse cert")
    }

    pub fn signing_key(&self) -> p256::ecdsa::SigningKey {
        signing_key_from_pem(self.key_pem.as_bytes(), "test").expect("parse key")
    }
}

/// Serve `router` on an ephemeral loopback port.
pub async fn start_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Counts requests reaching a mock server.
#[derive(Clone, Default)]
pub struct HitCounter(Arc<AtomicUsize>);

impl HitCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// One URL set: `http://example.test/amp/...` may be signed as
/// `https://example.test/amp/...`.
pub fn amp_url_set(error_on_stateful_headers: bool) -> UrlSetConfig {
    UrlSetConfig {
        same_path: true,
        fetch: UrlPatternConfig {
            scheme: vec!["http".to_string()],
            domain: ORIGIN_DOMAIN.to_string(),
            path_re: Some("/amp/.*".to_string()),
            error_on_stateful_headers,
            ..Default::default()
        },
        sign: UrlPatternConfig {
            domain: ORIGIN_DOMAIN.to_string(),
            path_re: Some("/amp/.*".to_string()),
            ..Default::default()
        },
    }
}

/// A config pointing at `certs`, with RTV disabled.
pub fn test_config(certs: &TestCerts, url_sets: Vec<UrlSetConfig>) -> PackagerConfig {
    let mut config = PackagerConfig::default();
    config.packager_base = "https://packager.test/".to_string();
    config.cert_file = certs.cert_path.display().to_string();
    config.key_file = certs.key_path.display().to_string();
    config.url_sets = url_sets;
    config.rtv.enabled = false;
    config
}

/// A packager whose fetches of `example.test` land on `origin`.
pub fn packager_for_origin(config: &PackagerConfig, certs: &TestCerts, origin: SocketAddr) -> Packager {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .resolve(ORIGIN_DOMAIN, origin)
        .build()
        .unwrap();
    Packager::with_client(config, certs.certificates(), certs.signing_key(), client).unwrap()
}
