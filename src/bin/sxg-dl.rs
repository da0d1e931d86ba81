//! Download a signed exchange from a packager, plus the certificate chain it
//! was signed with.

use std::path::PathBuf;

use clap::Parser;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use sxg_packager::certs::CHAIN_CONTENT_TYPE;
use sxg_packager::exchange::{Exchange, CONTENT_TYPE as SXG_CONTENT_TYPE};

#[derive(Parser)]
#[command(name = "sxg-dl")]
#[command(about = "Save a signed exchange and its certificate chain", long_about = None)]
struct Cli {
    /// URL of the signed exchange, e.g. a packager's /priv/doc?sign=...
    url: String,

    /// Where the signed exchange is saved.
    #[arg(long, default_value = "test.sxg")]
    out_sxg: PathBuf,

    /// Where the certificate chain is saved.
    #[arg(long, default_value = "test.cert")]
    out_cert: PathBuf,

    /// Override scheme, host and parent path of the cert-url.
    #[arg(long)]
    cert_url_base: Option<Url>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let res = client
        .get(&cli.url)
        .header(ACCEPT, SXG_CONTENT_TYPE)
        .send()
        .await?;
    if !res.status().is_success() {
        return Err(format!("signed exchange response error: {}", res.status()).into());
    }
    let sxg = res.bytes().await?;

    let exchange = Exchange::from_b0(&sxg)?;
    let signature = exchange
        .header("signature")
        .ok_or("exchange has no Signature header")?;
    let mut cert_url = Url::parse(&extract_cert_url(signature)?)?;
    if let Some(base) = cli.cert_url_base {
        cert_url = rebase(&cert_url, &base)?;
    }

    std::fs::write(&cli.out_sxg, &sxg)?;

    let res = client.get(cert_url.clone()).send().await?;
    if !res.status().is_success() {
        return Err(format!("cert-url response error: {}", res.status()).into());
    }
    let content_type = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if content_type != CHAIN_CONTENT_TYPE {
        return Err(format!("invalid content-type of {cert_url}: {content_type}").into());
    }
    let cert = res.bytes().await?;
    std::fs::write(&cli.out_cert, &cert)?;

    eprintln!(
        "Saved to {} and {}.",
        cli.out_sxg.display(),
        cli.out_cert.display()
    );
    Ok(())
}

/// Pull the `cert-url` parameter out of a Signature header value.
fn extract_cert_url(signature: &str) -> Result<String, String> {
    let re = Regex::new(r#";\s*cert-url="([^"]*)""#).map_err(|e| e.to_string())?;
    re.captures(signature)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| format!("no cert-url found in {signature}"))
}

/// Keep the last path segment (the certificate name) and put it under `base`.
fn rebase(cert_url: &Url, base: &Url) -> Result<Url, url::ParseError> {
    let name = cert_url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or_default();
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(name)
}
