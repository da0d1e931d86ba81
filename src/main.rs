//! Signed exchange packager.
//!
//! Fetches documents from allow-listed origins and serves them as signed
//! HTTP exchanges (`application/signed-exchange;v=b0`), together with the
//! certificate chain the signatures refer to.
//!
//! # Architecture Overview
//!
//! ```text
//!     GET /priv/doc?fetch=..&sign=..
//!     ───────────────┬──────────────────────────────────────────────────
//!                    ▼
//!              ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!              │  http    │──▶│ routing  │──▶│ packager │──▶│ exchange │
//!              │  server  │   │ url sets │   │  fetch   │   │ mi + sig │
//!              └──────────┘   └──────────┘   └──────────┘   └──────────┘
//!
//!     GET /amppkg/cert/{name}
//!     ───────────────┬──────────────────────────────────────────────────
//!                    ▼
//!              ┌──────────┐   ┌──────────┐
//!              │  certs   │──▶│ storage  │  (optional, file-locked)
//!              │responder │   │local file│
//!              └──────────┘   └──────────┘
//!
//!     Cross-cutting: config, observability, security, lifecycle, rtv
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sxg_packager::lifecycle::startup;

#[derive(Parser, Debug)]
#[command(name = "sxg-packager", version, about = "Signed exchange packager")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "packager.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match startup::start(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be initialized if config loading failed.
            tracing::error!(error = %e, "Fatal startup error");
            eprintln!("sxg-packager: {e}");
            ExitCode::FAILURE
        }
    }
}
