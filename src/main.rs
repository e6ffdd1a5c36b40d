//! tlsgate: mutually authenticated TLS in front of plaintext TCP services
//!
//! Each tunnel listens for TLS on a local address, requires a client certificate signed
//! by one of the configured CAs, and forwards the decrypted stream to a remote address.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tlsgate_cert::TrustContext;
use tlsgate_proto::TunnelSpec;
use tlsgate_server::Supervisor;

use crate::config::{Overrides, Settings};

/// Terminate mutual TLS and forward each client to a plaintext TCP endpoint
#[derive(Parser, Debug)]
#[command(name = "tlsgate")]
#[command(about = "Terminate mutual TLS and forward to plaintext TCP services", long_about = None)]
#[command(version)]
struct Cli {
    /// Tunnels to serve: <local-host>:<local-port>:<remote-host>:<remote-port>
    #[arg(value_name = "TUNNEL")]
    tunnels: Vec<TunnelSpec>,

    /// Additional tunnel (repeatable, or comma-separated in TLSGATE_TUNNELS)
    #[arg(
        short = 't',
        long = "tunnel",
        value_name = "TUNNEL",
        env = "TLSGATE_TUNNELS",
        value_delimiter = ','
    )]
    extra_tunnels: Vec<TunnelSpec>,

    /// Directory of *.pem files, each holding a server certificate chain and its key
    /// [default: ./certs]
    #[arg(long, env = "TLSGATE_CERT_DIR")]
    cert_dir: Option<PathBuf>,

    /// PEM bundle of the CAs allowed to sign client certificates [default: clientcas.pem]
    #[arg(long, env = "TLSGATE_CLIENT_CA")]
    client_ca: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, env = "TLSGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Exit when any tunnel's listener fails instead of keeping the others running
    #[arg(long)]
    exit_on_listener_failure: bool,
}

impl Cli {
    fn into_overrides(self) -> Overrides {
        let mut tunnels = self.tunnels;
        tunnels.extend(self.extra_tunnels);

        Overrides {
            config: self.config,
            tunnels,
            cert_dir: self.cert_dir,
            client_ca: self.client_ca,
            exit_on_listener_failure: self.exit_on_listener_failure,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let settings = Settings::resolve(cli.into_overrides())?;

    let trust = TrustContext::load(&settings.cert_dir, &settings.client_ca).with_context(|| {
        format!(
            "Failed to load certificates from {} and client CAs from {}",
            settings.cert_dir.display(),
            settings.client_ca.display()
        )
    })?;

    let tunnel_count = settings.tunnels.len();
    let supervisor = Supervisor::bind(settings.tunnels, &trust, settings.failure_policy)
        .await
        .context("Failed to start tunnels")?;

    info!(
        "tlsgate {} serving {} tunnel(s)",
        env!("CARGO_PKG_VERSION"),
        tunnel_count
    );

    tokio::select! {
        result = supervisor.run() => {
            result.context("Tunnel server stopped")?;
        }
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received, stopping tunnels"),
                Err(e) => error!("Error listening for shutdown signal: {}", e),
            }
        }
    }

    Ok(())
}

/// Log lines carry the source file and line, like `src/pump.rs:172`.
fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();
}
