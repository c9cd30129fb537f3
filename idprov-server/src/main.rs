//! IDProv Server - issues device certificates
//!
//! Serves the provisioning endpoints over TLS and manages the hub
//! certificate bundle.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use idprov_server::tls::{create_bundle, CA_CERT_FILE, PLUGIN_CERT_FILE, SERVER_CERT_FILE};
use idprov_server::{IdProvServer, ServerConfig};
use tokio::signal;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// IDProv Server - IoT device provisioning
#[derive(Parser)]
#[command(name = "idprov-server", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(long, short, global = true, env = "IDPROV_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the provisioning server (default if no command given)
    Serve(ServeArgs),

    /// Create or refresh the CA, hub and plugin certificates
    Certs {
        /// Certificate folder (defaults to the configured certsDir)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// DNS names or IP addresses the hub certificate is valid for
        #[arg(long = "name", default_values = ["localhost", "127.0.0.1"])]
        names: Vec<String>,
    },
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Listening address
    #[arg(long)]
    address: Option<IpAddr>,

    /// Listening port
    #[arg(long, short)]
    port: Option<u16>,

    /// Folder holding caCert.pem, caKey.pem, hubCert.pem and hubKey.pem
    #[arg(long)]
    certs_dir: Option<PathBuf>,

    /// Folder receiving issued device certificates
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Lifetime of issued device certificates in days
    #[arg(long)]
    validity_days: Option<u32>,
}

impl ServeArgs {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.certs_dir {
            config.certs_dir = dir;
        }
        if let Some(dir) = self.archive_dir {
            config.archive_dir = dir;
        }
        if let Some(days) = self.validity_days {
            config.validity_days = days;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    match cli.command {
        Some(Commands::Certs { dir, names }) => {
            cmd_certs(dir.unwrap_or(config.certs_dir), &names)
        }
        Some(Commands::Serve(args)) => cmd_serve(config, args).await,
        None => cmd_serve(config, ServeArgs::default()).await,
    }
}

/// Create the certificate bundle.
fn cmd_certs(dir: PathBuf, names: &[String]) -> anyhow::Result<()> {
    create_bundle(&dir, names)
        .with_context(|| format!("failed to create certificates in {}", dir.display()))?;

    println!("Certificates written to {}", dir.display());
    println!();
    println!("  CA:      {CA_CERT_FILE}");
    println!("  Hub:     {SERVER_CERT_FILE} ({})", names.join(", "));
    println!("  Plugin:  {PLUGIN_CERT_FILE}");
    println!();
    println!("Use the plugin certificate to post OOB secrets.");
    Ok(())
}

/// Run the provisioning server until SIGINT or SIGTERM.
async fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    args.apply(&mut config);

    let mut server = IdProvServer::from_config(&config).with_context(|| {
        format!(
            "failed to load certificates from {}",
            config.certs_dir.display()
        )
    })?;

    let addr = server.start().await?;
    tracing::info!(
        addr = %addr,
        archive = %config.archive_dir.display(),
        validity_days = config.validity_days,
        "IDProv server started"
    );
    tracing::info!(addr = %addr, "Service is not advertised; pass this address to devices with --server");

    shutdown_signal().await;

    server.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
