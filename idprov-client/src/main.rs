//! IDProv CLI - provision devices and register OOB secrets

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use idprov_client::store::default_certs_dir;
use idprov_client::{ClientIdentity, DeviceClient, DeviceConfig, OobClient};
use idprov_proto::ProvisionStatus;
use tracing_subscriber::EnvFilter;

/// IDProv - IoT device provisioning client
#[derive(Parser)]
#[command(name = "idprov", version, about)]
struct Cli {
    /// Server address (host:port)
    #[arg(long, global = true, env = "IDPROV_SERVER")]
    server: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request (or renew) the device certificate
    Provision {
        /// Device ID
        #[arg(long, env = "IDPROV_DEVICE_ID")]
        device_id: String,

        /// OOB secret; omit to renew with the current certificate
        #[arg(long, env = "IDPROV_SECRET", default_value = "")]
        secret: String,

        /// Folder holding the device key and certificates
        #[arg(long)]
        certs_dir: Option<PathBuf>,
    },

    /// Show the provisioning status of a device
    Status {
        /// Device ID
        #[arg(long, env = "IDPROV_DEVICE_ID")]
        device_id: String,

        /// Query another device (admin or plugin certificates only)
        #[arg(long)]
        target: Option<String>,

        /// Folder holding the device key and certificates
        #[arg(long)]
        certs_dir: Option<PathBuf>,
    },

    /// Register the OOB secret of a device (admin or plugin)
    Oob {
        /// Device the secret is for
        #[arg(long)]
        device_id: String,

        /// The secret
        #[arg(long, env = "IDPROV_SECRET")]
        secret: String,

        /// Admin or plugin certificate
        #[arg(long)]
        cert: PathBuf,

        /// Key of the certificate
        #[arg(long)]
        key: PathBuf,

        /// Hub CA certificate
        #[arg(long)]
        ca: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Provision {
            device_id,
            secret,
            certs_dir,
        } => {
            let mut client = device_client(&device_id, certs_dir, cli.server)?;
            client.start().await.context("Failed to reach provisioning server")?;
            let resp = client
                .post_provisioning_request(None, &secret)
                .await
                .context("Provisioning request failed")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                match resp.status {
                    ProvisionStatus::Approved => {
                        println!("Approved");
                        println!("Certificate: {}", client.files().cert_path().display());
                    }
                    ProvisionStatus::Waiting => {
                        println!("Waiting for OOB secret; retry in {}s", resp.retry_sec);
                    }
                    ProvisionStatus::Rejected => {
                        println!("Rejected: the OOB secret did not match");
                    }
                }
            }
            client.stop();
            if resp.status == ProvisionStatus::Rejected {
                std::process::exit(2);
            }
        }

        Commands::Status {
            device_id,
            target,
            certs_dir,
        } => {
            let mut client = device_client(&device_id, certs_dir, cli.server)?;
            client.start().await.context("Failed to reach provisioning server")?;
            let status = client
                .get_device_status(target.as_deref())
                .await
                .context("Status request failed")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{:<10} {}", "Device:", status.device_id);
                println!("{:<10} {}", "Status:", status.status);
            }
            client.stop();
        }

        Commands::Oob {
            device_id,
            secret,
            cert,
            key,
            ca,
        } => {
            let Some(server) = cli.server else {
                bail!("--server is required to post an OOB secret");
            };
            let read = |path: &PathBuf| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))
            };
            let identity = ClientIdentity::new(read(&cert)?, read(&key)?);
            let mut client = OobClient::new(server, identity, read(&ca)?);
            client.start().await.context("Failed to reach provisioning server")?;
            client
                .post_oob_secret(&device_id, &secret)
                .await
                .context("Failed to register OOB secret")?;
            client.stop();

            if !cli.json {
                println!("OOB secret registered for {device_id}");
            }
        }
    }

    Ok(())
}

fn device_client(
    device_id: &str,
    certs_dir: Option<PathBuf>,
    server: Option<String>,
) -> Result<DeviceClient> {
    if device_id.is_empty() {
        bail!("--device-id must not be empty");
    }
    let mut config = DeviceConfig::new(device_id, certs_dir.unwrap_or_else(default_certs_dir));
    if let Some(server) = server {
        config = config.with_server(server);
    }
    Ok(DeviceClient::new(config))
}
