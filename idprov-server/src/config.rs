//! Server configuration.
//!
//! Loaded from an optional TOML file; command-line flags override file values.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::services::{DEFAULT_RETRY_SEC, DEFAULT_VALIDITY_DAYS};

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings of the provisioning server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listening address.
    pub address: IpAddr,
    /// Listening port. 0 picks a free port.
    pub port: u16,
    /// Instance name used when advertising the service.
    pub instance_id: String,
    /// DNS-SD service name, advertised as `_{name}._tcp`.
    pub service_name: String,
    /// Folder holding the CA and hub server certificate.
    pub certs_dir: PathBuf,
    /// Folder receiving issued device certificates. Empty disables archiving.
    pub archive_dir: PathBuf,
    /// Lifetime of issued device certificates.
    pub validity_days: u32,
    /// Retry hint sent with `Waiting` responses.
    pub retry_sec: u32,
    /// Message bus host announced as `mqtts`/`mqttws` in the directory.
    pub broker_host: Option<String>,
    pub broker_tls_port: Option<u16>,
    pub broker_ws_port: Option<u16>,
    /// Additional services announced in the directory.
    pub services: BTreeMap<String, String>,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("idprov")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: idprov_proto::DEFAULT_PORT,
            instance_id: "idprov".to_string(),
            service_name: idprov_proto::DEFAULT_SERVICE_NAME.to_string(),
            certs_dir: data_dir().join("certs"),
            archive_dir: data_dir().join("archive"),
            validity_days: DEFAULT_VALIDITY_DAYS,
            retry_sec: DEFAULT_RETRY_SEC,
            broker_host: None,
            broker_tls_port: None,
            broker_ws_port: None,
            services: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Services for the directory: the configured map plus the message bus
    /// endpoints when a broker host is set.
    pub fn directory_services(&self) -> BTreeMap<String, String> {
        let mut services = self.services.clone();
        if let Some(host) = &self.broker_host {
            if let Some(port) = self.broker_tls_port {
                services.insert("mqtts".to_string(), format!("tls://{host}:{port}"));
            }
            if let Some(port) = self.broker_ws_port {
                services.insert("mqttws".to_string(), format!("wss://{host}:{port}"));
            }
        }
        services
    }
}
