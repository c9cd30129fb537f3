//! IDProv server - issues client certificates to IoT devices.
//!
//! A device proves it is the device an administrator expects by signing its
//! provisioning request with a one-time out-of-band secret. The server checks
//! the signature, consumes the secret and returns a certificate signed by the
//! hub CA. Devices that already hold a certificate renew over mutual TLS.
//!
//! # Example
//!
//! ```ignore
//! let config = ServerConfig::load(path)?;
//! let mut server = IdProvServer::from_config(&config)?;
//! let addr = server.start().await?;
//! // ...
//! server.stop().await;
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod services;
pub mod tls;

pub use archive::{ArchiveError, CertArchive};
pub use config::{ConfigError, ServerConfig};
pub use error::ServiceError;
pub use server::{IdProvServer, ServerError};
pub use services::{ProvisionService, ServiceSettings};
