//! IDProv clients.
//!
//! - [`DeviceClient`] - runs on the device: pins the hub CA on first contact,
//!   requests a certificate with the OOB secret and renews it over mutual TLS.
//! - [`OobClient`] - used by administrators and plugins to register the OOB
//!   secret of a device with the hub.
//!
//! # Example
//!
//! ```ignore
//! let mut device = DeviceClient::new(DeviceConfig::new("device1", certs_dir).with_server("hub:8880"));
//! device.start().await?;
//! let resp = device.post_provisioning_request(None, "secret1").await?;
//! ```

pub mod device;
pub mod error;
pub mod oob;
pub mod store;
pub mod tls;
pub mod transport;

pub use device::{DeviceClient, DeviceConfig};
pub use error::ClientError;
pub use oob::OobClient;
pub use store::ClientFiles;
pub use tls::ClientIdentity;
