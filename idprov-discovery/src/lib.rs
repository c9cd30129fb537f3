//! Discovery of the provisioning service.
//!
//! The hub advertises itself as a DNS-SD service `_idprov._tcp` whose TXT
//! record carries the directory path. Devices resolve that service to learn
//! where to connect. This crate defines the abstractions; an mDNS responder is
//! plugged in by implementing [`ServiceAdvertiser`] and [`ServiceBrowser`].
//!
//! ```text
//! DiscoveryPublisher --register--> ServiceAdvertiser ... ServiceBrowser --resolve--> DeviceClient
//! ```
//!
//! [`MemoryRegistry`] implements both sides in-process, for hubs that embed
//! their devices and for tests.

mod browser;
mod error;
mod memory;
mod publisher;
mod record;

pub use browser::{resolve_with_timeout, ServiceAdvertiser, ServiceBrowser};
pub use error::DiscoveryError;
pub use memory::MemoryRegistry;
pub use publisher::DiscoveryPublisher;
pub use record::{service_type, ServiceRecord, PATH_TXT_KEY};

/// How long a device waits for the service to show up before giving up.
pub const DEFAULT_DISCOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);
