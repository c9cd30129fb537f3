//! TLS for the provisioning endpoint.
//!
//! Server authentication uses the hub server certificate. Client certificates
//! are optional at the TLS layer: devices without one provision through the
//! OOB path, and the service decides per request what a presented
//! certificate allows.

mod bundle;
mod connect_info;
mod server;

pub use bundle::{
    create_bundle, load_bundle, BundleError, CertBundle, CA_CERT_FILE, CA_KEY_FILE,
    PLUGIN_CERT_FILE, PLUGIN_KEY_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE,
};
pub use connect_info::TlsConnectInfo;
pub use server::{TlsConfigError, TlsServerConfig};
