//! Pure provisioning primitives for IDProv.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! It provides:
//! - [`signer`] - HMAC-SHA256 message signatures keyed by the OOB secret
//! - [`role`] - Roles carried in the certificate OU field
//! - [`cert`] - ECDSA P-256 keys, the hub CA and certificate issuance
//! - [`oob`] - The single-use OOB secret store
//!
//! # Example
//!
//! ```ignore
//! use idprov_auth::{cert, oob::OobStore, Role};
//!
//! let ca = cert::create_ca("Hub CA", 365)?;
//! let store = OobStore::new();
//! store.put("device1", "secret");
//! // device signs its request with "secret", server verifies and consumes
//! let verdict = store.verify_and_consume("device1", &canonical, &signature);
//! ```

pub mod cert;
pub mod device_id;
pub mod oob;
pub mod role;
pub mod signer;

pub use cert::{
    create_ca, create_client_cert, create_ecdsa_keys, create_leaf_cert, create_server_cert,
    CertAuthority, CertError,
    DevicePublicKey, IssuedCert, PeerIdentity,
};
pub use device_id::{validate_device_id, DeviceIdError};
pub use oob::{OobStore, OobVerdict};
pub use role::Role;
pub use signer::{sign, verify, SignatureError};
