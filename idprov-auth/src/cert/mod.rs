//! Certificates for the hub: key generation, the CA, leaf issuance and
//! inspection of client certificates presented over TLS.
//!
//! # Security
//!
//! - PEM and DER input is limited to [`MAX_CERT_SIZE`]
//! - The x509_parser library handles ASN.1 parsing

mod factory;
mod peer;
mod public_key;

use thiserror::Error;
use x509_parser::pem::parse_x509_pem;

pub use factory::{
    create_ca, create_client_cert, create_ecdsa_keys, create_leaf_cert, create_server_cert,
    CertAuthority, IssuedCert, CA_VALIDITY_DAYS, ORGANIZATION, SERVER_VALIDITY_DAYS,
};
pub use peer::PeerIdentity;
pub use public_key::DevicePublicKey;

/// Maximum certificate or key size (16KB is generous for a single object)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// PEM label of X.509 certificates.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// PEM label of SubjectPublicKeyInfo.
pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

/// Errors from key generation, issuance and certificate parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CertError {
    /// No CA certificate or CA key is available.
    #[error("CA certificate or key is missing")]
    MissingCa,

    /// The CA certificate is not a CA, or does not belong to the CA key.
    #[error("invalid CA: {0}")]
    InvalidCa(String),

    /// A key could not be generated, parsed or is not ECDSA P-256.
    #[error("bad key: {0}")]
    BadKey(String),

    /// A server certificate needs at least one subject alternative name.
    #[error("server certificate needs at least one name")]
    MissingSan,

    #[error("input too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse certificate: {0}")]
    Parse(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),
}

impl From<rcgen::Error> for CertError {
    fn from(e: rcgen::Error) -> Self {
        Self::Generation(e.to_string())
    }
}

/// Decode the first PEM block of `pem`, checking its label.
pub fn pem_to_der(pem: &str, label: &str) -> Result<Vec<u8>, CertError> {
    if pem.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(pem.len()));
    }
    let (_, block) =
        parse_x509_pem(pem.as_bytes()).map_err(|e| CertError::Parse(format!("{:?}", e)))?;
    if block.label != label {
        return Err(CertError::Parse(format!(
            "expected PEM label {label}, found {}",
            block.label
        )));
    }
    Ok(block.contents)
}

/// Parse a PEM certificate and return its DER encoding, rejecting anything
/// x509_parser cannot read.
pub fn parse_cert_pem(pem: &str) -> Result<Vec<u8>, CertError> {
    let der = pem_to_der(pem, CERTIFICATE_LABEL)?;
    PeerIdentity::from_der(&der)?;
    Ok(der)
}
