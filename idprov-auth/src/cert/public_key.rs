use x509_parser::oid_registry::{OID_EC_P256, OID_KEY_TYPE_EC_PUBLIC_KEY};
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo};

use super::{pem_to_der, CertError, PUBLIC_KEY_LABEL};

/// Length of an uncompressed SEC1 P-256 point.
const P256_POINT_LEN: usize = 65;

/// A device's ECDSA P-256 public key, as sent in a provisioning request.
///
/// Implements [`rcgen::PublicKeyData`] so a certificate can be issued for a
/// key whose private half never leaves the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePublicKey {
    point: Vec<u8>,
}

impl DevicePublicKey {
    /// Parse a PEM `PUBLIC KEY` (SubjectPublicKeyInfo) block.
    pub fn from_pem(pem: &str) -> Result<Self, CertError> {
        let der = pem_to_der(pem, PUBLIC_KEY_LABEL).map_err(|e| CertError::BadKey(e.to_string()))?;
        let (_, spki) = SubjectPublicKeyInfo::from_der(&der)
            .map_err(|e| CertError::BadKey(format!("{:?}", e)))?;

        if spki.algorithm.algorithm != OID_KEY_TYPE_EC_PUBLIC_KEY {
            return Err(CertError::BadKey("not an EC public key".to_string()));
        }
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|params| params.as_oid().ok());
        if curve != Some(OID_EC_P256) {
            return Err(CertError::BadKey("curve is not P-256".to_string()));
        }

        let point = spki.subject_public_key.data.to_vec();
        if point.len() != P256_POINT_LEN || point[0] != 0x04 {
            return Err(CertError::BadKey("malformed EC point".to_string()));
        }
        Ok(Self { point })
    }

    /// Uncompressed SEC1 point.
    pub fn as_bytes(&self) -> &[u8] {
        &self.point
    }
}

impl rcgen::PublicKeyData for DevicePublicKey {
    fn der_bytes(&self) -> &[u8] {
        &self.point
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        &rcgen::PKCS_ECDSA_P256_SHA256
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::create_ecdsa_keys;

    #[test]
    fn test_parses_generated_key() {
        let key = create_ecdsa_keys().unwrap();
        let public = DevicePublicKey::from_pem(&key.public_key_pem()).unwrap();
        assert_eq!(public.as_bytes(), key.public_key_raw());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            DevicePublicKey::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"),
            Err(CertError::BadKey(_))
        ));
        assert!(matches!(
            DevicePublicKey::from_pem("hello"),
            Err(CertError::BadKey(_))
        ));
    }

    #[test]
    fn test_rejects_private_key_pem() {
        let key = create_ecdsa_keys().unwrap();
        assert!(DevicePublicKey::from_pem(&key.serialize_pem()).is_err());
    }

    #[test]
    fn test_rejects_ed25519() {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        assert!(matches!(
            DevicePublicKey::from_pem(&key.public_key_pem()),
            Err(CertError::BadKey(_))
        ));
    }
}
