//! Key generation and certificate issuance with rcgen.

use std::fmt;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, PublicKeyData, SerialNumber,
};
use rustls_pki_types::CertificateDer;
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use super::{pem_to_der, CertError, CERTIFICATE_LABEL};
use crate::Role;

/// Organization written into every certificate the hub issues.
pub const ORGANIZATION: &str = "hub-local";

/// Lifetime of a freshly created CA.
pub const CA_VALIDITY_DAYS: u32 = 10 * 365;

/// Lifetime of the hub server certificate.
pub const SERVER_VALIDITY_DAYS: u32 = 365;

/// A certificate produced by the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCert {
    pub pem: String,
    pub der: Vec<u8>,
}

/// The hub certificate authority: its certificate and signing key.
pub struct CertAuthority {
    cert_pem: String,
    cert_der: Vec<u8>,
    key_pem: Zeroizing<String>,
    issuer: Issuer<'static, KeyPair>,
}

impl fmt::Debug for CertAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertAuthority")
            .field("cert_der_len", &self.cert_der.len())
            .finish_non_exhaustive()
    }
}

impl CertAuthority {
    /// Load a CA from PEM. Fails with [`CertError::InvalidCa`] when the
    /// certificate is not a CA or was not made for this key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let key = KeyPair::from_pem(key_pem).map_err(|e| CertError::BadKey(e.to_string()))?;
        let cert_der =
            pem_to_der(cert_pem, CERTIFICATE_LABEL).map_err(|e| CertError::InvalidCa(e.to_string()))?;

        {
            let (_, cert) = X509Certificate::from_der(&cert_der)
                .map_err(|e| CertError::InvalidCa(format!("{:?}", e)))?;
            let is_ca = cert
                .tbs_certificate
                .basic_constraints()
                .ok()
                .flatten()
                .is_some_and(|bc| bc.value.ca);
            if !is_ca {
                return Err(CertError::InvalidCa("certificate is not a CA".to_string()));
            }
            if cert.public_key().subject_public_key.data.as_ref() != key.public_key_raw() {
                return Err(CertError::InvalidCa(
                    "certificate does not match CA key".to_string(),
                ));
            }
        }

        let issuer = Issuer::from_ca_cert_der(&CertificateDer::from(cert_der.as_slice()), key)
            .map_err(|e| CertError::InvalidCa(e.to_string()))?;

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            cert_der,
            key_pem: Zeroizing::new(key_pem.to_string()),
            issuer,
        })
    }

    /// Like [`CertAuthority::from_pem`] but with either half possibly absent.
    pub fn from_parts(cert_pem: Option<&str>, key_pem: Option<&str>) -> Result<Self, CertError> {
        match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => Self::from_pem(cert, key),
            _ => Err(CertError::MissingCa),
        }
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// PKCS#8 PEM of the CA key, for persisting next to the certificate.
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }
}

/// Generate an ECDSA P-256 key pair.
pub fn create_ecdsa_keys() -> Result<KeyPair, CertError> {
    KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(|e| CertError::BadKey(e.to_string()))
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    // Keep the DER integer positive.
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn subject(common_name: &str, role: Role) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, ORGANIZATION);
    if role != Role::None {
        dn.push(DnType::OrganizationalUnitName, role.as_ou());
    }
    dn
}

/// Create a self-signed CA with a fresh key.
pub fn create_ca(common_name: &str, validity_days: u32) -> Result<CertAuthority, CertError> {
    let key = create_ecdsa_keys()?;
    let now = OffsetDateTime::now_utc();

    let mut params = CertificateParams::default();
    params.distinguished_name = subject(common_name, Role::None);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = now - Duration::minutes(1);
    params.not_after = now + Duration::days(i64::from(validity_days));
    params.serial_number = Some(random_serial());

    let cert = params.self_signed(&key)?;
    let key_pem = Zeroizing::new(key.serialize_pem());

    Ok(CertAuthority {
        cert_pem: cert.pem(),
        cert_der: cert.der().to_vec(),
        key_pem,
        issuer: Issuer::new(params, key),
    })
}

/// Issue a client certificate for `public_key`, signed by `ca`.
///
/// The subject is `CN=common_name, O=IDProv, OU=role`. The certificate is
/// valid from `not_before` for `validity_days`.
pub fn create_leaf_cert(
    common_name: &str,
    role: Role,
    public_key: &impl PublicKeyData,
    ca: Option<&CertAuthority>,
    not_before: OffsetDateTime,
    validity_days: u32,
) -> Result<IssuedCert, CertError> {
    let ca = ca.ok_or(CertError::MissingCa)?;
    if public_key.algorithm() != &rcgen::PKCS_ECDSA_P256_SHA256 {
        return Err(CertError::BadKey("only ECDSA P-256 keys are issued".to_string()));
    }

    let mut params = CertificateParams::default();
    params.distinguished_name = subject(common_name, role);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.not_before = not_before;
    params.not_after = not_before + Duration::days(i64::from(validity_days));
    params.serial_number = Some(random_serial());
    params.use_authority_key_identifier_extension = true;

    let cert = params.signed_by(public_key, &ca.issuer)?;
    Ok(IssuedCert {
        pem: cert.pem(),
        der: cert.der().to_vec(),
    })
}

/// Create a client certificate together with a fresh key, for tools and
/// services that do not bring their own key.
pub fn create_client_cert(
    common_name: &str,
    role: Role,
    ca: &CertAuthority,
    validity_days: u32,
) -> Result<(IssuedCert, KeyPair), CertError> {
    let key = create_ecdsa_keys()?;
    let not_before = OffsetDateTime::now_utc() - Duration::minutes(1);
    let cert = create_leaf_cert(common_name, role, &key, Some(ca), not_before, validity_days)?;
    Ok((cert, key))
}

/// Create the hub server certificate. `names` become DNS or IP SANs; the
/// first one is also the CN.
pub fn create_server_cert(
    names: &[String],
    ca: &CertAuthority,
    validity_days: u32,
) -> Result<(IssuedCert, KeyPair), CertError> {
    let first = names.first().ok_or(CertError::MissingSan)?;
    let key = create_ecdsa_keys()?;
    let now = OffsetDateTime::now_utc();

    let mut params = CertificateParams::new(names.to_vec())?;
    params.distinguished_name = subject(first, Role::Service);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.not_before = now - Duration::minutes(1);
    params.not_after = now + Duration::days(i64::from(validity_days));
    params.serial_number = Some(random_serial());
    params.use_authority_key_identifier_extension = true;

    let cert = params.signed_by(&key, &ca.issuer)?;
    Ok((
        IssuedCert {
            pem: cert.pem(),
            der: cert.der().to_vec(),
        },
        key,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{DevicePublicKey, PeerIdentity};

    #[test]
    fn test_ca_round_trips_through_pem() {
        let ca = create_ca("Test CA", 30).unwrap();
        let loaded = CertAuthority::from_pem(ca.cert_pem(), ca.key_pem()).unwrap();
        assert_eq!(loaded.cert_der(), ca.cert_der());
    }

    #[test]
    fn test_leaf_subject_and_validity() {
        let ca = create_ca("Test CA", 30).unwrap();
        let device_key = create_ecdsa_keys().unwrap();
        let public = DevicePublicKey::from_pem(&device_key.public_key_pem()).unwrap();
        let not_before = OffsetDateTime::now_utc() - Duration::seconds(10);

        let cert =
            create_leaf_cert("device1", Role::IoTDevice, &public, Some(&ca), not_before, 3).unwrap();

        let (_, parsed) = X509Certificate::from_der(&cert.der).unwrap();
        let org = parsed
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap();
        assert_eq!(org, "hub-local");
        let ou = parsed
            .subject()
            .iter_organizational_unit()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap();
        assert_eq!(ou, Role::IoTDevice.as_ou());
        assert_eq!(
            parsed.public_key().subject_public_key.data.as_ref(),
            public.as_bytes()
        );

        let peer = PeerIdentity::from_der(&cert.der).unwrap();
        assert_eq!(peer.common_name, "device1");
        assert_eq!(peer.role, Role::IoTDevice);
        assert_eq!(peer.not_before, not_before.unix_timestamp());
        assert_eq!(peer.not_after - peer.not_before, 3 * 24 * 60 * 60);
    }

    #[test]
    fn test_leaf_is_signed_by_ca() {
        let ca = create_ca("Test CA", 30).unwrap();
        let (cert, _) = create_client_cert("admin", Role::Admin, &ca, 1).unwrap();

        let (_, ca_cert) = X509Certificate::from_der(ca.cert_der()).unwrap();
        let (_, leaf) = X509Certificate::from_der(&cert.der).unwrap();
        assert_eq!(leaf.issuer(), ca_cert.subject());
    }

    #[test]
    fn test_leaf_without_ca() {
        let key = create_ecdsa_keys().unwrap();
        let result = create_leaf_cert(
            "device1",
            Role::IoTDevice,
            &key,
            None,
            OffsetDateTime::now_utc(),
            1,
        );
        assert_eq!(result, Err(CertError::MissingCa));
        assert!(matches!(
            CertAuthority::from_parts(None, Some("key")),
            Err(CertError::MissingCa)
        ));
    }

    #[test]
    fn test_non_ca_cert_is_invalid_ca() {
        let ca = create_ca("Test CA", 30).unwrap();
        let (leaf, key) = create_client_cert("device1", Role::IoTDevice, &ca, 1).unwrap();
        let result = CertAuthority::from_pem(&leaf.pem, &key.serialize_pem());
        assert!(matches!(result, Err(CertError::InvalidCa(_))));
    }

    #[test]
    fn test_mismatched_ca_key_is_invalid_ca() {
        let ca = create_ca("Test CA", 30).unwrap();
        let other = create_ecdsa_keys().unwrap();
        let result = CertAuthority::from_pem(ca.cert_pem(), &other.serialize_pem());
        assert!(matches!(result, Err(CertError::InvalidCa(_))));
    }

    #[test]
    fn test_bad_ca_key() {
        let ca = create_ca("Test CA", 30).unwrap();
        let result = CertAuthority::from_pem(ca.cert_pem(), "not a key");
        assert!(matches!(result, Err(CertError::BadKey(_))));
    }

    #[test]
    fn test_server_cert_requires_names() {
        let ca = create_ca("Test CA", 30).unwrap();
        assert!(matches!(
            create_server_cert(&[], &ca, 1),
            Err(CertError::MissingSan)
        ));

        let names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        let (cert, _) = create_server_cert(&names, &ca, 1).unwrap();
        let peer = PeerIdentity::from_der(&cert.der).unwrap();
        assert_eq!(peer.common_name, "localhost");
        assert_eq!(peer.role, Role::Service);
    }

    #[test]
    fn test_serials_differ() {
        let ca = create_ca("Test CA", 30).unwrap();
        let (a, _) = create_client_cert("a", Role::Client, &ca, 1).unwrap();
        let (b, _) = create_client_cert("a", Role::Client, &ca, 1).unwrap();
        let (_, a) = X509Certificate::from_der(&a.der).unwrap();
        let (_, b) = X509Certificate::from_der(&b.der).unwrap();
        assert_ne!(a.raw_serial(), b.raw_serial());
    }
}
