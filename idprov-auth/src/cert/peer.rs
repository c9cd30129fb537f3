use x509_parser::prelude::{FromDer, X509Certificate};

use super::{CertError, MAX_CERT_SIZE};
use crate::Role;

/// Identity of a TLS peer, taken from its leaf certificate.
///
/// The TLS layer has already checked the chain against the hub CA. This type
/// only carries what the provisioning logic decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub common_name: String,
    pub role: Role,
    /// Unix seconds.
    pub not_before: i64,
    /// Unix seconds.
    pub not_after: i64,
}

impl PeerIdentity {
    /// Extract CN, OU role and validity from a DER certificate.
    pub fn from_der(cert_der: &[u8]) -> Result<Self, CertError> {
        if cert_der.len() > MAX_CERT_SIZE {
            return Err(CertError::TooLarge(cert_der.len()));
        }

        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| CertError::Parse(format!("{:?}", e)))?;

        let subject = cert.subject();
        let common_name = subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();
        let role = Role::from_ous(
            subject
                .iter_organizational_unit()
                .filter_map(|ou| ou.as_str().ok()),
        );

        let validity = cert.validity();
        Ok(Self {
            common_name,
            role,
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    /// Whether the certificate is inside its validity window at `unix_secs`.
    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }

    pub fn is_valid_now(&self) -> bool {
        self.is_valid_at(time::OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Whether this peer may obtain a certificate for `device_id` without an
    /// OOB secret: a device renewing its own certificate, or an admin/plugin
    /// acting for any device.
    pub fn may_provision(&self, device_id: &str) -> bool {
        match self.role {
            Role::Admin | Role::Plugin => true,
            Role::IoTDevice => self.common_name == device_id,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{create_ca, create_client_cert, create_ecdsa_keys, create_leaf_cert};

    #[test]
    fn test_identity_from_issued_cert() {
        let ca = create_ca("Test CA", 1).unwrap();
        let (cert, _key) = create_client_cert("device1", Role::IoTDevice, &ca, 1).unwrap();

        let peer = PeerIdentity::from_der(&cert.der).unwrap();
        assert_eq!(peer.common_name, "device1");
        assert_eq!(peer.role, Role::IoTDevice);
        assert!(peer.is_valid_now());
        assert!(!peer.is_valid_at(peer.not_after + 1));
        assert!(!peer.is_valid_at(peer.not_before - 1));
    }

    #[test]
    fn test_lapsed_leaf_is_not_valid_now() {
        let ca = create_ca("Test CA", 1).unwrap();
        let key = create_ecdsa_keys().unwrap();
        let not_before = ::time::OffsetDateTime::now_utc() - ::time::Duration::days(2);
        let cert =
            create_leaf_cert("device1", Role::IoTDevice, &key, Some(&ca), not_before, 1).unwrap();

        let peer = PeerIdentity::from_der(&cert.der).unwrap();
        assert_eq!(peer.not_before, not_before.unix_timestamp());
        assert!(!peer.is_valid_now());
    }

    #[test]
    fn test_device_may_only_renew_itself() {
        let peer = PeerIdentity {
            common_name: "device1".to_string(),
            role: Role::IoTDevice,
            not_before: 0,
            not_after: i64::MAX,
        };
        assert!(peer.may_provision("device1"));
        assert!(!peer.may_provision("device2"));
    }

    #[test]
    fn test_privileged_roles_act_for_anyone() {
        for role in [Role::Admin, Role::Plugin] {
            let peer = PeerIdentity {
                common_name: "operator".to_string(),
                role,
                not_before: 0,
                not_after: i64::MAX,
            };
            assert!(peer.may_provision("device1"));
        }
    }

    #[test]
    fn test_client_role_cannot_provision() {
        let peer = PeerIdentity {
            common_name: "device1".to_string(),
            role: Role::Client,
            not_before: 0,
            not_after: i64::MAX,
        };
        assert!(!peer.may_provision("device1"));
    }

    #[test]
    fn test_garbage_der() {
        assert!(matches!(
            PeerIdentity::from_der(b"not a certificate"),
            Err(CertError::Parse(_))
        ));
    }
}
