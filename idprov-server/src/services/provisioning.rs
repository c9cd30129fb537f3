//! Provisioning service: decides every request against the OOB store and the
//! caller's certificate.
//!
//! Per device the service moves between three states:
//!
//! ```text
//! (no secret) --post OOB--> (secret pending) --provreq, good sig--> Approved
//!      ^                          |
//!      +--- provreq, bad sig -----+   (secret consumed either way)
//! ```
//!
//! A caller with a valid hub certificate for the device (or an admin/plugin
//! certificate) skips the secret entirely and the reply is signed with the
//! empty key.

use std::collections::BTreeMap;
use std::sync::Arc;

use idprov_auth::cert::parse_cert_pem;
use idprov_auth::{
    create_leaf_cert, signer, validate_device_id, CertAuthority, CertError, DevicePublicKey,
    OobStore, OobVerdict, PeerIdentity, Role,
};
use idprov_proto::{
    DeviceStatusMessage, Directory, OobSecretMessage, ProvisionRequest, ProvisionResponse,
    ProvisionStatus, Signed,
};

use crate::archive::CertArchive;
use crate::error::ServiceError;

/// Issued certificates start this far in the past to absorb clock skew
/// between hub and device.
pub const CLOCK_SKEW: time::Duration = time::Duration::seconds(10);

/// Default lifetime of device certificates.
pub const DEFAULT_VALIDITY_DAYS: u32 = 30;

/// Default retry hint in `Waiting` responses.
pub const DEFAULT_RETRY_SEC: u32 = 30;

/// Tunables of [`ProvisionService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub validity_days: u32,
    pub retry_sec: u32,
    /// Extra services announced in the directory.
    pub services: BTreeMap<String, String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            retry_sec: DEFAULT_RETRY_SEC,
            services: BTreeMap::new(),
        }
    }
}

/// The provisioning state machine.
///
/// Peers passed in must already be filtered for validity: an expired
/// certificate is handed in as `None`.
pub struct ProvisionService {
    ca: Option<Arc<CertAuthority>>,
    oob: OobStore,
    archive: CertArchive,
    directory: Directory,
    validity_days: u32,
    retry_sec: u32,
}

impl std::fmt::Debug for ProvisionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionService")
            .field("has_ca", &self.ca.is_some())
            .field("pending_secrets", &self.oob.len())
            .field("archive", &self.archive)
            .field("validity_days", &self.validity_days)
            .finish()
    }
}

impl ProvisionService {
    pub fn new(
        ca: Option<Arc<CertAuthority>>,
        archive: CertArchive,
        settings: ServiceSettings,
    ) -> Self {
        let ca_pem = ca.as_deref().map(CertAuthority::cert_pem).unwrap_or_default();
        let directory = Directory::new(ca_pem, settings.services);
        Self {
            ca,
            oob: OobStore::new(),
            archive,
            directory,
            validity_days: settings.validity_days,
            retry_sec: settings.retry_sec,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn oob_store(&self) -> &OobStore {
        &self.oob
    }

    pub fn archive(&self) -> &CertArchive {
        &self.archive
    }

    /// Register an OOB secret. Only admin and plugin certificates may do so.
    pub fn post_oob_secret(
        &self,
        peer: Option<&PeerIdentity>,
        body: &[u8],
    ) -> Result<(), ServiceError> {
        let peer = peer.ok_or(ServiceError::Unauthorized("client certificate required"))?;
        if !peer.role.is_privileged() {
            tracing::warn!(
                cn = %peer.common_name,
                role = %peer.role,
                "OOB secret rejected: caller is not admin or plugin"
            );
            return Err(ServiceError::Unauthorized("admin or plugin role required"));
        }

        let msg: OobSecretMessage = serde_json::from_slice(body)
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;
        if msg.device_id.is_empty() {
            return Err(ServiceError::MissingField("deviceID"));
        }
        validate_device_id(&msg.device_id)
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;
        if msg.oob_secret.is_empty() {
            return Err(ServiceError::MissingField("oobSecret"));
        }

        self.oob.put(&msg.device_id, &msg.oob_secret);
        tracing::info!(
            device_id = %msg.device_id,
            by = %peer.common_name,
            "OOB secret stored"
        );
        Ok(())
    }

    /// Handle a provisioning request.
    pub fn provision(
        &self,
        peer: Option<&PeerIdentity>,
        body: &[u8],
    ) -> Result<ProvisionResponse, ServiceError> {
        let req: ProvisionRequest = serde_json::from_slice(body)
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;
        if req.device_id.is_empty() {
            return Err(ServiceError::MissingField("deviceID"));
        }
        validate_device_id(&req.device_id)
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;
        if req.ip.is_empty() {
            return Err(ServiceError::MissingField("ip"));
        }
        if req.public_key_pem.is_empty() {
            return Err(ServiceError::MissingField("publicKeyPEM"));
        }
        let public_key = DevicePublicKey::from_pem(&req.public_key_pem)
            .map_err(|e| ServiceError::InvalidPublicKey(e.to_string()))?;

        // A certificate that vouches for this device wins over the OOB path
        // and leaves any pending secret untouched.
        if let Some(peer) = peer.filter(|p| p.may_provision(&req.device_id)) {
            tracing::info!(
                device_id = %req.device_id,
                by = %peer.common_name,
                role = %peer.role,
                ip = %req.ip,
                "Certificate-authenticated provisioning request"
            );
            return self.issue(&req.device_id, &public_key, "");
        }

        let canonical = req
            .canonical_bytes()
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;

        match self
            .oob
            .verify_and_consume(&req.device_id, &canonical, &req.signature)
        {
            OobVerdict::Missing => {
                tracing::info!(device_id = %req.device_id, ip = %req.ip, "No OOB secret yet, device waiting");
                Ok(ProvisionResponse::waiting(self.retry_sec))
            }
            OobVerdict::Rejected => {
                tracing::warn!(device_id = %req.device_id, ip = %req.ip, "OOB signature mismatch, secret discarded");
                Ok(ProvisionResponse::rejected())
            }
            OobVerdict::Verified(secret) => {
                tracing::info!(device_id = %req.device_id, ip = %req.ip, "OOB signature verified");
                self.issue(&req.device_id, &public_key, &secret)
            }
        }
    }

    fn issue(
        &self,
        device_id: &str,
        public_key: &DevicePublicKey,
        secret: &str,
    ) -> Result<ProvisionResponse, ServiceError> {
        let ca = self.ca.as_deref().ok_or_else(|| {
            tracing::error!(device_id = %device_id, "Cannot issue certificate: no CA loaded");
            ServiceError::CaUnavailable
        })?;

        let not_before = time::OffsetDateTime::now_utc() - CLOCK_SKEW;
        let cert = create_leaf_cert(
            device_id,
            Role::IoTDevice,
            public_key,
            Some(ca),
            not_before,
            self.validity_days,
        )
        .map_err(|e| {
            tracing::error!(device_id = %device_id, error = %e, "Certificate creation failed");
            match e {
                CertError::MissingCa => ServiceError::CaUnavailable,
                other => ServiceError::CertificateCreationFailed(other.to_string()),
            }
        })?;

        self.archive.save(device_id, &cert.pem).map_err(|e| {
            tracing::error!(device_id = %device_id, error = %e, "Failed to archive certificate");
            ServiceError::ArchiveWriteFailed(e.to_string())
        })?;

        let mut resp = ProvisionResponse::approved(ca.cert_pem(), cert.pem);
        let canonical = resp
            .canonical_bytes()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        resp.set_signature(signer::sign(&canonical, secret));

        tracing::info!(
            device_id = %device_id,
            validity_days = self.validity_days,
            "Device certificate issued"
        );
        Ok(resp)
    }

    /// Status snapshot for a device. Devices may query themselves; admin and
    /// plugin certificates may query anyone.
    pub fn device_status(
        &self,
        peer: Option<&PeerIdentity>,
        device_id: &str,
    ) -> Result<DeviceStatusMessage, ServiceError> {
        let peer = peer.ok_or(ServiceError::Unauthorized("client certificate required"))?;
        validate_device_id(device_id)
            .map_err(|e| ServiceError::MalformedRequest(e.to_string()))?;
        if !peer.role.is_privileged() && peer.common_name != device_id {
            return Err(ServiceError::Unauthorized("not permitted to query this device"));
        }

        let current = self
            .archive
            .lookup(device_id)
            .filter(|pem| archived_cert_is_current(pem));

        let (status, client_cert_pem) = match current {
            Some(pem) => (ProvisionStatus::Approved, pem),
            None => (ProvisionStatus::Waiting, String::new()),
        };

        Ok(DeviceStatusMessage {
            device_id: device_id.to_string(),
            status,
            ca_cert_pem: self.directory.ca_cert_pem.clone(),
            client_cert_pem,
        })
    }
}

fn archived_cert_is_current(pem: &str) -> bool {
    parse_cert_pem(pem)
        .and_then(|der| PeerIdentity::from_der(&der))
        .is_ok_and(|identity| identity.is_valid_now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use idprov_auth::{create_ca, create_ecdsa_keys};
    use tempfile::TempDir;

    struct Fixture {
        service: ProvisionService,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let ca = Arc::new(create_ca("Test CA", 30).unwrap());
        let service = ProvisionService::new(
            Some(ca),
            CertArchive::new(dir.path()),
            ServiceSettings::default(),
        );
        Fixture { service, _dir: dir }
    }

    fn peer(cn: &str, role: Role) -> PeerIdentity {
        PeerIdentity {
            common_name: cn.to_string(),
            role,
            not_before: 0,
            not_after: i64::MAX,
        }
    }

    fn signed_request(device_id: &str, secret: &str) -> Vec<u8> {
        let key = create_ecdsa_keys().unwrap();
        let mut req = ProvisionRequest::new(device_id, "10.0.0.2", key.public_key_pem());
        let canonical = req.canonical_bytes().unwrap();
        req.set_signature(signer::sign(&canonical, secret));
        serde_json::to_vec(&req).unwrap()
    }

    fn oob_body(device_id: &str, secret: &str) -> Vec<u8> {
        serde_json::to_vec(&OobSecretMessage::new(device_id, secret)).unwrap()
    }

    fn verify_response(resp: &ProvisionResponse, secret: &str) -> bool {
        let canonical = resp.canonical_bytes().unwrap();
        signer::verify(&canonical, secret, &resp.signature).is_ok()
    }

    // ========================================================================
    // OOB path
    // ========================================================================

    #[test]
    fn test_waiting_without_secret() {
        let f = fixture();
        let resp = f.service.provision(None, &signed_request("device1", "s")).unwrap();
        assert_eq!(resp.status, ProvisionStatus::Waiting);
        assert_eq!(resp.retry_sec, DEFAULT_RETRY_SEC);
        assert!(resp.client_cert_pem.is_empty());
    }

    #[test]
    fn test_approved_with_matching_secret() {
        let f = fixture();
        let admin = peer("admin", Role::Admin);
        f.service
            .post_oob_secret(Some(&admin), &oob_body("device1", "secret1"))
            .unwrap();

        let resp = f
            .service
            .provision(None, &signed_request("device1", "secret1"))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Approved);
        assert!(verify_response(&resp, "secret1"));
        assert!(!verify_response(&resp, ""));
        assert!(!f.service.oob_store().peek("device1"));

        let der = parse_cert_pem(&resp.client_cert_pem).unwrap();
        let issued = PeerIdentity::from_der(&der).unwrap();
        assert_eq!(issued.common_name, "device1");
        assert_eq!(issued.role, Role::IoTDevice);
        assert_eq!(resp.ca_cert_pem, f.service.directory().ca_cert_pem);

        assert_eq!(
            f.service.archive().lookup("device1").as_deref(),
            Some(resp.client_cert_pem.as_str())
        );
    }

    #[test]
    fn test_rejected_with_wrong_secret_and_secret_consumed() {
        let f = fixture();
        let admin = peer("admin", Role::Admin);
        f.service
            .post_oob_secret(Some(&admin), &oob_body("device1", "secret1"))
            .unwrap();

        let resp = f
            .service
            .provision(None, &signed_request("device1", "guess"))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Rejected);
        assert!(resp.client_cert_pem.is_empty());

        // The right secret no longer helps.
        let resp = f
            .service
            .provision(None, &signed_request("device1", "secret1"))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Waiting);
    }

    #[test]
    fn test_secret_is_single_use() {
        let f = fixture();
        let admin = peer("admin", Role::Admin);
        f.service
            .post_oob_secret(Some(&admin), &oob_body("device1", "secret1"))
            .unwrap();

        let body = signed_request("device1", "secret1");
        assert_eq!(
            f.service.provision(None, &body).unwrap().status,
            ProvisionStatus::Approved
        );
        assert_eq!(
            f.service.provision(None, &body).unwrap().status,
            ProvisionStatus::Waiting
        );
    }

    #[test]
    fn test_request_with_altered_field_is_rejected() {
        let f = fixture();
        let admin = peer("admin", Role::Admin);
        f.service
            .post_oob_secret(Some(&admin), &oob_body("device1", "secret1"))
            .unwrap();

        let mut req: ProvisionRequest =
            serde_json::from_slice(&signed_request("device1", "secret1")).unwrap();
        req.ip = "10.0.0.99".to_string();
        let body = serde_json::to_vec(&req).unwrap();

        assert_eq!(
            f.service.provision(None, &body).unwrap().status,
            ProvisionStatus::Rejected
        );
    }

    // ========================================================================
    // Certificate path
    // ========================================================================

    #[test]
    fn test_device_renews_own_cert_with_empty_key() {
        let f = fixture();
        let device = peer("device1", Role::IoTDevice);

        let resp = f
            .service
            .provision(Some(&device), &signed_request("device1", ""))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Approved);
        assert!(verify_response(&resp, ""));
    }

    #[test]
    fn test_cert_path_leaves_pending_secret() {
        let f = fixture();
        let admin = peer("admin", Role::Admin);
        f.service
            .post_oob_secret(Some(&admin), &oob_body("device1", "secret1"))
            .unwrap();

        let device = peer("device1", Role::IoTDevice);
        let resp = f
            .service
            .provision(Some(&device), &signed_request("device1", ""))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Approved);
        assert!(f.service.oob_store().peek("device1"));
    }

    #[test]
    fn test_device_cert_for_other_id_falls_back_to_oob() {
        let f = fixture();
        let device = peer("device1", Role::IoTDevice);
        let resp = f
            .service
            .provision(Some(&device), &signed_request("differentID", ""))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Waiting);
    }

    #[test]
    fn test_plugin_provisions_on_behalf() {
        let f = fixture();
        let plugin = peer("plugin", Role::Plugin);
        let resp = f
            .service
            .provision(Some(&plugin), &signed_request("device7", ""))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Approved);

        let der = parse_cert_pem(&resp.client_cert_pem).unwrap();
        let issued = PeerIdentity::from_der(&der).unwrap();
        assert_eq!(issued.common_name, "device7");
        assert_eq!(issued.role, Role::IoTDevice);
    }

    #[test]
    fn test_client_role_gets_no_shortcut() {
        let f = fixture();
        let client = peer("device1", Role::Client);
        let resp = f
            .service
            .provision(Some(&client), &signed_request("device1", ""))
            .unwrap();
        assert_eq!(resp.status, ProvisionStatus::Waiting);
    }

    // ========================================================================
    // Input validation
    // ========================================================================

    #[test]
    fn test_malformed_body() {
        let f = fixture();
        assert!(matches!(
            f.service.provision(None, b"{not json"),
            Err(ServiceError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_missing_fields() {
        let f = fixture();
        assert_eq!(
            f.service.provision(None, br#"{"ip":"1.2.3.4","publicKeyPEM":"x"}"#),
            Err(ServiceError::MissingField("deviceID"))
        );
        assert_eq!(
            f.service.provision(None, br#"{"deviceID":"d","publicKeyPEM":"x"}"#),
            Err(ServiceError::MissingField("ip"))
        );
        assert_eq!(
            f.service.provision(None, br#"{"deviceID":"d","ip":"1.2.3.4"}"#),
            Err(ServiceError::MissingField("publicKeyPEM"))
        );
    }

    #[test]
    fn test_bad_public_key() {
        let f = fixture();
        let body = br#"{"deviceID":"d","ip":"1.2.3.4","publicKeyPEM":"garbage","signature":""}"#;
        assert!(matches!(
            f.service.provision(None, body),
            Err(ServiceError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_unsafe_device_id() {
        let f = fixture();
        assert!(matches!(
            f.service.provision(None, &signed_request("../etc", "s")),
            Err(ServiceError::MalformedRequest(_))
        ));
    }

    // ========================================================================
    // OOB registration
    // ========================================================================

    #[test]
    fn test_oob_post_requires_privileged_cert() {
        let f = fixture();
        let body = oob_body("device1", "secret1");

        assert!(matches!(
            f.service.post_oob_secret(None, &body),
            Err(ServiceError::Unauthorized(_))
        ));
        let device = peer("device1", Role::IoTDevice);
        assert!(matches!(
            f.service.post_oob_secret(Some(&device), &body),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(!f.service.oob_store().peek("device1"));

        let plugin = peer("plugin", Role::Plugin);
        f.service.post_oob_secret(Some(&plugin), &body).unwrap();
        assert!(f.service.oob_store().peek("device1"));
    }

    #[test]
    fn test_oob_post_validation() {
        let f = fixture();
        let admin = peer("admin", Role::Admin);
        assert!(matches!(
            f.service.post_oob_secret(Some(&admin), b""),
            Err(ServiceError::MalformedRequest(_))
        ));
        assert_eq!(
            f.service
                .post_oob_secret(Some(&admin), br#"{"oobSecret":"s"}"#),
            Err(ServiceError::MissingField("deviceID"))
        );
        assert_eq!(
            f.service
                .post_oob_secret(Some(&admin), br#"{"deviceID":"d"}"#),
            Err(ServiceError::MissingField("oobSecret"))
        );
    }

    // ========================================================================
    // Failures during issuance
    // ========================================================================

    #[test]
    fn test_no_ca_is_internal_error_and_consumes_secret() {
        let service = ProvisionService::new(None, CertArchive::disabled(), ServiceSettings::default());
        let admin = peer("admin", Role::Admin);
        service
            .post_oob_secret(Some(&admin), &oob_body("device1", "secret1"))
            .unwrap();

        assert_eq!(
            service.provision(None, &signed_request("device1", "secret1")),
            Err(ServiceError::CaUnavailable)
        );
        assert!(!service.oob_store().peek("device1"));
    }

    #[test]
    fn test_archive_failure_is_internal_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let ca = Arc::new(create_ca("Test CA", 30).unwrap());
        let service = ProvisionService::new(
            Some(ca),
            CertArchive::new(blocker.join("archive")),
            ServiceSettings::default(),
        );
        let device = peer("device1", Role::IoTDevice);
        assert!(matches!(
            service.provision(Some(&device), &signed_request("device1", "")),
            Err(ServiceError::ArchiveWriteFailed(_))
        ));
    }

    // ========================================================================
    // Status
    // ========================================================================

    #[test]
    fn test_status_reflects_archive() {
        let f = fixture();
        let device = peer("device1", Role::IoTDevice);

        let status = f.service.device_status(Some(&device), "device1").unwrap();
        assert_eq!(status.status, ProvisionStatus::Waiting);
        assert!(status.client_cert_pem.is_empty());

        let resp = f
            .service
            .provision(Some(&device), &signed_request("device1", ""))
            .unwrap();
        let status = f.service.device_status(Some(&device), "device1").unwrap();
        assert_eq!(status.status, ProvisionStatus::Approved);
        assert_eq!(status.client_cert_pem, resp.client_cert_pem);
    }

    #[test]
    fn test_status_access_control() {
        let f = fixture();
        let device = peer("device1", Role::IoTDevice);
        assert!(matches!(
            f.service.device_status(None, "device1"),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            f.service.device_status(Some(&device), "device2"),
            Err(ServiceError::Unauthorized(_))
        ));
        let admin = peer("admin", Role::Admin);
        assert!(f.service.device_status(Some(&admin), "device2").is_ok());
    }

    #[test]
    fn test_directory_lists_endpoints_and_services() {
        let mut settings = ServiceSettings::default();
        settings
            .services
            .insert("mqtts".to_string(), "tls://hub:8883".to_string());
        let ca = Arc::new(create_ca("Test CA", 30).unwrap());
        let service = ProvisionService::new(Some(ca.clone()), CertArchive::disabled(), settings);

        let dir = service.directory();
        assert_eq!(dir.ca_cert_pem, ca.cert_pem());
        assert_eq!(dir.endpoints.post_provision_request, "/idprov/provreq");
        assert_eq!(dir.services.get("mqtts").map(String::as_str), Some("tls://hub:8883"));
    }
}
