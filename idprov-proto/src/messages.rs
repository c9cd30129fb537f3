use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    DIRECTORY_PATH, DIRECTORY_VERSION, POST_OOB_SECRET_PATH, POST_PROVISION_REQUEST_PATH,
    STATUS_PATH,
};

// ============================================================================
// Provisioning status
// ============================================================================

/// Outcome of a provisioning request as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionStatus {
    /// A certificate was issued.
    Approved,
    /// The OOB signature did not match. The stored secret has been consumed.
    Rejected,
    /// No OOB secret is on file for the device yet.
    Waiting,
}

impl ProvisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Waiting => "Waiting",
        }
    }
}

impl fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Signed messages
// ============================================================================

/// Messages carrying an HMAC signature over their own canonical form.
pub trait Signed {
    /// The signature currently attached to the message.
    fn signature(&self) -> &str;

    /// Attach a signature.
    fn set_signature(&mut self, signature: String);

    /// Compact JSON of the message with an empty signature field.
    ///
    /// Both peers serialize the same struct with the same field order, so the
    /// output is byte-identical on either side of the connection.
    fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error>
    where
        Self: Clone + Serialize,
    {
        let mut unsigned = self.clone();
        unsigned.set_signature(String::new());
        serde_json::to_vec(&unsigned)
    }
}

/// Sent by a device to obtain (or renew) its client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    #[serde(rename = "deviceID", default)]
    pub device_id: String,
    #[serde(rename = "ip", default)]
    pub ip: String,
    #[serde(rename = "publicKeyPEM", default)]
    pub public_key_pem: String,
    #[serde(rename = "signature", default)]
    pub signature: String,
}

impl ProvisionRequest {
    pub fn new(
        device_id: impl Into<String>,
        ip: impl Into<String>,
        public_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            ip: ip.into(),
            public_key_pem: public_key_pem.into(),
            signature: String::new(),
        }
    }
}

impl Signed for ProvisionRequest {
    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }
}

/// Server reply to a [`ProvisionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    /// Suggested delay before retrying a `Waiting` request.
    #[serde(rename = "retrySec", default, skip_serializing_if = "is_zero")]
    pub retry_sec: u32,
    #[serde(rename = "status")]
    pub status: ProvisionStatus,
    #[serde(rename = "caCert", default)]
    pub ca_cert_pem: String,
    #[serde(rename = "clientCert", default)]
    pub client_cert_pem: String,
    #[serde(rename = "signature", default)]
    pub signature: String,
}

impl ProvisionResponse {
    /// An `Approved` response carrying the issued certificate.
    pub fn approved(ca_cert_pem: impl Into<String>, client_cert_pem: impl Into<String>) -> Self {
        Self {
            retry_sec: 0,
            status: ProvisionStatus::Approved,
            ca_cert_pem: ca_cert_pem.into(),
            client_cert_pem: client_cert_pem.into(),
            signature: String::new(),
        }
    }

    /// A `Waiting` response with a retry hint.
    pub fn waiting(retry_sec: u32) -> Self {
        Self {
            retry_sec,
            status: ProvisionStatus::Waiting,
            ca_cert_pem: String::new(),
            client_cert_pem: String::new(),
            signature: String::new(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            retry_sec: 0,
            status: ProvisionStatus::Rejected,
            ca_cert_pem: String::new(),
            client_cert_pem: String::new(),
            signature: String::new(),
        }
    }
}

impl Signed for ProvisionResponse {
    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

// ============================================================================
// Administrative messages
// ============================================================================

/// Out-of-band secret registered by an administrator or plugin.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OobSecretMessage {
    #[serde(rename = "deviceID", default)]
    pub device_id: String,
    #[serde(rename = "oobSecret", default)]
    pub oob_secret: String,
    /// Reserved. Accepted and ignored by the server.
    #[serde(rename = "validUntil", default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
}

impl OobSecretMessage {
    pub fn new(device_id: impl Into<String>, oob_secret: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            oob_secret: oob_secret.into(),
            valid_until: None,
        }
    }
}

// The secret must not end up in logs through `{:?}`.
impl fmt::Debug for OobSecretMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OobSecretMessage")
            .field("device_id", &self.device_id)
            .field("oob_secret", &"<redacted>")
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusMessage {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(rename = "status")]
    pub status: ProvisionStatus,
    #[serde(rename = "caCert", default)]
    pub ca_cert_pem: String,
    #[serde(rename = "clientCert", default, skip_serializing_if = "String::is_empty")]
    pub client_cert_pem: String,
}

// ============================================================================
// Directory
// ============================================================================

/// Endpoint paths announced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEndpoints {
    #[serde(rename = "directory")]
    pub directory: String,
    /// Template containing `{deviceID}`.
    #[serde(rename = "status")]
    pub status: String,
    #[serde(rename = "postOobSecret")]
    pub post_oob_secret: String,
    #[serde(rename = "postProvisionRequest")]
    pub post_provision_request: String,
}

impl Default for DirectoryEndpoints {
    fn default() -> Self {
        Self {
            directory: DIRECTORY_PATH.to_string(),
            status: STATUS_PATH.to_string(),
            post_oob_secret: POST_OOB_SECRET_PATH.to_string(),
            post_provision_request: POST_PROVISION_REQUEST_PATH.to_string(),
        }
    }
}

/// Self-description served at [`DIRECTORY_PATH`].
///
/// Built once when the server starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(rename = "endpoints")]
    pub endpoints: DirectoryEndpoints,
    /// Other services the hub offers, name to URL.
    #[serde(rename = "services", default)]
    pub services: BTreeMap<String, String>,
    #[serde(rename = "caCert")]
    pub ca_cert_pem: String,
    #[serde(rename = "version")]
    pub version: String,
}

impl Directory {
    pub fn new(ca_cert_pem: impl Into<String>, services: BTreeMap<String, String>) -> Self {
        Self {
            endpoints: DirectoryEndpoints::default(),
            services,
            ca_cert_pem: ca_cert_pem.into(),
            version: DIRECTORY_VERSION.to_string(),
        }
    }
}
