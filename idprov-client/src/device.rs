//! Device side of provisioning.
//!
//! A [`DeviceClient`] owns the device key, the files it keeps between runs
//! and one TLS client. The TLS client is rebuilt whenever the pinned CA or the
//! device certificate changes.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use idprov_auth::cert::parse_cert_pem;
use idprov_auth::{signer, PeerIdentity};
use idprov_discovery::{
    resolve_with_timeout, service_type, ServiceBrowser, DEFAULT_DISCOVERY_TIMEOUT,
};
use idprov_proto::{
    DeviceStatusMessage, Directory, ProvisionRequest, ProvisionResponse, ProvisionStatus, Signed,
    DEVICE_ID_PLACEHOLDER, DIRECTORY_PATH,
};
use rcgen::KeyPair;
use reqwest::StatusCode;

use crate::error::ClientError;
use crate::store::ClientFiles;
use crate::tls::ClientIdentity;
use crate::transport::HttpsTransport;

/// Settings of a [`DeviceClient`].
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    /// Folder holding the key, certificate and CA files.
    pub certs_dir: PathBuf,
    /// Server `host:port`. When unset the service is looked up through
    /// discovery.
    pub server: Option<String>,
    pub service_name: String,
    pub discovery_timeout: Duration,
}

impl DeviceConfig {
    pub fn new(device_id: impl Into<String>, certs_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            certs_dir: certs_dir.into(),
            server: None,
            service_name: idprov_proto::DEFAULT_SERVICE_NAME.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }
}

struct Session {
    authority: String,
    transport: HttpsTransport,
    directory: Directory,
}

/// Provisioning client of one device.
pub struct DeviceClient {
    config: DeviceConfig,
    files: ClientFiles,
    browser: Option<Arc<dyn ServiceBrowser>>,
    key: Option<KeyPair>,
    session: Option<Session>,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("device_id", &self.config.device_id)
            .field("server", &self.session.as_ref().map(|s| &s.authority))
            .field("has_client_cert", &self.has_client_cert())
            .finish_non_exhaustive()
    }
}

impl DeviceClient {
    pub fn new(config: DeviceConfig) -> Self {
        let files = ClientFiles::new(&config.certs_dir, &config.device_id);
        Self {
            config,
            files,
            browser: None,
            key: None,
            session: None,
        }
    }

    /// Look the server up through `browser` when no address is configured.
    pub fn with_browser(mut self, browser: Arc<dyn ServiceBrowser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn files(&self) -> &ClientFiles {
        &self.files
    }

    /// The directory fetched by the last [`start`](Self::start).
    pub fn directory(&self) -> Option<&Directory> {
        self.session.as_ref().map(|s| &s.directory)
    }

    /// Whether requests currently authenticate with the device certificate.
    pub fn has_client_cert(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.transport.has_client_cert())
    }

    /// Connect to the server and fetch the directory.
    ///
    /// Without a stored CA the server is trusted on first contact and the CA
    /// from its directory is pinned. Starting again refetches the directory.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        let stored_ca = self.files.load_ca()?;
        let key = self.files.load_or_create_key()?;

        let (authority, directory_path) = self.locate_server().await?;

        // A lapsed certificate is left out so the device falls back to the
        // OOB path and checks the reply against its secret.
        let identity = match self.files.load_cert()? {
            Some(cert_pem) if cert_is_current(&cert_pem) => {
                Some(ClientIdentity::new(cert_pem, key.serialize_pem()))
            }
            Some(_) => {
                tracing::warn!(
                    path = %self.files.cert_path().display(),
                    "Stored certificate is expired or unreadable, connecting without it"
                );
                None
            }
            None => None,
        };

        let transport = HttpsTransport::new(&authority, stored_ca.as_deref(), identity.as_ref())?;
        let directory: Directory = transport.get_json(&directory_path).await?;
        tracing::info!(
            server = %authority,
            device_id = %self.config.device_id,
            client_cert = identity.is_some(),
            "Fetched provisioning directory"
        );

        let transport = match stored_ca {
            Some(_) => transport,
            None => {
                if directory.ca_cert_pem.is_empty() {
                    return Err(ClientError::MalformedResponse(
                        "directory carries no CA certificate".to_string(),
                    ));
                }
                self.files.save_ca(&directory.ca_cert_pem)?;
                tracing::info!(
                    path = %self.files.ca_path().display(),
                    "Pinned hub CA from directory"
                );
                HttpsTransport::new(&authority, Some(&directory.ca_cert_pem), identity.as_ref())?
            }
        };

        self.key = Some(key);
        self.session = Some(Session {
            authority,
            transport,
            directory,
        });
        Ok(())
    }

    /// Drop the TLS client. The files stay on disk.
    pub fn stop(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(device_id = %self.config.device_id, "Device client stopped");
        }
    }

    async fn locate_server(&self) -> Result<(String, String), ClientError> {
        if let Some(server) = self.config.server.as_deref().filter(|s| !s.is_empty()) {
            return Ok((server.to_string(), DIRECTORY_PATH.to_string()));
        }

        let browser = self.browser.as_deref().ok_or_else(|| ClientError::DiscoveryTimeout {
            service_type: service_type(&self.config.service_name),
            timeout: Duration::ZERO,
        })?;
        let record = resolve_with_timeout(
            browser,
            &service_type(&self.config.service_name),
            self.config.discovery_timeout,
        )
        .await?;
        tracing::info!(
            instance = %record.instance_name,
            address = %record.authority(),
            "Discovered provisioning server"
        );
        let path = record.path().unwrap_or(DIRECTORY_PATH).to_string();
        Ok((record.authority(), path))
    }

    fn session(&self) -> Result<&Session, ClientError> {
        self.session.as_ref().ok_or(ClientError::NotStarted)
    }

    /// Request a certificate.
    ///
    /// `device_id` defaults to this device. `secret` signs the request; pass
    /// an empty secret to renew with the current certificate. Waiting and
    /// Rejected responses are returned as they are. An approved certificate
    /// for this device is saved and the TLS client switches to it.
    pub async fn post_provisioning_request(
        &mut self,
        device_id: Option<&str>,
        secret: &str,
    ) -> Result<ProvisionResponse, ClientError> {
        let session = self.session()?;
        let key = self.key.as_ref().ok_or(ClientError::NotStarted)?;
        let device_id = device_id
            .filter(|id| !id.is_empty())
            .unwrap_or(self.config.device_id.as_str())
            .to_string();

        let ip = outbound_ip(&session.authority).await?;
        let mut request = ProvisionRequest::new(&device_id, ip.to_string(), key.public_key_pem());
        let canonical = request
            .canonical_bytes()
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        request.set_signature(signer::sign(&canonical, secret));

        let response: ProvisionResponse = session
            .transport
            .post_json(&session.directory.endpoints.post_provision_request, &request)
            .await?;

        if response.status != ProvisionStatus::Approved
            || response.ca_cert_pem.is_empty()
            || response.client_cert_pem.is_empty()
        {
            tracing::info!(
                device_id = %device_id,
                status = %response.status,
                retry_sec = response.retry_sec,
                "Provisioning not approved"
            );
            return Ok(response);
        }

        // A certificate-authenticated request is answered under the empty key.
        let verify_key = if session.transport.has_client_cert() {
            ""
        } else {
            secret
        };
        let canonical = response
            .canonical_bytes()
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        signer::verify(&canonical, verify_key, &response.signature).map_err(|e| {
            tracing::warn!(device_id = %device_id, error = %e, "Response signature rejected");
            ClientError::SignatureInvalid
        })?;

        if device_id != self.config.device_id {
            tracing::info!(device_id = %device_id, "Certificate issued for another device");
            return Ok(response);
        }

        self.files
            .save_credentials(&response.ca_cert_pem, &response.client_cert_pem)?;
        tracing::info!(
            device_id = %device_id,
            path = %self.files.cert_path().display(),
            "Device certificate saved"
        );

        let identity = ClientIdentity::new(response.client_cert_pem.clone(), key.serialize_pem());
        let transport =
            HttpsTransport::new(&session.authority, Some(&response.ca_cert_pem), Some(&identity))?;
        if let Some(session) = self.session.as_mut() {
            session.transport = transport;
        }
        Ok(response)
    }

    /// Status of `device_id` (default: this device) as the server sees it.
    pub async fn get_device_status(
        &self,
        device_id: Option<&str>,
    ) -> Result<DeviceStatusMessage, ClientError> {
        let session = self.session()?;
        let device_id = device_id
            .filter(|id| !id.is_empty())
            .unwrap_or(self.config.device_id.as_str());
        let path = session.transport.expand_path(
            &session.directory.endpoints.status,
            DEVICE_ID_PLACEHOLDER,
            device_id,
        )?;
        session.transport.get_json(&path).await
    }

    /// POST an arbitrary body. Meant for exercising the server with payloads
    /// the typed API cannot produce.
    pub async fn post_raw(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        self.session()?.transport.post_raw(path, body).await
    }
}

fn cert_is_current(pem: &str) -> bool {
    parse_cert_pem(pem)
        .and_then(|der| PeerIdentity::from_der(&der))
        .is_ok_and(|identity| identity.is_valid_now())
}

/// Local address of the interface that routes to `authority`.
async fn outbound_ip(authority: &str) -> Result<IpAddr, ClientError> {
    let bind = if authority.starts_with('[') {
        "[::]:0"
    } else {
        "0.0.0.0:0"
    };
    // Connecting a UDP socket sends nothing; it only selects the route.
    let socket = tokio::net::UdpSocket::bind(bind).await?;
    socket.connect(authority).await?;
    Ok(socket.local_addr()?.ip())
}
