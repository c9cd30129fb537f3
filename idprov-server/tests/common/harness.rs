//! Test harness for provisioning E2E tests.
//!
//! Starts a real TLS server on 127.0.0.1 with a fresh CA and a temporary
//! archive; clients talk to it over the network like a device would.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use idprov_auth::{create_ca, create_client_cert, create_server_cert, CertAuthority, Role};
use idprov_client::{ClientIdentity, DeviceClient, DeviceConfig, OobClient};
use idprov_discovery::ServiceAdvertiser;
use idprov_server::tls::TlsServerConfig;
use idprov_server::{CertArchive, IdProvServer, ProvisionService, ServiceSettings};
use tempfile::TempDir;

/// A running provisioning server.
pub struct TestHub {
    pub ca: Arc<CertAuthority>,
    pub server: IdProvServer,
    pub addr: SocketAddr,
    pub archive: TempDir,
}

impl TestHub {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Start a hub that advertises itself through `advertiser`.
    pub async fn start_with(advertiser: Option<Arc<dyn ServiceAdvertiser>>) -> Self {
        let ca = Arc::new(create_ca("Test Hub CA", 30).expect("Failed to create CA"));
        let (server_cert, server_key) = create_server_cert(
            &["localhost".to_string(), "127.0.0.1".to_string()],
            &ca,
            30,
        )
        .expect("Failed to create server cert");
        let tls = TlsServerConfig::new(&server_cert.pem, &server_key.serialize_pem(), ca.cert_der())
            .expect("Failed to build TLS config");

        let archive = TempDir::new().expect("Failed to create archive dir");
        let service = ProvisionService::new(
            Some(ca.clone()),
            CertArchive::new(archive.path()),
            ServiceSettings::default(),
        );

        let mut server = IdProvServer::new(
            Arc::new(service),
            tls.into_rustls_config(),
            "127.0.0.1:0".parse().unwrap(),
            "test-hub",
        );
        if let Some(advertiser) = advertiser {
            server = server.with_advertiser(advertiser);
        }
        let addr = server.start().await.expect("Failed to start server");

        Self {
            ca,
            server,
            addr,
            archive,
        }
    }

    /// `host:port` of the server.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// A client identity issued by the hub CA.
    pub fn identity(&self, common_name: &str, role: Role) -> ClientIdentity {
        let (cert, key) =
            create_client_cert(common_name, role, &self.ca, 1).expect("Failed to create client cert");
        ClientIdentity::new(cert.pem, key.serialize_pem())
    }

    /// An OOB client authenticated with a fresh certificate.
    pub async fn oob_client(&self, common_name: &str, role: Role) -> OobClient {
        let mut client = OobClient::new(
            self.authority(),
            self.identity(common_name, role),
            self.ca.cert_pem(),
        );
        client.start().await.expect("OOB client failed to start");
        client
    }

    /// Register `secret` for `device_id` as the plugin.
    pub async fn post_secret(&self, device_id: &str, secret: &str) {
        self.oob_client("plugin", Role::Plugin)
            .await
            .post_oob_secret(device_id, secret)
            .await
            .expect("Failed to post OOB secret");
    }

    /// A device client keeping its files in `dir`.
    pub fn device(&self, device_id: &str, dir: &Path) -> DeviceClient {
        DeviceClient::new(DeviceConfig::new(device_id, dir).with_server(self.authority()))
    }

    /// Contents of the archived certificate of `device_id`.
    pub fn archived(&self, device_id: &str) -> Option<String> {
        std::fs::read_to_string(self.archive.path().join(format!("{device_id}Cert.pem"))).ok()
    }

    pub async fn stop(mut self) {
        self.server.stop().await;
    }
}

/// A device client that has completed the OOB bootstrap.
pub async fn bootstrapped_device(hub: &TestHub, device_id: &str, dir: &Path) -> DeviceClient {
    hub.post_secret(device_id, "bootstrap-secret").await;
    let mut device = hub.device(device_id, dir);
    device.start().await.expect("Device failed to start");
    let resp = device
        .post_provisioning_request(None, "bootstrap-secret")
        .await
        .expect("Bootstrap request failed");
    assert_eq!(resp.status, idprov_proto::ProvisionStatus::Approved);
    device
}
