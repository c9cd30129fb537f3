//! Administrator side: registering OOB secrets.

use idprov_proto::{Directory, OobSecretMessage, DIRECTORY_PATH};
use reqwest::StatusCode;

use crate::error::ClientError;
use crate::tls::ClientIdentity;
use crate::transport::HttpsTransport;

/// Posts OOB secrets on behalf of an administrator or plugin.
///
/// The server only accepts secrets from certificates with the admin or plugin
/// role; anything else comes back as [`ClientError::Unauthorized`].
#[derive(Debug)]
pub struct OobClient {
    server: String,
    identity: ClientIdentity,
    ca_cert_pem: String,
    session: Option<(HttpsTransport, Directory)>,
}

impl OobClient {
    /// `server` is `host:port`; `ca_cert_pem` is the hub CA the server must
    /// chain to.
    pub fn new(
        server: impl Into<String>,
        identity: ClientIdentity,
        ca_cert_pem: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            identity,
            ca_cert_pem: ca_cert_pem.into(),
            session: None,
        }
    }

    /// Connect and fetch the directory. Starting again refetches it.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        let transport =
            HttpsTransport::new(&self.server, Some(&self.ca_cert_pem), Some(&self.identity))?;
        let directory: Directory = transport.get_json(DIRECTORY_PATH).await?;
        tracing::debug!(server = %self.server, "OOB client connected");
        self.session = Some((transport, directory));
        Ok(())
    }

    pub fn stop(&mut self) {
        self.session = None;
    }

    pub fn directory(&self) -> Option<&Directory> {
        self.session.as_ref().map(|(_, directory)| directory)
    }

    /// Register `secret` for `device_id`.
    pub async fn post_oob_secret(&self, device_id: &str, secret: &str) -> Result<(), ClientError> {
        let (transport, directory) = self.session.as_ref().ok_or(ClientError::NotStarted)?;
        let body = serde_json::to_vec(&OobSecretMessage::new(device_id, secret))
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;

        let (status, response) = transport
            .post_raw(&directory.endpoints.post_oob_secret, body)
            .await?;
        let message = || String::from_utf8_lossy(&response).trim().to_string();
        match status {
            s if s.is_success() => {
                tracing::info!(device_id = %device_id, "OOB secret registered");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized(message())),
            s => Err(ClientError::Http {
                status: s.as_u16(),
                message: message(),
            }),
        }
    }

    /// POST an arbitrary body.
    pub async fn post_raw(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let (transport, _) = self.session.as_ref().ok_or(ClientError::NotStarted)?;
        transport.post_raw(path, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idprov_auth::{create_ca, create_client_cert, Role};

    #[tokio::test]
    async fn test_post_before_start() {
        let ca = create_ca("Hub CA", 1).unwrap();
        let (cert, key) = create_client_cert("plugin", Role::Plugin, &ca, 1).unwrap();
        let client = OobClient::new(
            "127.0.0.1:8880",
            ClientIdentity::new(cert.pem, key.serialize_pem()),
            ca.cert_pem(),
        );

        assert!(client.directory().is_none());
        assert!(matches!(
            client.post_oob_secret("device1", "secret1").await,
            Err(ClientError::NotStarted)
        ));
    }
}
