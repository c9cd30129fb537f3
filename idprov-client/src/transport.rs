//! HTTPS transport to the provisioning server.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::ClientError;
use crate::tls::{build_client_config, ClientIdentity};

/// Per-request timeout. The TLS handshake is covered by it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One TLS client bound to a server. Replaced as a whole when the identity or
/// the pinned CA changes.
#[derive(Debug)]
pub struct HttpsTransport {
    client: reqwest::Client,
    base: Url,
    has_client_cert: bool,
    ca_pinned: bool,
}

impl HttpsTransport {
    /// Build a transport for `https://{authority}`.
    pub fn new(
        authority: &str,
        ca_cert_pem: Option<&str>,
        identity: Option<&ClientIdentity>,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(&format!("https://{authority}"))
            .map_err(|e| ClientError::TlsConfig(format!("server address {authority}: {e}")))?;
        let tls = build_client_config(ca_cert_pem, identity)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::TlsConfig(e.to_string()))?;

        tracing::debug!(
            server = %base,
            client_cert = identity.is_some(),
            ca_pinned = ca_cert_pem.is_some(),
            "TLS client ready"
        );

        Ok(Self {
            client,
            base,
            has_client_cert: identity.is_some(),
            ca_pinned: ca_cert_pem.is_some(),
        })
    }

    /// Whether requests authenticate with a client certificate.
    pub fn has_client_cert(&self) -> bool {
        self.has_client_cert
    }

    pub fn ca_pinned(&self) -> bool {
        self.ca_pinned
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Expand an endpoint template such as `/idprov/status/{deviceID}`,
    /// putting `value` in place of the `placeholder` segment. The value is
    /// percent-encoded, so `?`, `#`, `%` and spaces stay inside the segment.
    pub fn expand_path(
        &self,
        template: &str,
        placeholder: &str,
        value: &str,
    ) -> Result<String, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ClientError::MalformedResponse(format!("cannot add a path to {}", self.base))
            })?
            .clear()
            .extend(
                template
                    .split('/')
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| if segment == placeholder { value } else { segment }),
            );
        Ok(url.path().to_string())
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::MalformedResponse(format!("bad endpoint path {path}: {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path)?;
        let (status, body) = self.send(self.client.get(url.clone()), &url).await?;
        decode(status, &body)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(body).map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        let (status, body) = self.post_raw(path, payload).await?;
        decode(status, &body)
    }

    /// POST `body` as is, returning status and body without interpreting
    /// either.
    pub async fn post_raw(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let url = self.url(path)?;
        let request = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, &url).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let response = request.send().await.map_err(|e| ClientError::TlsConnect {
            url: url.to_string(),
            message: error_chain(&e),
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| ClientError::TlsConnect {
            url: url.to_string(),
            message: error_chain(&e),
        })?;
        Ok((status, body.to_vec()))
    }
}

/// Map a response to `T`, turning non-2xx statuses into errors.
fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, ClientError> {
    let message = || String::from_utf8_lossy(body).trim().to_string();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized(message()));
    }
    if !status.is_success() {
        return Err(ClientError::Http {
            status: status.as_u16(),
            message: message(),
        });
    }
    serde_json::from_slice(body).map_err(|e| ClientError::MalformedResponse(e.to_string()))
}

/// reqwest wraps the interesting cause (TLS alert, refused connection) a few
/// levels deep.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use idprov_proto::{Directory, DEVICE_ID_PLACEHOLDER, STATUS_PATH};

    #[test]
    fn test_decode_statuses() {
        let ok: Result<serde_json::Value, _> = decode(StatusCode::OK, br#"{"a":1}"#);
        assert!(ok.is_ok());

        let unauthorized: Result<Directory, _> =
            decode(StatusCode::UNAUTHORIZED, b"admin or plugin role required");
        assert!(matches!(unauthorized, Err(ClientError::Unauthorized(m)) if m.contains("admin")));

        let bad: Result<Directory, _> = decode(StatusCode::BAD_REQUEST, b"missing field");
        assert!(matches!(bad, Err(ClientError::Http { status: 400, .. })));

        let garbage: Result<Directory, _> = decode(StatusCode::OK, b"<html>");
        assert!(matches!(garbage, Err(ClientError::MalformedResponse(_))));
    }

    #[test]
    fn test_expand_path_encodes_the_value() {
        let transport = HttpsTransport::new("127.0.0.1:8880", None, None).unwrap();
        let expand = |id| {
            transport
                .expand_path(STATUS_PATH, DEVICE_ID_PLACEHOLDER, id)
                .unwrap()
        };

        assert_eq!(expand("device1"), "/idprov/status/device1");
        assert_eq!(expand("dev?1"), "/idprov/status/dev%3F1");
        assert_eq!(expand("a #b%"), "/idprov/status/a%20%23b%25");

        let url = transport.url(&expand("dev?1")).unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(url.path(), "/idprov/status/dev%3F1");
    }

    #[test]
    fn test_endpoint_paths_join_onto_authority() {
        let transport = HttpsTransport::new("127.0.0.1:8880", None, None).unwrap();
        assert_eq!(
            transport.url("/idprov/directory").unwrap().as_str(),
            "https://127.0.0.1:8880/idprov/directory"
        );
        assert!(!transport.has_client_cert());
        assert!(!transport.ca_pinned());
    }
}
