use std::path::PathBuf;
use std::time::Duration;

use idprov_auth::CertError;
use idprov_discovery::DiscoveryError;

/// Errors returned by the device and OOB clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is not started")]
    NotStarted,

    #[error("no {service_type} service found within {timeout:?}")]
    DiscoveryTimeout {
        service_type: String,
        timeout: Duration,
    },

    #[error("discovery failed: {0}")]
    Discovery(DiscoveryError),

    #[error("TLS configuration failed: {0}")]
    TlsConfig(String),

    #[error("connection to {url} failed: {message}")]
    TlsConnect { url: String, message: String },

    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("response signature does not verify")]
    SignatureInvalid,

    #[error("invalid certificate in response: {0}")]
    InvalidCertPayload(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("key error: {0}")]
    Key(String),
}

impl From<DiscoveryError> for ClientError {
    fn from(e: DiscoveryError) -> Self {
        match e {
            DiscoveryError::Timeout {
                service_type,
                timeout,
            } => ClientError::DiscoveryTimeout {
                service_type,
                timeout,
            },
            other => ClientError::Discovery(other),
        }
    }
}

impl From<CertError> for ClientError {
    fn from(e: CertError) -> Self {
        ClientError::Key(e.to_string())
    }
}
