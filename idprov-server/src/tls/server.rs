//! TLS server configuration.
//!
//! Uses rustls 0.23+ with the ring provider selected explicitly.

use std::sync::Arc;
use std::time::Duration;

use idprov_auth::cert::{pem_to_der, CERTIFICATE_LABEL};
use idprov_auth::PeerIdentity;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, RootCertStore};
use rustls::{ServerConfig, SignatureScheme};

/// PEM label of PKCS#8 private keys.
const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// TLS server configuration wrapper.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Get the underlying rustls ServerConfig.
    pub fn into_rustls_config(self) -> Arc<ServerConfig> {
        self.config
    }

    /// Build the provisioning server config.
    ///
    /// Client certificates are requested and, when sent, must chain to the
    /// hub CA. Clients without a certificate are let through.
    pub fn new(
        server_cert_pem: &str,
        server_key_pem: &str,
        ca_cert_der: &[u8],
    ) -> Result<Self, TlsConfigError> {
        let cert_der = pem_to_der(server_cert_pem, CERTIFICATE_LABEL)
            .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
        check_validity(&cert_der)?;
        let key_der = pem_to_der(server_key_pem, PRIVATE_KEY_LABEL)
            .map_err(|e| TlsConfigError::InvalidKey(e.to_string()))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots
            .add(CertificateDer::from(ca_cert_der.to_vec()))
            .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;

        let webpki = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .allow_unauthenticated()
            .build()
            .map_err(|e| TlsConfigError::Verifier(e.to_string()))?;
        let verifier = Arc::new(ExpiryTolerantVerifier { inner: webpki });

        let cert = CertificateDer::from(cert_der);
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der));

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsConfigError::Config(e.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![cert], key)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

/// Verify the server certificate validity period.
fn check_validity(cert_der: &[u8]) -> Result<(), TlsConfigError> {
    let identity =
        PeerIdentity::from_der(cert_der).map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
    let now = time::OffsetDateTime::now_utc().unix_timestamp();

    if now < identity.not_before {
        return Err(TlsConfigError::CertNotYetValid {
            not_before: identity.not_before,
            now,
        });
    }
    if now > identity.not_after {
        return Err(TlsConfigError::CertExpired {
            not_after: identity.not_after,
            now,
        });
    }
    Ok(())
}

/// Client verifier that lets expired (but otherwise valid) hub certificates
/// through the handshake.
///
/// A device whose certificate lapsed must still reach the OOB path. The
/// service ignores certificates outside their validity window, so accepting
/// them here grants nothing.
#[derive(Debug)]
struct ExpiryTolerantVerifier {
    inner: Arc<dyn ClientCertVerifier>,
}

impl ClientCertVerifier for ExpiryTolerantVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        match self.inner.verify_client_cert(end_entity, intermediates, now) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::Expired | CertificateError::ExpiredContext { .. },
            )) => {
                // Re-check the chain at the last instant the leaf was valid.
                let identity = PeerIdentity::from_der(end_entity.as_ref()).map_err(|_| {
                    rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
                })?;
                let not_after = u64::try_from(identity.not_after).map_err(|_| {
                    rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
                })?;
                let then = UnixTime::since_unix_epoch(Duration::from_secs(not_after));
                self.inner.verify_client_cert(end_entity, intermediates, then)
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Errors that can occur during TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("invalid certificate: {0}")]
    InvalidCert(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("failed to build verifier: {0}")]
    Verifier(String),
    #[error("failed to build config: {0}")]
    Config(String),
    #[error("certificate not yet valid (not_before: {not_before}, now: {now})")]
    CertNotYetValid { not_before: i64, now: i64 },
    #[error("certificate expired (not_after: {not_after}, now: {now})")]
    CertExpired { not_after: i64, now: i64 },
}
