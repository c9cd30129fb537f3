//! TLS client configuration.
//!
//! Provides client-side TLS configuration using rustls 0.23+.
//!
//! # Verifiers
//!
//! - Hub CA pinned: standard WebPKI verification against the stored CA.
//! - [`LeapOfFaithVerifier`]: no CA on disk yet. The first directory fetch
//!   accepts the server certificate and the CA it returns is pinned.

use std::sync::Arc;

use idprov_auth::cert::{pem_to_der, CERTIFICATE_LABEL};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use zeroize::Zeroizing;

use crate::error::ClientError;

const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Client TLS identity (certificate + private key).
///
/// The private key uses `Zeroizing` so key material is erased from memory
/// when dropped.
#[derive(Clone)]
pub struct ClientIdentity {
    /// PEM certificate issued by the hub CA
    pub cert_pem: String,
    /// PKCS#8 PEM private key - zeroized on drop
    pub key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem_len", &self.cert_pem.len())
            .finish_non_exhaustive()
    }
}

impl ClientIdentity {
    pub fn new(cert_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: Zeroizing::new(key_pem.into()),
        }
    }

    fn to_rustls(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ClientError> {
        let cert_der = pem_to_der(&self.cert_pem, CERTIFICATE_LABEL)
            .map_err(|e| ClientError::TlsConfig(format!("client certificate: {e}")))?;
        let key_der = pem_to_der(&self.key_pem, PRIVATE_KEY_LABEL)
            .map_err(|e| ClientError::TlsConfig(format!("client key: {e}")))?;
        Ok((
            vec![CertificateDer::from(cert_der)],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        ))
    }
}

/// Accepts any server certificate but still checks handshake signatures, so
/// the peer must hold the key of the certificate it presented.
#[derive(Debug)]
pub struct LeapOfFaithVerifier {
    provider: Arc<CryptoProvider>,
}

impl LeapOfFaithVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Arc<Self> {
        Arc::new(Self { provider })
    }
}

impl ServerCertVerifier for LeapOfFaithVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build the client config.
///
/// With `ca_cert_pem` the server must chain to it; without, the server is
/// taken on faith. With `identity` the client authenticates with its
/// certificate.
pub fn build_client_config(
    ca_cert_pem: Option<&str>,
    identity: Option<&ClientIdentity>,
) -> Result<ClientConfig, ClientError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::TlsConfig(e.to_string()))?;

    let builder = match ca_cert_pem {
        Some(pem) => {
            let ca_der = pem_to_der(pem, CERTIFICATE_LABEL)
                .map_err(|e| ClientError::TlsConfig(format!("CA certificate: {e}")))?;
            let mut roots = RootCertStore::empty();
            roots
                .add(CertificateDer::from(ca_der))
                .map_err(|e| ClientError::TlsConfig(e.to_string()))?;
            builder.with_root_certificates(roots)
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(LeapOfFaithVerifier::new(provider)),
    };

    match identity {
        Some(identity) => {
            let (certs, key) = identity.to_rustls()?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::TlsConfig(e.to_string()))
        }
        None => Ok(builder.with_no_client_auth()),
    }
}
