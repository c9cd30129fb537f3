//! Per-connection TLS facts handed to request handlers.

use std::net::SocketAddr;

use idprov_auth::PeerIdentity;
use rustls::pki_types::CertificateDer;

/// Connection info extracted from the TLS stream after the handshake.
///
/// Inserted into every request on the connection as an axum `Extension`.
#[derive(Debug, Clone)]
pub struct TlsConnectInfo {
    pub remote_addr: SocketAddr,
    /// Identity from the client's leaf certificate, if one was presented and
    /// chains to the hub CA.
    pub peer: Option<PeerIdentity>,
}

impl TlsConnectInfo {
    pub fn new(remote_addr: SocketAddr, peer_certs: Option<&[CertificateDer<'_>]>) -> Self {
        let peer = peer_certs
            .and_then(|certs| certs.first())
            .and_then(|leaf| match PeerIdentity::from_der(leaf.as_ref()) {
                Ok(peer) => Some(peer),
                Err(e) => {
                    tracing::warn!(peer = %remote_addr, error = %e, "Unreadable client certificate");
                    None
                }
            });
        Self { remote_addr, peer }
    }

    /// The peer identity if its certificate is inside its validity window.
    /// Expired certificates count as no certificate.
    pub fn valid_peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref().filter(|peer| peer.is_valid_now())
    }
}
