//! Listener lifecycle: TLS accept loop, per-connection HTTP serving and
//! discovery advertisement.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::TokioIo;
use idprov_discovery::{DiscoveryPublisher, ServiceAdvertiser};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::archive::CertArchive;
use crate::config::ServerConfig;
use crate::http;
use crate::services::{ProvisionService, ServiceSettings};
use crate::tls::{load_bundle, BundleError, TlsConfigError, TlsConnectInfo, TlsServerConfig};

/// Connections that don't complete the TLS handshake within this time are
/// dropped.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsConfigError),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    publisher: Option<DiscoveryPublisher>,
}

/// The provisioning server.
pub struct IdProvServer {
    service: Arc<ProvisionService>,
    tls: Arc<rustls::ServerConfig>,
    listen: SocketAddr,
    instance_id: String,
    service_name: String,
    advertiser: Option<Arc<dyn ServiceAdvertiser>>,
    running: Option<Running>,
}

impl std::fmt::Debug for IdProvServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdProvServer")
            .field("listen", &self.listen)
            .field("instance_id", &self.instance_id)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl IdProvServer {
    pub fn new(
        service: Arc<ProvisionService>,
        tls: Arc<rustls::ServerConfig>,
        listen: SocketAddr,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            tls,
            listen,
            instance_id: instance_id.into(),
            service_name: idprov_proto::DEFAULT_SERVICE_NAME.to_string(),
            advertiser: None,
            running: None,
        }
    }

    /// Load the certificate bundle named by `config` and assemble the server.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let bundle = load_bundle(&config.certs_dir)?;
        let tls = TlsServerConfig::new(
            &bundle.server_cert_pem,
            &bundle.server_key_pem,
            bundle.ca.cert_der(),
        )?;

        let settings = ServiceSettings {
            validity_days: config.validity_days,
            retry_sec: config.retry_sec,
            services: config.directory_services(),
        };
        let service = ProvisionService::new(
            Some(Arc::new(bundle.ca)),
            CertArchive::new(&config.archive_dir),
            settings,
        );

        let mut server = Self::new(
            Arc::new(service),
            tls.into_rustls_config(),
            config.listen_addr(),
            config.instance_id.clone(),
        );
        server.service_name = config.service_name.clone();
        Ok(server)
    }

    /// Advertise through `advertiser` while running.
    pub fn with_advertiser(mut self, advertiser: Arc<dyn ServiceAdvertiser>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn service(&self) -> &Arc<ProvisionService> {
        &self.service
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind, start accepting and advertise. Returns the bound address.
    /// Starting a running server returns its address.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.listen,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.listen,
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acceptor = TlsAcceptor::from(self.tls.clone());
        let app = http::router(self.service.clone());
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, app, shutdown_rx));

        tracing::info!(
            addr = %local_addr,
            instance = %self.instance_id,
            "Provisioning server listening"
        );

        let publisher = match &self.advertiser {
            Some(advertiser) => {
                // An unspecified bind address is not something a device can dial.
                let advertised_ip = match local_addr.ip() {
                    ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    ip => ip,
                };
                match DiscoveryPublisher::start(
                    advertiser.clone(),
                    &self.instance_id,
                    &self.service_name,
                    advertised_ip,
                    local_addr.port(),
                    idprov_proto::DIRECTORY_PATH,
                )
                .await
                {
                    Ok(publisher) => Some(publisher),
                    Err(e) => {
                        tracing::warn!(error = %e, "Discovery advertisement failed, continuing without it");
                        None
                    }
                }
            }
            None => None,
        };

        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
            publisher,
        });
        Ok(local_addr)
    }

    /// Withdraw the advertisement and stop accepting. Open connections finish
    /// their current request. Stopping a stopped server does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        if let Some(publisher) = &running.publisher {
            publisher.shutdown().await;
        }
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.accept_task.await {
            tracing::warn!(error = %e, "Accept loop ended abnormally");
        }
        tracing::info!(addr = %running.local_addr, "Provisioning server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((tcp_stream, peer_addr)) => {
                        tokio::spawn(serve_connection(
                            tcp_stream,
                            peer_addr,
                            acceptor.clone(),
                            app.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "TCP accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::debug!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}

async fn serve_connection(
    tcp_stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let tls_stream = match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp_stream)).await {
        Ok(Ok(tls_stream)) => tls_stream,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer_addr, timeout_secs = ?TLS_HANDSHAKE_TIMEOUT, "TLS handshake timed out");
            return;
        }
    };

    let info = TlsConnectInfo::new(peer_addr, tls_stream.get_ref().1.peer_certificates());
    tracing::debug!(
        peer = %peer_addr,
        client_cn = ?info.peer.as_ref().map(|p| p.common_name.as_str()),
        "TLS handshake successful"
    );

    let app = app.layer(Extension(info));
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
        app.clone().oneshot(request)
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(tls_stream), hyper_service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        }
        _ = shutdown_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection closed during shutdown");
            }
        }
    }
}
