//! HTTP routes of the provisioning server.
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | GET | `/idprov/directory` | none |
//! | GET | `/idprov/status/{deviceID}` | client certificate |
//! | POST | `/idprov/oobsecret` | admin or plugin certificate |
//! | POST | `/idprov/provreq` | none, OOB signature or device certificate |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use idprov_proto::{
    DeviceStatusMessage, Directory, ProvisionResponse, DIRECTORY_PATH, POST_OOB_SECRET_PATH,
    POST_PROVISION_REQUEST_PATH, STATUS_PATH,
};

use crate::error::ServiceError;
use crate::services::ProvisionService;
use crate::tls::TlsConnectInfo;

/// Build the router. Every request must carry a [`TlsConnectInfo`]
/// extension, inserted by the connection loop.
pub fn router(service: Arc<ProvisionService>) -> Router {
    Router::new()
        .route(DIRECTORY_PATH, get(serve_directory))
        .route(STATUS_PATH, get(serve_status))
        .route(POST_OOB_SECRET_PATH, post(serve_post_oob_secret))
        .route(POST_PROVISION_REQUEST_PATH, post(serve_provision_request))
        .with_state(service)
}

async fn serve_directory(State(service): State<Arc<ProvisionService>>) -> Json<Directory> {
    Json(service.directory().clone())
}

async fn serve_status(
    State(service): State<Arc<ProvisionService>>,
    Extension(conn): Extension<TlsConnectInfo>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStatusMessage>, ServiceError> {
    tracing::debug!(peer = %conn.remote_addr, device_id = %device_id, "Status request");
    service
        .device_status(conn.valid_peer(), &device_id)
        .map(Json)
}

async fn serve_post_oob_secret(
    State(service): State<Arc<ProvisionService>>,
    Extension(conn): Extension<TlsConnectInfo>,
    body: Bytes,
) -> Result<StatusCode, ServiceError> {
    tracing::debug!(peer = %conn.remote_addr, "OOB secret post");
    service.post_oob_secret(conn.valid_peer(), &body)?;
    Ok(StatusCode::OK)
}

async fn serve_provision_request(
    State(service): State<Arc<ProvisionService>>,
    Extension(conn): Extension<TlsConnectInfo>,
    body: Bytes,
) -> Result<Json<ProvisionResponse>, ServiceError> {
    tracing::debug!(peer = %conn.remote_addr, "Provisioning request");
    service
        .provision(conn.valid_peer(), &body)
        .map(Json)
        .inspect_err(|e| {
            if e.status_code().is_client_error() {
                tracing::warn!(peer = %conn.remote_addr, error = %e, "Bad provisioning request");
            }
        })
}
