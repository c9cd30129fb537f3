//! Errors surfaced by the provisioning service and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Request-level failure. `Rejected` and `Waiting` are not errors; they are
/// returned as regular responses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Body is not valid JSON or a field has an unusable value.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Caller lacks a certificate with the required role.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("CA unavailable")]
    CaUnavailable,

    #[error("certificate creation failed: {0}")]
    CertificateCreationFailed(String),

    #[error("archive write failed: {0}")]
    ArchiveWriteFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::MissingField(_) | Self::InvalidPublicKey(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::CaUnavailable
            | Self::CertificateCreationFailed(_)
            | Self::ArchiveWriteFailed(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the log.
        let body = if status.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}
