use std::time::Duration;

/// Errors from advertising or resolving the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// Nothing answered within the allotted time.
    #[error("no {service_type} service found within {timeout:?}")]
    Timeout {
        service_type: String,
        timeout: Duration,
    },

    /// The backend knows no such service.
    #[error("service {0} not found")]
    NotFound(String),

    /// The backend failed to register or resolve.
    #[error("discovery backend error: {0}")]
    Backend(String),
}
