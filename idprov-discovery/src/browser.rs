use std::time::Duration;

use async_trait::async_trait;

use crate::{DiscoveryError, ServiceRecord};

/// Registers service instances with a discovery backend.
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    async fn register(&self, record: ServiceRecord) -> Result<(), DiscoveryError>;

    async fn unregister(&self, instance_name: &str, service_type: &str)
        -> Result<(), DiscoveryError>;
}

/// Looks up service instances.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Resolve the first instance of `service_type`. Implementations may wait
    /// for an instance to appear; callers bound the wait.
    async fn resolve(&self, service_type: &str) -> Result<ServiceRecord, DiscoveryError>;
}

/// Resolve `service_type`, giving up after `timeout`.
pub async fn resolve_with_timeout(
    browser: &dyn ServiceBrowser,
    service_type: &str,
    timeout: Duration,
) -> Result<ServiceRecord, DiscoveryError> {
    match tokio::time::timeout(timeout, browser.resolve(service_type)).await {
        Ok(result) => result,
        Err(_) => Err(DiscoveryError::Timeout {
            service_type: service_type.to_string(),
            timeout,
        }),
    }
}
