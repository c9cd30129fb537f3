use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{service_type, DiscoveryError, ServiceAdvertiser, ServiceRecord, PATH_TXT_KEY};

/// Keeps the provisioning service advertised while the server runs.
pub struct DiscoveryPublisher {
    advertiser: Arc<dyn ServiceAdvertiser>,
    record: ServiceRecord,
    active: AtomicBool,
}

impl std::fmt::Debug for DiscoveryPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryPublisher")
            .field("record", &self.record)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl DiscoveryPublisher {
    /// Register `_{service_name}._tcp` under `instance_id`, with the
    /// directory path in the TXT record.
    pub async fn start(
        advertiser: Arc<dyn ServiceAdvertiser>,
        instance_id: &str,
        service_name: &str,
        address: IpAddr,
        port: u16,
        directory_path: &str,
    ) -> Result<Self, DiscoveryError> {
        let record = ServiceRecord::new(instance_id, service_type(service_name), address, port)
            .with_txt(PATH_TXT_KEY, directory_path);

        advertiser.register(record.clone()).await?;
        tracing::info!(
            instance = %record.instance_name,
            service_type = %record.service_type,
            address = %record.authority(),
            "Discovery record published"
        );

        Ok(Self {
            advertiser,
            record,
            active: AtomicBool::new(true),
        })
    }

    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Withdraw the record. Calling this more than once has no further effect.
    pub async fn shutdown(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        match self
            .advertiser
            .unregister(&self.record.instance_name, &self.record.service_type)
            .await
        {
            Ok(()) => tracing::info!(instance = %self.record.instance_name, "Discovery record withdrawn"),
            Err(e) => tracing::warn!(error = %e, "Failed to withdraw discovery record"),
        }
    }
}
