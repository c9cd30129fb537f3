use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{DiscoveryError, ServiceAdvertiser, ServiceBrowser, ServiceRecord};

type Records = BTreeMap<(String, String), ServiceRecord>;

/// In-process registry implementing both the advertiser and the browser.
///
/// Clones share the same registry. A pending [`ServiceBrowser::resolve`]
/// wakes up when a matching instance is registered.
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    records: Arc<watch::Sender<Records>>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Records::new());
        Self {
            records: Arc::new(tx),
        }
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ServiceAdvertiser for MemoryRegistry {
    async fn register(&self, record: ServiceRecord) -> Result<(), DiscoveryError> {
        let key = (record.service_type.clone(), record.instance_name.clone());
        self.records.send_modify(|records| {
            records.insert(key, record);
        });
        Ok(())
    }

    async fn unregister(
        &self,
        instance_name: &str,
        service_type: &str,
    ) -> Result<(), DiscoveryError> {
        let key = (service_type.to_string(), instance_name.to_string());
        self.records.send_if_modified(|records| records.remove(&key).is_some());
        Ok(())
    }
}

#[async_trait]
impl ServiceBrowser for MemoryRegistry {
    async fn resolve(&self, service_type: &str) -> Result<ServiceRecord, DiscoveryError> {
        let mut rx = self.records.subscribe();
        let records = rx
            .wait_for(|records| records.keys().any(|(ty, _)| ty == service_type))
            .await
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;

        records
            .values()
            .find(|record| record.service_type == service_type)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(service_type.to_string()))
    }
}
