//! Bare-process platform manager.

use super::RuntimeTable;
use crate::allocator::PortAllocator;
use crate::error::Result;
use crate::manager::InstanceManager;
use crate::types::{
    InstanceConfiguration, InstanceId, Platform, ResourceAllocation, RuntimeInfo, LOOPBACK_HOST,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Manager for instances running as local processes.
///
/// Processes share the host network, so every instance binds the loopback
/// address on a port taken from the shared allocator.
pub struct ProcessManager {
    table: RuntimeTable,
}

impl ProcessManager {
    /// Create a new process manager.
    pub fn new() -> Self {
        Self {
            table: RuntimeTable::new(Platform::Process),
        }
    }

    /// Mark the manager healthy or unhealthy.
    pub fn set_available(&self, available: bool) {
        self.table.set_available(available);
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceManager for ProcessManager {
    fn platform(&self) -> Platform {
        Platform::Process
    }

    async fn allocate_resources(&self, allocator: &PortAllocator) -> Result<ResourceAllocation> {
        let port = allocator.allocate()?;
        Ok(ResourceAllocation::allocated(LOOPBACK_HOST, port))
    }

    async fn start(
        &self,
        id: &InstanceId,
        configuration: &InstanceConfiguration,
    ) -> Result<RuntimeInfo> {
        let endpoint = format!("{}:{}", configuration.host, configuration.port);
        tracing::info!(instance_id = %id, %endpoint, "Starting process instance");
        let metadata = HashMap::from([("endpoint".to_string(), endpoint)]);
        Ok(self.table.start(id, configuration, metadata))
    }

    async fn stop(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        tracing::info!(instance_id = %id, "Stopping process instance");
        self.table.stop(id)
    }

    async fn restart(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        let configuration = self.table.configuration(id)?;
        self.stop(id).await?;
        self.start(id, &configuration).await
    }

    async fn get_status(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        self.table.get(id)
    }

    async fn list_statuses(&self) -> Result<Vec<RuntimeInfo>> {
        Ok(self.table.list())
    }

    async fn is_available(&self) -> bool {
        self.table.is_available()
    }

    async fn remove(&self, id: &InstanceId) -> Result<()> {
        self.table.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceStatus;

    #[tokio::test]
    async fn test_allocates_loopback_port() {
        let manager = ProcessManager::new();
        let allocator = PortAllocator::default();

        let allocation = manager.allocate_resources(&allocator).await.unwrap();
        assert_eq!(allocation.host, "127.0.0.1");
        assert!((8080..=9000).contains(&allocation.port));
        assert_eq!(allocation.allocated_port, Some(allocation.port));
        assert!(allocator.is_allocated(allocation.port));
    }

    #[tokio::test]
    async fn test_restart_keeps_configuration() {
        let manager = ProcessManager::new();
        let id = InstanceId::new();
        let config = InstanceConfiguration::new(LOOPBACK_HOST, 8085);

        manager.start(&id, &config).await.unwrap();
        let info = manager.restart(&id).await.unwrap();
        assert_eq!(info.status, InstanceStatus::Running);
        assert!(info.stopped_at.is_some());
        assert_eq!(
            info.metadata.get("endpoint").map(String::as_str),
            Some("127.0.0.1:8085")
        );
    }

    #[tokio::test]
    async fn test_restart_unknown_instance() {
        let manager = ProcessManager::new();
        let err = manager.restart(&InstanceId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
