//! Container platform manager.

use super::RuntimeTable;
use crate::allocator::PortAllocator;
use crate::error::Result;
use crate::manager::InstanceManager;
use crate::types::{InstanceConfiguration, InstanceId, Platform, ResourceAllocation, RuntimeInfo};
use async_trait::async_trait;
use std::collections::HashMap;

/// Address containers bind inside their own network namespace.
const CONTAINER_BIND_HOST: &str = "0.0.0.0";

/// Manager for instances running in a container runtime.
///
/// Containers bind all interfaces inside their namespace; the allocated port
/// is published on the host.
pub struct ContainerManager {
    table: RuntimeTable,
    name_prefix: String,
}

impl ContainerManager {
    /// Create a new container manager.
    pub fn new() -> Self {
        Self {
            table: RuntimeTable::new(Platform::Container),
            name_prefix: "flotilla".to_string(),
        }
    }

    /// Set the prefix used for container names.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Mark the manager healthy or unhealthy.
    pub fn set_available(&self, available: bool) {
        self.table.set_available(available);
    }

    fn container_name(&self, id: &InstanceId) -> String {
        format!("{}-{}", self.name_prefix, id)
    }
}

impl Default for ContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceManager for ContainerManager {
    fn platform(&self) -> Platform {
        Platform::Container
    }

    async fn allocate_resources(&self, allocator: &PortAllocator) -> Result<ResourceAllocation> {
        let port = allocator.allocate()?;
        Ok(ResourceAllocation::allocated(CONTAINER_BIND_HOST, port))
    }

    async fn start(
        &self,
        id: &InstanceId,
        configuration: &InstanceConfiguration,
    ) -> Result<RuntimeInfo> {
        let name = self.container_name(id);
        tracing::info!(instance_id = %id, container = %name, "Starting container instance");
        let metadata = HashMap::from([
            ("container_name".to_string(), name),
            ("host_port".to_string(), configuration.port.to_string()),
        ]);
        Ok(self.table.start(id, configuration, metadata))
    }

    async fn stop(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        tracing::info!(instance_id = %id, "Stopping container instance");
        self.table.stop(id)
    }

    async fn restart(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        let configuration = self.table.configuration(id)?;
        self.table.stop(id)?;
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
