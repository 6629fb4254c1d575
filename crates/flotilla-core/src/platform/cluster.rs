//! Managed-cluster platform manager.

use super::RuntimeTable;
use crate::allocator::PortAllocator;
use crate::error::Result;
use crate::manager::InstanceManager;
use crate::types::{InstanceConfiguration, InstanceId, Platform, ResourceAllocation, RuntimeInfo};
use async_trait::async_trait;
use std::collections::HashMap;

/// Well-known port every cluster workload listens on.
pub const DEFAULT_CLUSTER_PORT: u16 = 8080;

/// Manager for instances running on a managed cluster.
///
/// Each workload gets its own network identity and the cluster's ingress
/// routes to it, so no host port is taken from the shared allocator. Restart
/// is not supported; the cluster reschedules workloads itself.
pub struct ClusterManager {
    table: RuntimeTable,
    namespace: String,
    port: u16,
}

impl ClusterManager {
    /// Create a manager for the given cluster namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            table: RuntimeTable::new(Platform::ManagedCluster),
            namespace: namespace.into(),
            port: DEFAULT_CLUSTER_PORT,
        }
    }

    /// Override the well-known workload port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Mark the manager healthy or unhealthy.
    pub fn set_available(&self, available: bool) {
        self.table.set_available(available);
    }
}

impl Default for ClusterManager {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl InstanceManager for ClusterManager {
    fn platform(&self) -> Platform {
        Platform::ManagedCluster
    }

    async fn allocate_resources(&self, _allocator: &PortAllocator) -> Result<ResourceAllocation> {
        Ok(ResourceAllocation::fixed("0.0.0.0", self.port))
    }

    async fn start(
        &self,
        id: &InstanceId,
        configuration: &InstanceConfiguration,
    ) -> Result<RuntimeInfo> {
        tracing::info!(instance_id = %id, namespace = %self.namespace, "Deploying cluster instance");
        let metadata = HashMap::from([
            ("namespace".to_string(), self.namespace.clone()),
            (
                "service".to_string(),
                format!("{}.{}.svc:{}", id, self.namespace, configuration.port),
            ),
        ]);
        Ok(self.table.start(id, configuration, metadata))
    }

    async fn stop(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        tracing::info!(instance_id = %id, namespace = %self.namespace, "Scaling cluster instance to zero");
        self.table.stop(id)
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
