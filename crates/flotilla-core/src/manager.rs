//! Platform manager contract.

use crate::allocator::PortAllocator;
use crate::error::{ControlPlaneError, Result};
use crate::types::{InstanceConfiguration, InstanceId, Platform, ResourceAllocation, RuntimeInfo};
use async_trait::async_trait;

/// Trait for managing instance lifecycle on one platform.
///
/// Each [`Platform`] variant has exactly one implementation registered in the
/// [`ManagerRegistry`](crate::ManagerRegistry). Implementations must return
/// [`ControlPlaneError::UnsupportedOperation`] for operations the platform
/// cannot perform and [`ControlPlaneError::InstanceNotFound`] for ids they do
/// not know, so callers can tell the two apart.
#[async_trait]
pub trait InstanceManager: Send + Sync {
    /// The platform this manager serves.
    fn platform(&self) -> Platform;

    /// Decide the network binding for a new instance.
    ///
    /// # Arguments
    /// * `allocator` - Shared port pool, used only if the platform needs a host port
    ///
    /// # Errors
    /// Returns `ResourceExhausted` if a port is needed and none is free.
    async fn allocate_resources(&self, allocator: &PortAllocator) -> Result<ResourceAllocation>;

    /// Start an instance with the given configuration.
    async fn start(
        &self,
        id: &InstanceId,
        configuration: &InstanceConfiguration,
    ) -> Result<RuntimeInfo>;

    /// Stop a running instance.
    ///
    /// # Errors
    /// Returns `InstanceNotFound` if the platform has no record of the instance.
    async fn stop(&self, id: &InstanceId) -> Result<RuntimeInfo>;

    /// Restart an instance with its last configuration.
    async fn restart(&self, _id: &InstanceId) -> Result<RuntimeInfo> {
        Err(ControlPlaneError::UnsupportedOperation {
            platform: self.platform(),
            operation: "restart",
        })
    }

    /// Get the current runtime info of an instance.
    ///
    /// # Errors
    /// Returns `InstanceNotFound` if the platform has no record of the instance.
    async fn get_status(&self, id: &InstanceId) -> Result<RuntimeInfo>;

    /// List runtime info for every instance on this platform.
    async fn list_statuses(&self) -> Result<Vec<RuntimeInfo>>;

    /// Whether the manager itself is healthy and can accept work.
    async fn is_available(&self) -> bool;

    /// Forget any platform-side state kept for a deleted instance.
    async fn remove(&self, _id: &InstanceId) -> Result<()> {
        Ok(())
    }
}
