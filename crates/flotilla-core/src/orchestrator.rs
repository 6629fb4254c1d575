//! Platform selection and resource coordination.

use crate::allocator::PortAllocator;
use crate::error::Result;
use crate::factory::ManagerRegistry;
use crate::types::{InstanceId, Platform, ResourceAllocation};
use std::sync::Arc;

/// Policy that picks a platform for a new instance.
///
/// Strategies are injected into the [`PlatformOrchestrator`], so round-robin,
/// load-based or capability-based placement can replace the default without
/// touching callers.
pub trait PlacementStrategy: Send + Sync {
    /// Choose a platform from the registered managers.
    fn select(&self, registry: &ManagerRegistry) -> Platform;
}

/// Always selects one fixed platform.
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatformStrategy {
    platform: Platform,
}

impl FixedPlatformStrategy {
    /// Strategy that always returns `platform`.
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl PlacementStrategy for FixedPlatformStrategy {
    fn select(&self, _registry: &ManagerRegistry) -> Platform {
        self.platform
    }
}

/// Chooses platforms and delegates resource allocation to their managers.
pub struct PlatformOrchestrator {
    managers: Arc<ManagerRegistry>,
    allocator: Arc<PortAllocator>,
    strategy: Box<dyn PlacementStrategy>,
}

impl PlatformOrchestrator {
    /// Create an orchestrator using the registry's default platform.
    pub fn new(managers: Arc<ManagerRegistry>, allocator: Arc<PortAllocator>) -> Self {
        let strategy = FixedPlatformStrategy::new(managers.default_platform());
        Self::with_strategy(managers, allocator, Box::new(strategy))
    }

    /// Create an orchestrator with a custom placement strategy.
    pub fn with_strategy(
        managers: Arc<ManagerRegistry>,
        allocator: Arc<PortAllocator>,
        strategy: Box<dyn PlacementStrategy>,
    ) -> Self {
        Self {
            managers,
            allocator,
            strategy,
        }
    }

    /// Pick a platform for a new instance.
    pub fn select_platform(&self) -> Platform {
        self.strategy.select(&self.managers)
    }

    /// Allocate resources for an instance on `platform`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` if no manager is registered, or the
    /// manager's allocation error (e.g. `ResourceExhausted`).
    pub async fn allocate_resources(&self, platform: Platform) -> Result<ResourceAllocation> {
        let manager = self.managers.resolve(platform)?;
        let allocation = manager.allocate_resources(&self.allocator).await?;
        tracing::debug!(
            %platform,
            host = %allocation.host,
            port = allocation.port,
            allocated = allocation.allocated_port.is_some(),
            "Resources allocated"
        );
        Ok(allocation)
    }

    /// Return an instance's allocated port to the pool, if it has one.
    ///
    /// Calling this twice with the same allocation is a no-op the second time.
    pub fn release_resources(&self, instance_id: &InstanceId, allocation: &ResourceAllocation) {
        if let Some(port) = allocation.allocated_port {
            tracing::debug!(instance_id = %instance_id, port, "Releasing resources");
            self.allocator.release(port);
        }
    }

    /// The shared port allocator.
    pub fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }

    /// The manager registry.
    pub fn managers(&self) -> &Arc<ManagerRegistry> {
        &self.managers
    }
}
