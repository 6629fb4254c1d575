//! The control-plane facade.
//!
//! ```text
//!  create ─► registry ─► orchestrator ─► manager.allocate ─► config init ─► runtime seed
//!  start  ─► manager.start ─► runtime store ─► StatusBus ─► registry ─► InstanceStarted
//!  delete ─► manager.stop ─► config/runtime/record delete ─► release ─► registry ─► InstanceDeleted
//! ```
//!
//! Instance records (registry entry plus allocation) are persisted on every
//! control-plane change so [`ControlPlane::load_persisted`] can rebuild the
//! registry, port reservations and configuration documents after a restart.

use crate::allocator::PortAllocator;
use crate::config_store::ConfigurationStore;
use crate::error::{ControlPlaneError, Result};
use crate::events::{
    ChannelName, ControlPlaneEvent, EventChannel, InMemoryEventChannel, InstanceDeletedEvent,
    InstanceStartedEvent, InstanceStoppedEvent,
};
use crate::factory::ManagerRegistry;
use crate::manager::InstanceManager;
use crate::orchestrator::PlatformOrchestrator;
use crate::patch::PatchOperation;
use crate::platform::{ClusterManager, ContainerManager, ProcessManager};
use crate::poller::StatusPoller;
use crate::registry::InstanceRegistry;
use crate::settings::ControlPlaneSettings;
use crate::status_bus::StatusBus;
use crate::storage::{
    ConfigurationStorage, FileConfigurationStorage, FileInstanceStorage,
    InMemoryConfigurationStorage, InMemoryInstanceStorage, InMemoryRuntimeStore, InstanceRecord,
    InstanceStorage, RuntimeStore,
};
use crate::subscription::EventSubscriptionLoop;
use crate::types::{
    Instance, InstanceConfiguration, InstanceId, InstanceStatus, Platform, ResourceAllocation,
    RuntimeInfo, StatusChangeRecord,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Status source label for transitions caused by control-plane operations.
pub const CONTROL_PLANE_SOURCE: &str = "control-plane";

/// Owns every component and composes the instance lifecycle.
pub struct ControlPlane {
    settings: ControlPlaneSettings,
    orchestrator: Arc<PlatformOrchestrator>,
    registry: Arc<InstanceRegistry>,
    instances: Arc<dyn InstanceStorage>,
    configurations: Arc<ConfigurationStore>,
    runtime: Arc<dyn RuntimeStore>,
    status_bus: Arc<StatusBus>,
    channel: Arc<dyn EventChannel>,
    allocations: DashMap<InstanceId, ResourceAllocation>,
}

impl ControlPlane {
    /// Build a control plane with the built-in managers, in-process event
    /// channel and runtime store.
    ///
    /// With `config_dir` set, instance records go to `<dir>/instances` and
    /// configuration documents to `<dir>/configurations`; otherwise both are
    /// kept in memory.
    pub fn from_settings(settings: ControlPlaneSettings) -> Result<Self> {
        let managers: Vec<Arc<dyn InstanceManager>> = vec![
            Arc::new(ProcessManager::new()),
            Arc::new(ContainerManager::new()),
            Arc::new(ClusterManager::default().with_port(settings.cluster_port)),
        ];
        let (instances, storage): (Arc<dyn InstanceStorage>, Arc<dyn ConfigurationStorage>) =
            match &settings.config_dir {
                Some(dir) => (
                    Arc::new(FileInstanceStorage::new(dir.join("instances"))),
                    Arc::new(FileConfigurationStorage::new(dir.join("configurations"))),
                ),
                None => (
                    Arc::new(InMemoryInstanceStorage::new()),
                    Arc::new(InMemoryConfigurationStorage::new()),
                ),
            };
        let channel = Arc::new(InMemoryEventChannel::new(settings.event_channel_capacity));

        Self::new(
            settings,
            managers,
            instances,
            storage,
            Arc::new(InMemoryRuntimeStore::new()),
            channel,
        )
    }

    /// Build a control plane from explicit components.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the settings are invalid or no manager
    /// serves the default platform.
    pub fn new(
        settings: ControlPlaneSettings,
        managers: Vec<Arc<dyn InstanceManager>>,
        instances: Arc<dyn InstanceStorage>,
        storage: Arc<dyn ConfigurationStorage>,
        runtime: Arc<dyn RuntimeStore>,
        channel: Arc<dyn EventChannel>,
    ) -> Result<Self> {
        settings.validate()?;

        let managers = Arc::new(ManagerRegistry::new(managers, settings.default_platform)?);
        let allocator = Arc::new(PortAllocator::new(
            settings.port_range_start,
            settings.port_range_end,
        )?);
        let orchestrator = Arc::new(PlatformOrchestrator::new(managers, allocator));
        let registry = Arc::new(InstanceRegistry::new(orchestrator.clone()));
        let configurations = Arc::new(ConfigurationStore::new(registry.clone(), storage));
        let status_bus = Arc::new(StatusBus::with_capacity(
            runtime.clone(),
            channel.clone(),
            settings.recent_changes_capacity,
        ));

        tracing::info!(
            default_platform = %settings.default_platform,
            port_range_start = settings.port_range_start,
            port_range_end = settings.port_range_end,
            "Control plane initialized"
        );

        Ok(Self {
            settings,
            orchestrator,
            registry,
            instances,
            configurations,
            runtime,
            status_bus,
            channel,
            allocations: DashMap::new(),
        })
    }

    /// Rebuild state from durable storage: registry records, their port
    /// reservations and runtime seeds, then configuration documents.
    ///
    /// Records whose platform has no manager or whose port is already held
    /// are skipped with a warning. Returns the number of instances restored.
    pub async fn load_persisted(&self) -> Result<usize> {
        let mut restored = 0;
        for InstanceRecord {
            instance,
            allocation,
        } in self.instances.list().await?
        {
            let id = instance.id().clone();
            let platform = instance.platform;
            let status = instance.status();

            if let Err(e) = self.orchestrator.managers().resolve(platform) {
                tracing::warn!(instance_id = %id, error = %e, "Skipping persisted instance");
                continue;
            }
            if self.registry.exists(&id) {
                continue;
            }
            if let Some(port) = allocation.allocated_port {
                if !self.orchestrator.allocator().reserve(port) {
                    tracing::warn!(instance_id = %id, port, "Recorded port unavailable, skipping instance");
                    continue;
                }
            }

            self.registry.restore(instance);
            if self.runtime.get(&id).await?.is_none() {
                self.runtime
                    .save(RuntimeInfo::new(id.clone(), platform, status))
                    .await?;
            }
            self.allocations.insert(id, allocation);
            restored += 1;
        }

        let configurations = self.configurations.load_persisted().await?;
        tracing::info!(instances = restored, configurations, "Persisted state loaded");
        Ok(restored)
    }

    /// Spawn the event subscription loop and, unless disabled, the status
    /// poller. Both stop when `shutdown` is cancelled.
    pub async fn spawn_background(&self, shutdown: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(2);
        handles.push(
            EventSubscriptionLoop::new(self.channel.clone(), self.registry.clone())
                .spawn(shutdown.clone())
                .await?,
        );
        if let Some(interval) = self.settings.poll_interval() {
            let poller = StatusPoller::new(
                self.orchestrator.managers().clone(),
                self.status_bus.clone(),
                interval,
            );
            handles.push(poller.spawn(shutdown));
        }
        Ok(handles)
    }

    /// Register an instance, allocate its resources and initialize its
    /// configuration.
    ///
    /// On failure nothing is left behind: the registry record is removed and
    /// any allocated port returned to the pool.
    pub async fn create_instance(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        platform: Option<Platform>,
    ) -> Result<Instance> {
        let instance = self.registry.create(name, description, platform);
        let id = instance.id().clone();

        let allocation = match self.orchestrator.allocate_resources(instance.platform).await {
            Ok(allocation) => allocation,
            Err(e) => {
                self.registry.delete(&id);
                return Err(e);
            }
        };

        if let Err(e) = self.provision(&instance, &allocation).await {
            tracing::warn!(instance_id = %id, error = %e, "Instance creation failed, rolling back");
            if let Err(cleanup) = self.configurations.delete(&id).await {
                tracing::warn!(instance_id = %id, error = %cleanup, "Failed to remove configuration");
            }
            if let Err(cleanup) = self.runtime.delete(&id).await {
                tracing::warn!(instance_id = %id, error = %cleanup, "Failed to remove runtime info");
            }
            self.orchestrator.release_resources(&id, &allocation);
            self.registry.delete(&id);
            return Err(e);
        }

        self.allocations.insert(id.clone(), allocation);
        tracing::info!(instance_id = %id, platform = %instance.platform, "Instance created");
        Ok(instance)
    }

    async fn provision(&self, instance: &Instance, allocation: &ResourceAllocation) -> Result<()> {
        self.configurations
            .initialize(instance.id(), &allocation.host, allocation.port)
            .await?;
        self.runtime
            .save(RuntimeInfo::new(
                instance.id().clone(),
                instance.platform,
                InstanceStatus::Created,
            ))
            .await?;
        self.instances
            .save(&InstanceRecord {
                instance: instance.clone(),
                allocation: allocation.clone(),
            })
            .await
    }

    /// Start an instance with its current configuration.
    pub async fn start_instance(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        let manager = self.manager_for(id)?;
        let configuration = self.configurations.get_configuration(id)?;
        let reported = manager.start(id, &configuration).await?;
        let info = self.record_runtime(id, reported).await?;
        self.announce(ControlPlaneEvent::InstanceStarted(InstanceStartedEvent {
            instance_id: id.clone(),
        }))
        .await;
        tracing::info!(instance_id = %id, "Instance started");
        Ok(info)
    }

    /// Stop a started instance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the platform never started the instance.
    pub async fn stop_instance(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        let manager = self.manager_for(id)?;
        let reported = manager.stop(id).await.map_err(|e| match e {
            ControlPlaneError::InstanceNotFound(_) => {
                ControlPlaneError::InvalidOperation(format!("instance {id} was never started"))
            }
            other => other,
        })?;
        let info = self.record_runtime(id, reported).await?;
        self.announce(ControlPlaneEvent::InstanceStopped(InstanceStoppedEvent {
            instance_id: id.clone(),
        }))
        .await;
        tracing::info!(instance_id = %id, "Instance stopped");
        Ok(info)
    }

    /// Restart an instance with its last configuration.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` on platforms that cannot restart.
    pub async fn restart_instance(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        let manager = self.manager_for(id)?;
        let reported = manager.restart(id).await?;
        let info = self.record_runtime(id, reported).await?;
        self.announce(ControlPlaneEvent::InstanceStarted(InstanceStartedEvent {
            instance_id: id.clone(),
        }))
        .await;
        tracing::info!(instance_id = %id, "Instance restarted");
        Ok(info)
    }

    /// Stop (best-effort), release and forget an instance.
    pub async fn delete_instance(&self, id: &InstanceId) -> Result<()> {
        let instance = self
            .registry
            .get(id)
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))?;

        match self.orchestrator.managers().resolve(instance.platform) {
            Ok(manager) => {
                let running = matches!(
                    self.runtime.get(id).await?.map(|info| info.status),
                    Some(InstanceStatus::Starting | InstanceStatus::Running)
                );
                if running {
                    if let Err(e) = manager.stop(id).await {
                        tracing::warn!(instance_id = %id, error = %e, "Stop before delete failed");
                    }
                }
                if let Err(e) = manager.remove(id).await {
                    tracing::warn!(instance_id = %id, error = %e, "Platform cleanup failed");
                }
            }
            Err(e) => tracing::warn!(instance_id = %id, error = %e, "No manager for instance"),
        }

        self.configurations.delete(id).await?;
        self.runtime.delete(id).await?;
        self.instances.delete(id).await?;
        if let Some((_, allocation)) = self.allocations.remove(id) {
            self.orchestrator.release_resources(id, &allocation);
        }
        self.status_bus.forget(id);
        self.registry.delete(id);

        self.announce(ControlPlaneEvent::InstanceDeleted(InstanceDeletedEvent {
            instance_id: id.clone(),
        }))
        .await;
        tracing::info!(instance_id = %id, "Instance deleted");
        Ok(())
    }

    /// Snapshot of an instance's registry record.
    pub fn get_instance(&self, id: &InstanceId) -> Option<Instance> {
        self.registry.get(id)
    }

    /// All instances, oldest first.
    pub fn list_instances(&self) -> Vec<Instance> {
        self.registry.list()
    }

    /// An instance's full configuration document.
    pub fn get_configuration(&self, id: &InstanceId) -> Result<InstanceConfiguration> {
        self.configurations.get_configuration(id)
    }

    /// Apply a patch to an instance's full configuration document.
    pub async fn patch_configuration(
        &self,
        id: &InstanceId,
        operations: &[PatchOperation],
    ) -> Result<InstanceConfiguration> {
        self.configurations.apply_patch(id, operations).await
    }

    /// Last known runtime info for an instance.
    pub async fn get_runtime_info(&self, id: &InstanceId) -> Result<Option<RuntimeInfo>> {
        self.status_bus.get_last_known_status(id).await
    }

    /// Status changes since `since`, oldest first.
    pub async fn get_recent_changes(
        &self,
        since: DateTime<Utc>,
        status: Option<InstanceStatus>,
    ) -> Vec<StatusChangeRecord> {
        self.status_bus.get_recent_changes(since, status).await
    }

    /// The instance registry.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// The configuration store.
    pub fn configurations(&self) -> &Arc<ConfigurationStore> {
        &self.configurations
    }

    /// The status bus agents report through.
    pub fn status_bus(&self) -> &Arc<StatusBus> {
        &self.status_bus
    }

    /// The platform orchestrator.
    pub fn orchestrator(&self) -> &Arc<PlatformOrchestrator> {
        &self.orchestrator
    }

    /// The distributed event channel.
    pub fn channel(&self) -> &Arc<dyn EventChannel> {
        &self.channel
    }

    fn manager_for(&self, id: &InstanceId) -> Result<Arc<dyn InstanceManager>> {
        let instance = self
            .registry
            .get(id)
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))?;
        self.orchestrator.managers().resolve(instance.platform)
    }

    /// Fold what the manager reported into the runtime record through the
    /// bus, then mirror the resulting status into the registry and the
    /// persisted instance record.
    ///
    /// The registry takes the stored status rather than the reported one, so
    /// an agent report that landed while the manager call was in flight is
    /// not overwritten.
    async fn record_runtime(&self, id: &InstanceId, reported: RuntimeInfo) -> Result<RuntimeInfo> {
        self.status_bus
            .apply_report(reported, CONTROL_PLANE_SOURCE)
            .await?;
        let info = self
            .runtime
            .get(id)
            .await?
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))?;
        self.registry.update_status(id, info.status)?;

        if let Err(e) = self.persist(id).await {
            tracing::warn!(instance_id = %id, error = %e, "Failed to persist instance record");
        }
        Ok(info)
    }

    async fn persist(&self, id: &InstanceId) -> Result<()> {
        let Some(instance) = self.registry.get(id) else {
            return Ok(());
        };
        let Some(allocation) = self.allocations.get(id).map(|a| a.value().clone()) else {
            return Ok(());
        };
        self.instances
            .save(&InstanceRecord {
                instance,
                allocation,
            })
            .await
    }

    async fn announce(&self, event: ControlPlaneEvent) {
        let instance_id = event.instance_id().clone();
        if let Err(e) = self.channel.publish(ChannelName::InstanceEvents, event).await {
            tracing::warn!(instance_id = %instance_id, error = %e, "Failed to publish lifecycle event");
        }
    }
}
