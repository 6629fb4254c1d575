//! # flotilla-core
//!
//! Instance orchestration and status reconciliation for the Flotilla
//! control plane.
//!
//! Callers create, configure, start, stop and delete logical server
//! instances without knowing which platform (bare process, container,
//! managed cluster) backs them. The control plane picks a platform,
//! delegates resource allocation to that platform's manager, keeps the
//! desired configuration, and reconciles live status reported by
//! platform-side agents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ControlPlane                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────┐    ┌───────────────────────────────┐   │
//! │  │ InstanceRegistry │───▶│ PlatformOrchestrator          │   │
//! │  │  - create()      │    │  - select_platform()          │   │
//! │  │  - update()      │    │  - allocate_resources()       │   │
//! │  │  - delete()      │    └──────────────┬────────────────┘   │
//! │  └──────────────────┘                   │                    │
//! │           ▲                             ▼                    │
//! │           │              ┌───────────────────────────────┐   │
//! │           │              │ ManagerRegistry               │   │
//! │           │              │  Process │ Container │ Cluster │   │
//! │           │              └──────────────┬────────────────┘   │
//! │           │                             │ PortAllocator      │
//! │  ┌────────┴─────────┐                   │                    │
//! │  │ EventSubscription│    ┌──────────────▼────────────────┐   │
//! │  │ Loop             │◀───│ StatusBus                     │◀──┼── agents / StatusPoller
//! │  └──────────────────┘    │  runtime store + recent ring  │   │
//! │       EventChannel       └───────────────────────────────┘   │
//! │                                                              │
//! │  ┌──────────────────┐    ┌───────────────────────────────┐   │
//! │  │ConfigurationStore│───▶│ ConfigurationStorage          │   │
//! │  │  - apply_patch() │    │  (memory or JSON files)       │   │
//! │  └──────────────────┘    └───────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flotilla_core::{ControlPlane, ControlPlaneSettings, PatchOperation};
//!
//! # async fn example() -> flotilla_core::Result<()> {
//! let control_plane = ControlPlane::from_settings(ControlPlaneSettings::from_env())?;
//!
//! let instance = control_plane.create_instance("orders", "order sync", None).await?;
//! control_plane
//!     .patch_configuration(instance.id(), &[PatchOperation::replace("/logLevel", "debug")])
//!     .await?;
//! control_plane.start_instance(instance.id()).await?;
//!
//! // Agents report status through the bus
//! control_plane
//!     .status_bus()
//!     .publish_status_update(instance.id(), flotilla_core::InstanceStatus::Error, "agent", None)
//!     .await?;
//!
//! control_plane.delete_instance(instance.id()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Platform Abstraction**: one [`InstanceManager`] per platform, chosen by a [`PlacementStrategy`]
//! - **Port Pool**: thread-safe allocation from a bounded range with reuse after release
//! - **Configuration Patches**: atomic JSON-pointer patches, persisted before they become visible
//! - **Status Reconciliation**: polled and pushed status merged into one view with a bounded history
//! - **Restart Recovery**: instance records and configurations hydrate from a state directory

mod allocator;
mod config_store;
mod control_plane;
mod error;
mod events;
mod factory;
mod locks;
mod manager;
mod orchestrator;
mod patch;
mod platform;
mod poller;
mod registry;
mod settings;
mod status_bus;
mod storage;
mod subscription;
mod types;

pub use allocator::{PortAllocator, DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};
pub use config_store::ConfigurationStore;
pub use control_plane::{ControlPlane, CONTROL_PLANE_SOURCE};
pub use error::{ControlPlaneError, Result};
pub use events::{
    ChannelName, ControlPlaneEvent, EventChannel, EventStream, InMemoryEventChannel,
    InstanceDeletedEvent, InstanceStartedEvent, InstanceStatusChangedEvent, InstanceStoppedEvent,
    DEFAULT_EVENT_CHANNEL_CAPACITY,
};
pub use factory::ManagerRegistry;
pub use manager::InstanceManager;
pub use orchestrator::{FixedPlatformStrategy, PlacementStrategy, PlatformOrchestrator};
pub use patch::PatchOperation;
pub use platform::{ClusterManager, ContainerManager, ProcessManager, DEFAULT_CLUSTER_PORT};
pub use poller::{StatusPoller, DEFAULT_POLL_INTERVAL};
pub use registry::InstanceRegistry;
pub use settings::ControlPlaneSettings;
pub use status_bus::{StatusBus, DEFAULT_RECENT_CHANGES_CAPACITY};
pub use storage::{
    ConfigurationStorage, FileConfigurationStorage, FileInstanceStorage,
    InMemoryConfigurationStorage, InMemoryInstanceStorage, InMemoryRuntimeStore, InstanceRecord,
    InstanceStorage, RuntimeStore,
};
pub use subscription::EventSubscriptionLoop;
pub use types::{
    Instance, InstanceConfiguration, InstanceId, InstanceStatus, Platform, ResourceAllocation,
    RuntimeInfo, ServerSettings, StatusChangeRecord, DEFAULT_LOG_LEVEL, LOOPBACK_HOST,
};
