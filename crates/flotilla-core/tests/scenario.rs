//! End-to-end tests for flotilla-core.
//!
//! These run entirely in-process: built-in managers, in-memory event
//! channel, and memory- or file-backed configuration storage.

use chrono::Utc;
use flotilla_core::{
    ChannelName, ConfigurationStore, ControlPlane, ControlPlaneSettings, EventChannel,
    FileConfigurationStorage, InMemoryConfigurationStorage, InMemoryEventChannel,
    InMemoryRuntimeStore, InstanceManager, InstanceRegistry, InstanceStatus, ManagerRegistry,
    PatchOperation, Platform, PlatformOrchestrator, PortAllocator, ProcessManager, RuntimeInfo,
    RuntimeStore, StatusBus,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator() -> Arc<PlatformOrchestrator> {
    let managers: Vec<Arc<dyn InstanceManager>> = vec![Arc::new(ProcessManager::new())];
    let managers = Arc::new(ManagerRegistry::new(managers, Platform::Process).unwrap());
    Arc::new(PlatformOrchestrator::new(
        managers,
        Arc::new(PortAllocator::default()),
    ))
}

/// Walk one instance through selection, allocation, configuration, status
/// reconciliation and release using the components directly.
#[tokio::test]
async fn test_instance_lifecycle_through_components() {
    let orchestrator = orchestrator();
    let registry = Arc::new(InstanceRegistry::new(orchestrator.clone()));
    let configurations = ConfigurationStore::new(
        registry.clone(),
        Arc::new(InMemoryConfigurationStorage::new()),
    );
    let runtime = Arc::new(InMemoryRuntimeStore::new());
    let bus = StatusBus::new(runtime.clone(), Arc::new(InMemoryEventChannel::default()));
    let created_at = Utc::now();

    // Create without a platform: the default is selected
    let instance = registry.create("alpha", "scenario", None);
    let id = instance.id().clone();
    assert_eq!(instance.platform, Platform::Process);
    assert_eq!(instance.status(), InstanceStatus::Created);

    // Allocate for the process platform
    let allocation = orchestrator.allocate_resources(Platform::Process).await.unwrap();
    assert_eq!(allocation.host, "127.0.0.1");
    assert!((8080..=9000).contains(&allocation.port));
    assert!(orchestrator.allocator().is_allocated(allocation.port));

    // Initialize with the allocated binding
    configurations
        .initialize(&id, &allocation.host, allocation.port)
        .await
        .unwrap();
    let config = configurations.get_configuration(&id).unwrap();
    assert!(config.sources.is_empty());
    assert!(config.queries.is_empty());
    assert!(config.reactions.is_empty());

    // Server patch touches only the projection
    configurations.update_log_level(&id, "debug").await.unwrap();
    let server = configurations.get_server_configuration(&id).unwrap();
    assert_eq!(server.log_level, "debug");
    let config = configurations.get_configuration(&id).unwrap();
    assert!(config.sources.is_empty() && config.queries.is_empty() && config.reactions.is_empty());

    // Agent reports Running
    runtime
        .save(RuntimeInfo::new(id.clone(), Platform::Process, InstanceStatus::Created))
        .await
        .unwrap();
    bus.publish_status_update(&id, InstanceStatus::Running, "worker-1", None)
        .await
        .unwrap();
    let info = bus.get_last_known_status(&id).await.unwrap().unwrap();
    assert_eq!(info.status, InstanceStatus::Running);
    let changes = bus.get_recent_changes(created_at, None).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].old_status, InstanceStatus::Created);
    assert_eq!(changes[0].new_status, InstanceStatus::Running);

    // Delete, then release twice
    assert!(registry.delete(&id));
    orchestrator.release_resources(&id, &allocation);
    assert!(!orchestrator.allocator().is_allocated(allocation.port));
    orchestrator.release_resources(&id, &allocation);
    assert_eq!(orchestrator.allocator().allocated_count(), 0);
}

/// Status pushed by an agent reaches the registry through the event channel.
#[tokio::test]
async fn test_agent_status_reconciles_registry() {
    let control_plane = ControlPlane::from_settings(ControlPlaneSettings {
        poll_interval_secs: 0,
        ..Default::default()
    })
    .unwrap();
    let shutdown = CancellationToken::new();
    let handles = control_plane.spawn_background(shutdown.clone()).await.unwrap();
    assert_eq!(handles.len(), 1);

    let id = control_plane
        .create_instance("alpha", "", None)
        .await
        .unwrap()
        .id()
        .clone();
    control_plane.start_instance(&id).await.unwrap();

    control_plane
        .status_bus()
        .publish_status_update(&id, InstanceStatus::Error, "agent", None)
        .await
        .unwrap();

    let mut reconciled = false;
    for _ in 0..100 {
        if control_plane.get_instance(&id).map(|i| i.status()) == Some(InstanceStatus::Error) {
            reconciled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reconciled, "registry never observed the agent's status");

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Lifecycle events are published on the instance channel.
#[tokio::test]
async fn test_lifecycle_events_published() {
    let control_plane = ControlPlane::from_settings(ControlPlaneSettings {
        poll_interval_secs: 0,
        ..Default::default()
    })
    .unwrap();
    let mut events = control_plane
        .channel()
        .subscribe(ChannelName::InstanceEvents)
        .await
        .unwrap();

    let id = control_plane
        .create_instance("alpha", "", None)
        .await
        .unwrap()
        .id()
        .clone();
    control_plane.start_instance(&id).await.unwrap();
    control_plane.stop_instance(&id).await.unwrap();
    control_plane.delete_instance(&id).await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.instance_id(), &id);
        kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
    }
    assert_eq!(
        kinds,
        vec!["InstanceStarted", "InstanceStopped", "InstanceDeleted"]
    );
}

/// Persisted documents are hydrated by a fresh store over the same directory.
#[tokio::test]
async fn test_file_storage_hydration() {
    let dir = std::env::temp_dir().join(format!("flotilla-scenario-{}", uuid::Uuid::new_v4()));
    let registry = Arc::new(InstanceRegistry::new(orchestrator()));
    let id = registry.create("alpha", "", None).id().clone();

    let first = ConfigurationStore::new(registry.clone(), Arc::new(FileConfigurationStorage::new(&dir)));
    first.initialize(&id, "127.0.0.1", 8080).await.unwrap();
    first
        .apply_patch(
            &id,
            &[PatchOperation::add("/queries/-", serde_json::json!({"id": "q1"}))],
        )
        .await
        .unwrap();

    let second = ConfigurationStore::new(registry, Arc::new(FileConfigurationStorage::new(&dir)));
    assert_eq!(second.load_persisted().await.unwrap(), 1);
    let config = second.get_configuration(&id).unwrap();
    assert_eq!(config.queries, vec![serde_json::json!({"id": "q1"})]);

    let _ = std::fs::remove_dir_all(&dir);
}
