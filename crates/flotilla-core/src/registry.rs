//! Authoritative store of instance metadata.

use crate::error::{ControlPlaneError, Result};
use crate::orchestrator::PlatformOrchestrator;
use crate::types::{Instance, InstanceId, InstanceStatus, Platform};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Manages instance metadata keyed by id.
///
/// # Thread Safety
///
/// Records live in a sharded concurrent map. Each operation on one id is a
/// single locked write on that id's shard; different ids proceed in parallel.
pub struct InstanceRegistry {
    instances: DashMap<InstanceId, Instance>,
    orchestrator: Arc<PlatformOrchestrator>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new(orchestrator: Arc<PlatformOrchestrator>) -> Self {
        Self {
            instances: DashMap::new(),
            orchestrator,
        }
    }

    /// Register a new instance in status `Created`.
    ///
    /// When `platform` is `None` the orchestrator's placement strategy picks one.
    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        platform: Option<Platform>,
    ) -> Instance {
        let platform = platform.unwrap_or_else(|| self.orchestrator.select_platform());
        let instance = Instance::new(name, description, platform);
        self.instances.insert(instance.id().clone(), instance.clone());
        tracing::info!(
            instance_id = %instance.id(),
            name = %instance.name,
            %platform,
            "Instance registered"
        );
        instance
    }

    /// Replace the editable fields of an instance.
    ///
    /// The id, status and creation time of the stored record are kept; the
    /// id carried by `instance` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` if `id` is unknown.
    pub fn update(&self, id: &InstanceId, instance: Instance) -> Result<Instance> {
        let mut entry = self
            .instances
            .get_mut(id)
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))?;
        entry.apply_update(instance);
        tracing::debug!(instance_id = %id, "Instance updated");
        Ok(entry.value().clone())
    }

    /// Set the coarse lifecycle status of an instance.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` if `id` is unknown.
    pub fn update_status(&self, id: &InstanceId, status: InstanceStatus) -> Result<Instance> {
        let mut entry = self
            .instances
            .get_mut(id)
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))?;
        let old = entry.status();
        entry.set_status(status);
        tracing::debug!(instance_id = %id, from = %old, to = %status, "Instance status updated");
        Ok(entry.value().clone())
    }

    /// Remove an instance. Returns whether it existed.
    pub fn delete(&self, id: &InstanceId) -> bool {
        let existed = self.instances.remove(id).is_some();
        if existed {
            tracing::info!(instance_id = %id, "Instance removed from registry");
        }
        existed
    }

    /// Re-insert a record loaded from durable storage, keeping its id,
    /// status and timestamps. Returns `false` if the id is already present.
    pub fn restore(&self, instance: Instance) -> bool {
        match self.instances.entry(instance.id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::debug!(instance_id = %instance.id(), "Instance restored");
                slot.insert(instance);
                true
            }
        }
    }

    /// Check if an instance exists.
    pub fn exists(&self, id: &InstanceId) -> bool {
        self.instances.contains_key(id)
    }

    /// Get a snapshot of an instance.
    pub fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.instances.get(id).map(|e| e.value().clone())
    }

    /// List all instances, oldest first.
    pub fn list(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self.instances.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|i| i.created_at());
        all
    }

    /// List instances currently in `status`, oldest first.
    pub fn list_by_status(&self, status: InstanceStatus) -> Vec<Instance> {
        let mut matching: Vec<Instance> = self
            .instances
            .iter()
            .filter(|e| e.status() == status)
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by_key(|i| i.created_at());
        matching
    }

    /// Number of registered instances.
    pub fn count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PortAllocator;
    use crate::factory::ManagerRegistry;
    use crate::manager::InstanceManager;
    use crate::platform::{ContainerManager, ProcessManager};

    fn registry() -> InstanceRegistry {
        let managers: Vec<Arc<dyn InstanceManager>> = vec![
            Arc::new(ProcessManager::new()),
            Arc::new(ContainerManager::new()),
        ];
        let managers = Arc::new(ManagerRegistry::new(managers, Platform::Process).unwrap());
        let orchestrator = Arc::new(PlatformOrchestrator::new(
            managers,
            Arc::new(PortAllocator::default()),
        ));
        InstanceRegistry::new(orchestrator)
    }

    #[test]
    fn test_create_uses_default_platform() {
        let registry = registry();
        let instance = registry.create("alpha", "first", None);
        assert_eq!(instance.platform, Platform::Process);
        assert_eq!(instance.status(), InstanceStatus::Created);
        assert!(registry.exists(instance.id()));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_create_with_explicit_platform() {
        let registry = registry();
        let instance = registry.create("beta", "", Some(Platform::Container));
        assert_eq!(instance.platform, Platform::Container);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = registry();
        let a = registry.create("a", "", None);
        let b = registry.create("a", "", None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_update_status_stamps_modified_time() {
        let registry = registry();
        let instance = registry.create("alpha", "", None);
        let updated = registry
            .update_status(instance.id(), InstanceStatus::Running)
            .unwrap();
        assert_eq!(updated.status(), InstanceStatus::Running);
        assert!(updated.updated_at() >= instance.updated_at());
        assert_eq!(updated.created_at(), instance.created_at());
    }

    #[test]
    fn test_update_cannot_change_id_or_status() {
        let registry = registry();
        let instance = registry.create("alpha", "", None);
        let mut replacement = registry.create("other", "", None);
        registry
            .update_status(replacement.id(), InstanceStatus::Error)
            .unwrap();
        replacement = registry.get(replacement.id()).unwrap();
        replacement.name = "renamed".to_string();
        replacement.metadata.insert("team".into(), "data".into());

        let updated = registry.update(instance.id(), replacement).unwrap();
        assert_eq!(updated.id(), instance.id());
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.status(), InstanceStatus::Created);
        assert_eq!(updated.metadata.get("team").map(String::as_str), Some("data"));
    }

    #[test]
    fn test_missing_instance_errors() {
        let registry = registry();
        let id = InstanceId::new();
        assert!(matches!(
            registry.update_status(&id, InstanceStatus::Running),
            Err(ControlPlaneError::InstanceNotFound(_))
        ));
        let other = registry.create("x", "", None);
        assert!(matches!(
            registry.update(&id, other),
            Err(ControlPlaneError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_restore_keeps_identity_and_status() {
        let source = registry();
        let created = source.create("alpha", "", None);
        let running = source.update_status(created.id(), InstanceStatus::Running).unwrap();

        let target = registry();
        assert!(target.restore(running.clone()));
        assert!(!target.restore(running.clone()));
        assert_eq!(target.get(running.id()), Some(running));
    }

    #[test]
    fn test_delete_reports_existence() {
        let registry = registry();
        let instance = registry.create("alpha", "", None);
        assert!(registry.delete(instance.id()));
        assert!(!registry.delete(instance.id()));
        assert!(!registry.exists(instance.id()));
        assert!(registry.get(instance.id()).is_none());
    }

    #[test]
    fn test_list_by_status() {
        let registry = registry();
        let a = registry.create("a", "", None);
        registry.create("b", "", None);
        registry.update_status(a.id(), InstanceStatus::Running).unwrap();

        assert_eq!(registry.list().len(), 2);
        let running = registry.list_by_status(InstanceStatus::Running);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id(), a.id());
    }
}
