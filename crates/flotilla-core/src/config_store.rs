//! Desired-state configuration documents, one per instance.
//!
//! Each document moves through a small state machine:
//!
//! ```text
//!  absent ──initialize──▶ active ──delete──▶ absent
//!                          │  ▲
//!                          └──┘ patch / update / purge
//! ```
//!
//! Every mutation checks that the instance exists in the registry and that
//! its document is active, computes the new document from a copy, persists
//! it, and only then swaps it into memory. A failed patch or a failed write
//! leaves both views unchanged.

use crate::error::{ControlPlaneError, Result};
use crate::locks::KeyedLocks;
use crate::patch::{self, PatchOperation};
use crate::registry::InstanceRegistry;
use crate::storage::ConfigurationStorage;
use crate::types::{InstanceConfiguration, InstanceId, ServerSettings};
use dashmap::DashMap;
use std::sync::Arc;

/// Per-instance configuration store backed by durable storage.
pub struct ConfigurationStore {
    configurations: DashMap<InstanceId, InstanceConfiguration>,
    storage: Arc<dyn ConfigurationStorage>,
    registry: Arc<InstanceRegistry>,
    locks: KeyedLocks,
}

impl ConfigurationStore {
    /// Create an empty store.
    pub fn new(registry: Arc<InstanceRegistry>, storage: Arc<dyn ConfigurationStorage>) -> Self {
        Self {
            configurations: DashMap::new(),
            storage,
            registry,
            locks: KeyedLocks::new(),
        }
    }

    /// Load persisted documents for instances known to the registry.
    ///
    /// Documents belonging to unknown instances are skipped. Returns the
    /// number of documents installed.
    pub async fn load_persisted(&self) -> Result<usize> {
        let mut loaded = 0;
        for (id, configuration) in self.storage.list().await? {
            if !self.registry.exists(&id) {
                tracing::warn!(instance_id = %id, "Skipping configuration for unknown instance");
                continue;
            }
            self.configurations.insert(id, configuration);
            loaded += 1;
        }
        tracing::info!(count = loaded, "Persisted configurations loaded");
        Ok(loaded)
    }

    /// Create the document for an instance bound to `host:port`.
    ///
    /// # Errors
    ///
    /// - `InstanceNotFound` if the instance is not registered
    /// - `InvalidOperation` if the document already exists
    pub async fn initialize(
        &self,
        id: &InstanceId,
        host: &str,
        port: u16,
    ) -> Result<InstanceConfiguration> {
        self.ensure_instance(id)?;
        let _guard = self.locks.lock(id).await;

        if self.configurations.contains_key(id) {
            return Err(ControlPlaneError::InvalidOperation(format!(
                "configuration for instance {id} is already initialized"
            )));
        }

        let configuration = InstanceConfiguration::new(host, port);
        self.storage.save(id, &configuration).await?;
        self.configurations.insert(id.clone(), configuration.clone());
        tracing::debug!(instance_id = %id, host, port, "Configuration initialized");
        Ok(configuration)
    }

    /// Get the full document.
    ///
    /// # Errors
    ///
    /// - `InstanceNotFound` if the instance is not registered
    /// - `ConfigurationNotInitialized` if the document is absent
    pub fn get_configuration(&self, id: &InstanceId) -> Result<InstanceConfiguration> {
        self.ensure_instance(id)?;
        self.current(id)
    }

    /// Apply a patch to the full document as one atomic edit.
    ///
    /// # Errors
    ///
    /// `InstanceNotFound`, `ConfigurationNotInitialized`, `InvalidPatch`, or a
    /// storage error. The stored document is unchanged on error.
    pub async fn apply_patch(
        &self,
        id: &InstanceId,
        operations: &[PatchOperation],
    ) -> Result<InstanceConfiguration> {
        let updated = self
            .mutate(id, |current| patch::apply_to(current, operations))
            .await?;
        tracing::debug!(instance_id = %id, operations = operations.len(), "Configuration patched");
        Ok(updated)
    }

    /// Get the `{host, port, logLevel}` projection.
    pub fn get_server_configuration(&self, id: &InstanceId) -> Result<ServerSettings> {
        self.get_configuration(id).map(|c| c.server_settings())
    }

    /// Apply a patch to the `{host, port, logLevel}` projection only.
    ///
    /// Paths outside the projection fail with `InvalidPatch`; sources,
    /// queries and reactions are never touched.
    pub async fn apply_server_patch(
        &self,
        id: &InstanceId,
        operations: &[PatchOperation],
    ) -> Result<ServerSettings> {
        let updated = self
            .mutate(id, |current| {
                let settings = patch::apply_to(&current.server_settings(), operations)?;
                let mut next = current.clone();
                next.apply_server_settings(settings);
                Ok(next)
            })
            .await?;
        tracing::debug!(instance_id = %id, operations = operations.len(), "Server configuration patched");
        Ok(updated.server_settings())
    }

    /// Set the bound host.
    pub async fn update_host(&self, id: &InstanceId, host: &str) -> Result<ServerSettings> {
        self.apply_server_patch(id, &[PatchOperation::replace("/host", host)])
            .await
    }

    /// Set the bound port.
    pub async fn update_port(&self, id: &InstanceId, port: u16) -> Result<ServerSettings> {
        self.apply_server_patch(id, &[PatchOperation::replace("/port", port)])
            .await
    }

    /// Set the log level.
    pub async fn update_log_level(&self, id: &InstanceId, level: &str) -> Result<ServerSettings> {
        self.apply_server_patch(id, &[PatchOperation::replace("/logLevel", level)])
            .await
    }

    /// Reset the document to defaults in place.
    ///
    /// The network binding is kept because it reflects allocated resources;
    /// the log level returns to its default and all lists are emptied. The
    /// document stays active.
    pub async fn purge(&self, id: &InstanceId) -> Result<InstanceConfiguration> {
        let purged = self
            .mutate(id, |current| {
                Ok(InstanceConfiguration::new(current.host.clone(), current.port))
            })
            .await?;
        tracing::info!(instance_id = %id, "Configuration purged");
        Ok(purged)
    }

    /// Remove the document. Returns whether one existed.
    ///
    /// Unlike mutations this does not require the instance to be registered,
    /// so it can run after the registry record is gone.
    pub async fn delete(&self, id: &InstanceId) -> Result<bool> {
        let existed = {
            let _guard = self.locks.lock(id).await;
            self.storage.delete(id).await?;
            self.configurations.remove(id).is_some()
        };
        self.locks.forget(id);
        if existed {
            tracing::debug!(instance_id = %id, "Configuration deleted");
        }
        Ok(existed)
    }

    /// Whether the instance has an active document.
    pub fn is_initialized(&self, id: &InstanceId) -> bool {
        self.configurations.contains_key(id)
    }

    async fn mutate<F>(&self, id: &InstanceId, edit: F) -> Result<InstanceConfiguration>
    where
        F: FnOnce(&InstanceConfiguration) -> Result<InstanceConfiguration>,
    {
        self.ensure_instance(id)?;
        let _guard = self.locks.lock(id).await;

        let current = self.current(id)?;
        let updated = edit(&current)?;
        self.storage.save(id, &updated).await?;
        self.configurations.insert(id.clone(), updated.clone());
        Ok(updated)
    }

    fn ensure_instance(&self, id: &InstanceId) -> Result<()> {
        if self.registry.exists(id) {
            Ok(())
        } else {
            Err(ControlPlaneError::InstanceNotFound(id.clone()))
        }
    }

    fn current(&self, id: &InstanceId) -> Result<InstanceConfiguration> {
        self.configurations
            .get(id)
            .map(|c| c.value().clone())
            .ok_or_else(|| ControlPlaneError::ConfigurationNotInitialized(id.clone()))
    }
}
