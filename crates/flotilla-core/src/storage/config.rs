//! Durable storage for configuration documents.

use super::file::JsonDir;
use crate::error::Result;
use crate::types::{InstanceConfiguration, InstanceId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Persistence for one configuration document per instance.
///
/// Writes are always full documents; there is no partial-write contract.
#[async_trait]
pub trait ConfigurationStorage: Send + Sync {
    /// Write the full document for an instance.
    async fn save(&self, id: &InstanceId, configuration: &InstanceConfiguration) -> Result<()>;

    /// Read the document for an instance, if one was saved.
    async fn load(&self, id: &InstanceId) -> Result<Option<InstanceConfiguration>>;

    /// Remove the document for an instance. Missing documents are not an error.
    async fn delete(&self, id: &InstanceId) -> Result<()>;

    /// Read every stored document.
    async fn list(&self) -> Result<Vec<(InstanceId, InstanceConfiguration)>>;
}

/// In-memory configuration storage for development and testing.
#[derive(Default)]
pub struct InMemoryConfigurationStorage {
    documents: DashMap<InstanceId, InstanceConfiguration>,
}

impl InMemoryConfigurationStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ConfigurationStorage for InMemoryConfigurationStorage {
    async fn save(&self, id: &InstanceId, configuration: &InstanceConfiguration) -> Result<()> {
        self.documents.insert(id.clone(), configuration.clone());
        Ok(())
    }

    async fn load(&self, id: &InstanceId) -> Result<Option<InstanceConfiguration>> {
        Ok(self.documents.get(id).map(|d| d.value().clone()))
    }

    async fn delete(&self, id: &InstanceId) -> Result<()> {
        self.documents.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(InstanceId, InstanceConfiguration)>> {
        Ok(self
            .documents
            .iter()
            .map(|d| (d.key().clone(), d.value().clone()))
            .collect())
    }
}

/// Stores each document as `<dir>/<instance-id>.json`.
///
/// Saves write a temporary file and rename it into place, so readers never
/// observe a half-written document.
#[derive(Debug, Clone)]
pub struct FileConfigurationStorage {
    files: JsonDir,
}

impl FileConfigurationStorage {
    /// Store documents under `dir`, created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            files: JsonDir::new(dir),
        }
    }

    /// The storage directory.
    pub fn dir(&self) -> &Path {
        self.files.dir()
    }
}

#[async_trait]
impl ConfigurationStorage for FileConfigurationStorage {
    async fn save(&self, id: &InstanceId, configuration: &InstanceConfiguration) -> Result<()> {
        self.files.save(id, configuration).await
    }

    async fn load(&self, id: &InstanceId) -> Result<Option<InstanceConfiguration>> {
        self.files.load(id).await
    }

    async fn delete(&self, id: &InstanceId) -> Result<()> {
        self.files.delete(id).await
    }

    async fn list(&self) -> Result<Vec<(InstanceId, InstanceConfiguration)>> {
        self.files.list().await
    }
}
