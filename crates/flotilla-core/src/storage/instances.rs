//! Durable storage for instance records.

use super::file::JsonDir;
use crate::error::Result;
use crate::types::{Instance, InstanceId, ResourceAllocation};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the control plane needs to rebuild an instance after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Registry record as last written by the control plane.
    pub instance: Instance,
    /// Binding the instance was placed on.
    pub allocation: ResourceAllocation,
}

/// Persistence for one [`InstanceRecord`] per instance.
#[async_trait]
pub trait InstanceStorage: Send + Sync {
    /// Insert or replace the record for `record.instance.id()`.
    async fn save(&self, record: &InstanceRecord) -> Result<()>;

    /// Remove a record. Missing records are not an error.
    async fn delete(&self, id: &InstanceId) -> Result<()>;

    /// Read every stored record.
    async fn list(&self) -> Result<Vec<InstanceRecord>>;
}

/// In-memory instance storage. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryInstanceStorage {
    records: DashMap<InstanceId, InstanceRecord>,
}

impl InMemoryInstanceStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStorage for InMemoryInstanceStorage {
    async fn save(&self, record: &InstanceRecord) -> Result<()> {
        self.records
            .insert(record.instance.id().clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &InstanceId) -> Result<()> {
        self.records.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

/// Stores each record as `<dir>/<instance-id>.json`.
#[derive(Debug, Clone)]
pub struct FileInstanceStorage {
    files: JsonDir,
}

impl FileInstanceStorage {
    /// Store records under `dir`, created on first save.
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
impl InstanceStorage for FileInstanceStorage {
    async fn save(&self, record: &InstanceRecord) -> Result<()> {
        self.files.save(record.instance.id(), record).await
    }

    async fn delete(&self, id: &InstanceId) -> Result<()> {
        self.files.delete(id).await
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>> {
        let records: Vec<(InstanceId, InstanceRecord)> = self.files.list().await?;
        Ok(records
            .into_iter()
            .filter_map(|(id, record)| {
                if record.instance.id() == &id {
                    Some(record)
                } else {
                    tracing::warn!(instance_id = %id, "Instance record filed under the wrong id, skipping");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;

    fn record(port: u16) -> InstanceRecord {
        InstanceRecord {
            instance: Instance::new("alpha", "", Platform::Process),
            allocation: ResourceAllocation::allocated("127.0.0.1", port),
        }
    }

    #[tokio::test]
    async fn test_in_memory_save_list_delete() {
        let storage = InMemoryInstanceStorage::new();
        let record = record(8080);
        storage.save(&record).await.unwrap();
        assert_eq!(storage.list().await.unwrap(), vec![record.clone()]);

        storage.delete(record.instance.id()).await.unwrap();
        storage.delete(record.instance.id()).await.unwrap();
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("flotilla-instances-{}", uuid::Uuid::new_v4()));
        let record = record(8181);
        FileInstanceStorage::new(&dir).save(&record).await.unwrap();

        let reopened = FileInstanceStorage::new(&dir);
        assert_eq!(reopened.list().await.unwrap(), vec![record.clone()]);

        reopened.delete(record.instance.id()).await.unwrap();
        assert!(reopened.list().await.unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
