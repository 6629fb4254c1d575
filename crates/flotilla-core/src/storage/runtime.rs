//! Storage for last-known runtime status.

use crate::error::Result;
use crate::types::{InstanceId, Platform, RuntimeInfo};
use async_trait::async_trait;
use dashmap::DashMap;

/// Keyed store of [`RuntimeInfo`] records.
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    /// Get the runtime info for an instance.
    async fn get(&self, id: &InstanceId) -> Result<Option<RuntimeInfo>>;

    /// Insert or replace the runtime info for `info.instance_id`.
    async fn save(&self, info: RuntimeInfo) -> Result<()>;

    /// Remove the runtime info for an instance. Returns whether it existed.
    async fn delete(&self, id: &InstanceId) -> Result<bool>;

    /// List every record.
    async fn list(&self) -> Result<Vec<RuntimeInfo>>;

    /// List records reported by one platform.
    async fn list_by_platform(&self, platform: Platform) -> Result<Vec<RuntimeInfo>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|info| info.platform == platform)
            .collect())
    }
}

/// In-memory runtime store.
#[derive(Default)]
pub struct InMemoryRuntimeStore {
    records: DashMap<InstanceId, RuntimeInfo>,
}

impl InMemoryRuntimeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeStore for InMemoryRuntimeStore {
    async fn get(&self, id: &InstanceId) -> Result<Option<RuntimeInfo>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn save(&self, info: RuntimeInfo) -> Result<()> {
        self.records.insert(info.instance_id.clone(), info);
        Ok(())
    }

    async fn delete(&self, id: &InstanceId) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<RuntimeInfo>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}
