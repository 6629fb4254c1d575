//! Built-in platform managers.
//!
//! These managers keep the control plane's view of each platform: which
//! instances were started, with which binding, and their last status. The
//! actual process, container and cluster runtimes are driven by platform-side
//! agents that report back through the [`StatusBus`](crate::StatusBus).

mod cluster;
mod container;
mod process;

pub use cluster::{ClusterManager, DEFAULT_CLUSTER_PORT};
pub use container::ContainerManager;
pub use process::ProcessManager;

use crate::error::{ControlPlaneError, Result};
use crate::types::{InstanceConfiguration, InstanceId, InstanceStatus, Platform, RuntimeInfo};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

struct Entry {
    info: RuntimeInfo,
    configuration: InstanceConfiguration,
}

/// Per-platform record of started instances.
pub(crate) struct RuntimeTable {
    platform: Platform,
    entries: DashMap<InstanceId, Entry>,
    available: AtomicBool,
}

impl RuntimeTable {
    pub(crate) fn new(platform: Platform) -> Self {
        Self {
            platform,
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub(crate) fn start(
        &self,
        id: &InstanceId,
        configuration: &InstanceConfiguration,
        metadata: HashMap<String, String>,
    ) -> RuntimeInfo {
        let now = Utc::now();
        let mut entry = self.entries.entry(id.clone()).or_insert_with(|| Entry {
            info: RuntimeInfo::new(id.clone(), self.platform, InstanceStatus::Created),
            configuration: configuration.clone(),
        });
        entry.configuration = configuration.clone();
        entry.info.status = InstanceStatus::Running;
        entry.info.started_at = Some(now);
        entry.info.status_changed_at = Some(now);
        entry.info.metadata.extend(metadata);
        entry.info.clone()
    }

    pub(crate) fn stop(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))?;
        if entry.info.status != InstanceStatus::Stopped {
            let now = Utc::now();
            entry.info.status = InstanceStatus::Stopped;
            entry.info.stopped_at = Some(now);
            entry.info.status_changed_at = Some(now);
        }
        Ok(entry.info.clone())
    }

    pub(crate) fn configuration(&self, id: &InstanceId) -> Result<InstanceConfiguration> {
        self.entries
            .get(id)
            .map(|e| e.configuration.clone())
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))
    }

    pub(crate) fn get(&self, id: &InstanceId) -> Result<RuntimeInfo> {
        self.entries
            .get(id)
            .map(|e| e.info.clone())
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(id.clone()))
    }

    pub(crate) fn list(&self) -> Vec<RuntimeInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    pub(crate) fn remove(&self, id: &InstanceId) {
        self.entries.remove(id);
    }

    pub(crate) fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}
