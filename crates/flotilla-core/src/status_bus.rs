//! Reconciliation hub for status reports.
//!
//! Status reports arrive from pollers and from platform-side agents. For each
//! report that actually changes an instance's status the bus:
//!
//! 1. updates the runtime store (the source of truth),
//! 2. appends a [`StatusChangeRecord`] to a bounded ring for polling clients,
//! 3. republishes the change on [`ChannelName::StatusEvents`] (best-effort),
//! 4. notifies in-process subscribers.
//!
//! Duplicate reports (same status as stored) do nothing at all. Reports taken
//! from a platform manager's own records go through
//! [`StatusBus::apply_report`], which also drops reports older than the last
//! recorded transition.

use crate::error::Result;
use crate::events::{ChannelName, ControlPlaneEvent, EventChannel, InstanceStatusChangedEvent};
use crate::locks::KeyedLocks;
use crate::storage::RuntimeStore;
use crate::types::{InstanceId, InstanceStatus, RuntimeInfo, StatusChangeRecord};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Default number of status changes retained for polling clients.
pub const DEFAULT_RECENT_CHANGES_CAPACITY: usize = 1000;

/// Merges polled and pushed status into one authoritative view.
pub struct StatusBus {
    runtime: Arc<dyn RuntimeStore>,
    channel: Arc<dyn EventChannel>,
    recent: Mutex<VecDeque<StatusChangeRecord>>,
    capacity: usize,
    notifier: broadcast::Sender<StatusChangeRecord>,
    locks: KeyedLocks,
}

impl StatusBus {
    /// Create a bus retaining the default number of recent changes.
    pub fn new(runtime: Arc<dyn RuntimeStore>, channel: Arc<dyn EventChannel>) -> Self {
        Self::with_capacity(runtime, channel, DEFAULT_RECENT_CHANGES_CAPACITY)
    }

    /// Create a bus retaining at most `capacity` recent changes (minimum 1).
    pub fn with_capacity(
        runtime: Arc<dyn RuntimeStore>,
        channel: Arc<dyn EventChannel>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let (notifier, _) = broadcast::channel(capacity);
        Self {
            runtime,
            channel,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notifier,
            locks: KeyedLocks::new(),
        }
    }

    /// Report a status for an instance.
    ///
    /// Returns the recorded change, or `None` when the instance has no
    /// runtime record yet or is already in `new_status`. Supplied metadata is
    /// merged into the runtime metadata (new keys overwrite).
    ///
    /// # Errors
    ///
    /// Only runtime-store failures are returned. Republish failures are
    /// logged and swallowed after the local update has been committed.
    pub async fn publish_status_update(
        &self,
        instance_id: &InstanceId,
        new_status: InstanceStatus,
        source: impl Into<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Option<StatusChangeRecord>> {
        let source = source.into();
        let _guard = self.locks.lock(instance_id).await;

        let Some(mut info) = self.runtime.get(instance_id).await? else {
            tracing::debug!(instance_id = %instance_id, %source, "Status update for unknown runtime, ignoring");
            return Ok(None);
        };
        if info.status == new_status {
            tracing::trace!(instance_id = %instance_id, status = %new_status, "Duplicate status report");
            return Ok(None);
        }
        if let Some(metadata) = metadata {
            info.metadata.extend(metadata);
        }
        self.commit(info, new_status, source).await.map(Some)
    }

    /// Fold a platform manager's view of an instance into the runtime record.
    ///
    /// Start/stop timestamps and metadata from `report` are merged even when
    /// the status is unchanged. A report whose `status_changed_at` is not
    /// newer than the stored one is stale (the record has moved on since the
    /// platform last observed it) and is ignored entirely.
    ///
    /// Returns the recorded change, if the status changed.
    pub async fn apply_report(
        &self,
        report: RuntimeInfo,
        source: impl Into<String>,
    ) -> Result<Option<StatusChangeRecord>> {
        let source = source.into();
        let instance_id = report.instance_id.clone();
        let _guard = self.locks.lock(&instance_id).await;

        let Some(mut info) = self.runtime.get(&instance_id).await? else {
            tracing::debug!(instance_id = %instance_id, %source, "Report for unknown runtime, ignoring");
            return Ok(None);
        };
        if let (Some(seen), Some(reported)) = (info.status_changed_at, report.status_changed_at) {
            if reported <= seen {
                tracing::trace!(instance_id = %instance_id, %source, "Stale report");
                return Ok(None);
            }
        }

        let mut touched = false;
        if report.started_at.is_some() && report.started_at != info.started_at {
            info.started_at = report.started_at;
            touched = true;
        }
        if report.stopped_at.is_some() && report.stopped_at != info.stopped_at {
            info.stopped_at = report.stopped_at;
            touched = true;
        }
        for (key, value) in report.metadata {
            if info.metadata.get(&key) != Some(&value) {
                info.metadata.insert(key, value);
                touched = true;
            }
        }

        if info.status == report.status {
            if touched {
                self.runtime.save(info).await?;
            }
            return Ok(None);
        }
        self.commit(info, report.status, source).await.map(Some)
    }

    /// Record a transition of `info` to `new_status`. Callers hold the
    /// instance's lock.
    async fn commit(
        &self,
        mut info: RuntimeInfo,
        new_status: InstanceStatus,
        source: String,
    ) -> Result<StatusChangeRecord> {
        let instance_id = info.instance_id.clone();
        let old_status = info.status;
        let now = Utc::now();
        info.status = new_status;
        info.status_changed_at = Some(now);
        if new_status == InstanceStatus::Stopped {
            info.stopped_at = Some(now);
        }
        let snapshot = info.metadata.clone();
        self.runtime.save(info).await?;

        let record = self
            .record(StatusChangeRecord {
                instance_id: instance_id.clone(),
                old_status,
                new_status,
                source: source.clone(),
                timestamp: now,
                metadata: snapshot,
            })
            .await;
        tracing::debug!(
            instance_id = %instance_id,
            from = %old_status,
            to = %new_status,
            %source,
            "Status changed"
        );

        let event = ControlPlaneEvent::InstanceStatusChanged(InstanceStatusChangedEvent {
            instance_id: instance_id.clone(),
            old_status,
            new_status,
            source,
        });
        if let Err(e) = self.channel.publish(ChannelName::StatusEvents, event).await {
            tracing::warn!(instance_id = %instance_id, error = %e, "Failed to republish status change");
        }

        // no receivers is fine
        let _ = self.notifier.send(record.clone());
        Ok(record)
    }

    /// Last known runtime info for an instance.
    pub async fn get_last_known_status(&self, instance_id: &InstanceId) -> Result<Option<RuntimeInfo>> {
        self.runtime.get(instance_id).await
    }

    /// Changes recorded at or after `since`, oldest first, optionally only
    /// those ending in `status`.
    pub async fn get_recent_changes(
        &self,
        since: DateTime<Utc>,
        status: Option<InstanceStatus>,
    ) -> Vec<StatusChangeRecord> {
        let recent = self.recent.lock().await;
        recent
            .iter()
            .filter(|r| r.timestamp >= since)
            .filter(|r| status.map_or(true, |s| r.new_status == s))
            .cloned()
            .collect()
    }

    /// Subscribe to in-process change notifications.
    ///
    /// Each receiver sees changes recorded after it subscribed; dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeRecord> {
        self.notifier.subscribe()
    }

    /// Maximum number of retained changes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop per-instance bookkeeping for a deleted instance.
    pub fn forget(&self, instance_id: &InstanceId) {
        self.locks.forget(instance_id);
    }

    /// Append to the ring, keeping timestamps non-decreasing and evicting
    /// the oldest entries beyond capacity.
    async fn record(&self, mut record: StatusChangeRecord) -> StatusChangeRecord {
        let mut recent = self.recent.lock().await;
        if let Some(last) = recent.back() {
            if record.timestamp < last.timestamp {
                record.timestamp = last.timestamp;
            }
        }
        recent.push_back(record.clone());
        while recent.len() > self.capacity {
            recent.pop_front();
        }
        record
    }
}
