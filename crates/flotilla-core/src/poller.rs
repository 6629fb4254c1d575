//! Periodic platform status polling.

use crate::factory::ManagerRegistry;
use crate::status_bus::StatusBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Feeds every manager's view of its instances into the [`StatusBus`].
///
/// Each report is tagged with source `poller:<platform>` and applied with
/// [`StatusBus::apply_report`], so a manager's view never overrides a status
/// recorded after the manager last observed the instance. Unavailable
/// managers are skipped and a failing manager never stops the loop.
pub struct StatusPoller {
    managers: Arc<ManagerRegistry>,
    bus: Arc<StatusBus>,
    interval: Duration,
}

impl StatusPoller {
    /// Create a poller over every manager in `managers`.
    pub fn new(managers: Arc<ManagerRegistry>, bus: Arc<StatusBus>, interval: Duration) -> Self {
        Self {
            managers,
            bus,
            interval,
        }
    }

    /// Poll every available manager once.
    ///
    /// Returns the number of status changes recorded.
    pub async fn poll_once(&self) -> usize {
        let mut changes = 0;
        for platform in self.managers.platforms() {
            let Ok(manager) = self.managers.resolve(platform) else {
                continue;
            };
            if !manager.is_available().await {
                tracing::debug!(%platform, "Manager unavailable, skipping poll");
                continue;
            }

            let statuses = match manager.list_statuses().await {
                Ok(statuses) => statuses,
                Err(e) => {
                    tracing::warn!(%platform, error = %e, "Failed to list statuses");
                    continue;
                }
            };

            let source = format!("poller:{platform}");
            for info in statuses {
                let instance_id = info.instance_id.clone();
                match self.bus.apply_report(info, source.as_str()).await {
                    Ok(Some(_)) => changes += 1,
                    Ok(None) => {}
                    Err(e) => tracing::warn!(
                        instance_id = %instance_id,
                        error = %e,
                        "Failed to record polled status"
                    ),
                }
            }
        }
        changes
    }

    /// Spawn the polling loop. The first poll happens one interval after
    /// spawning; the loop exits when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately on the first tick
            ticker.tick().await;
            tracing::info!(interval_secs = self.interval.as_secs(), "Status poller started");

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        tracing::debug!("Status poller shutting down");
                        break;
                    }

                    _ = ticker.tick() => {
                        let changes = self.poll_once().await;
                        if changes > 0 {
                            tracing::debug!(changes, "Poll recorded status changes");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PortAllocator;
    use crate::events::InMemoryEventChannel;
    use crate::manager::InstanceManager;
    use crate::platform::{ClusterManager, ProcessManager};
    use crate::storage::{InMemoryRuntimeStore, RuntimeStore};
    use crate::types::{InstanceConfiguration, InstanceId, InstanceStatus, Platform, RuntimeInfo};

    struct Fixture {
        process: Arc<ProcessManager>,
        cluster: Arc<ClusterManager>,
        runtime: Arc<InMemoryRuntimeStore>,
        bus: Arc<StatusBus>,
        poller: StatusPoller,
    }

    fn fixture() -> Fixture {
        let process = Arc::new(ProcessManager::new());
        let cluster = Arc::new(ClusterManager::default());
        let managers: Vec<Arc<dyn InstanceManager>> =
            vec![process.clone() as Arc<dyn InstanceManager>, cluster.clone()];
        let managers = Arc::new(ManagerRegistry::new(managers, Platform::Process).unwrap());
        let runtime = Arc::new(InMemoryRuntimeStore::new());
        let bus = Arc::new(StatusBus::new(
            runtime.clone(),
            Arc::new(InMemoryEventChannel::default()),
        ));
        Fixture {
            process,
            cluster,
            runtime,
            bus: bus.clone(),
            poller: StatusPoller::new(managers, bus, Duration::from_millis(20)),
        }
    }

    async fn seed(runtime: &InMemoryRuntimeStore, platform: Platform) -> InstanceId {
        let id = InstanceId::new();
        runtime
            .save(RuntimeInfo::new(id.clone(), platform, InstanceStatus::Created))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_poll_records_platform_status() {
        let f = fixture();
        let id = seed(&f.runtime, Platform::Process).await;
        let allocator = PortAllocator::default();
        let allocation = f.process.allocate_resources(&allocator).await.unwrap();
        f.process
            .start(&id, &InstanceConfiguration::new(allocation.host, allocation.port))
            .await
            .unwrap();

        assert_eq!(f.poller.poll_once().await, 1);
        let info = f.runtime.get(&id).await.unwrap().unwrap();
        assert_eq!(info.status, InstanceStatus::Running);

        // unchanged on the second pass
        assert_eq!(f.poller.poll_once().await, 0);
    }

    #[tokio::test]
    async fn test_poll_keeps_newer_agent_status() {
        let f = fixture();
        let id = seed(&f.runtime, Platform::Process).await;
        f.process
            .start(&id, &InstanceConfiguration::new("127.0.0.1", 8080))
            .await
            .unwrap();
        assert_eq!(f.poller.poll_once().await, 1);

        f.bus
            .publish_status_update(&id, InstanceStatus::Error, "agent", None)
            .await
            .unwrap();
        assert_eq!(f.poller.poll_once().await, 0);

        let info = f.runtime.get(&id).await.unwrap().unwrap();
        assert_eq!(info.status, InstanceStatus::Error);
        let history: Vec<_> = f
            .bus
            .get_recent_changes(chrono::DateTime::<chrono::Utc>::MIN_UTC, None)
            .await
            .into_iter()
            .map(|r| (r.old_status, r.new_status, r.source))
            .collect();
        assert_eq!(
            history,
            vec![
                (InstanceStatus::Created, InstanceStatus::Running, "poller:process".to_string()),
                (InstanceStatus::Running, InstanceStatus::Error, "agent".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unavailable_manager_is_skipped() {
        let f = fixture();
        let id = seed(&f.runtime, Platform::ManagedCluster).await;
        f.cluster
            .start(&id, &InstanceConfiguration::new("0.0.0.0", 8080))
            .await
            .unwrap();
        f.cluster.set_available(false);

        assert_eq!(f.poller.poll_once().await, 0);
        let info = f.runtime.get(&id).await.unwrap().unwrap();
        assert_eq!(info.status, InstanceStatus::Created);

        f.cluster.set_available(true);
        assert_eq!(f.poller.poll_once().await, 1);
    }

    #[tokio::test]
    async fn test_spawned_poller_stops_on_cancel() {
        let f = fixture();
        let id = seed(&f.runtime, Platform::Process).await;
        f.process
            .start(&id, &InstanceConfiguration::new("127.0.0.1", 8080))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let runtime = f.runtime.clone();
        let handle = f.poller.spawn(shutdown.clone());

        for _ in 0..100 {
            if runtime.get(&id).await.unwrap().map(|i| i.status) == Some(InstanceStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            runtime.get(&id).await.unwrap().unwrap().status,
            InstanceStatus::Running
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
