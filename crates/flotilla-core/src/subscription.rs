//! Background consumer that keeps the registry in step with status events.

use crate::error::Result;
use crate::events::{ChannelName, ControlPlaneEvent, EventChannel};
use crate::registry::InstanceRegistry;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Subscribes to the status and lifecycle channels and applies status
/// changes to the [`InstanceRegistry`].
///
/// Events for unknown instances are logged and skipped; a bad event never
/// stops the loop.
pub struct EventSubscriptionLoop {
    channel: Arc<dyn EventChannel>,
    registry: Arc<InstanceRegistry>,
}

impl EventSubscriptionLoop {
    /// Create a loop that applies events from `channel` to `registry`.
    pub fn new(channel: Arc<dyn EventChannel>, registry: Arc<InstanceRegistry>) -> Self {
        Self { channel, registry }
    }

    /// Subscribe and spawn the consumer task.
    ///
    /// Subscriptions are established before this returns, so any event
    /// published afterwards is observed. The task exits when `shutdown` is
    /// cancelled or both streams end.
    ///
    /// # Errors
    ///
    /// Returns `Channel` if either subscription cannot be established.
    pub async fn spawn(self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let mut status_events = self.channel.subscribe(ChannelName::StatusEvents).await?;
        let mut instance_events = self.channel.subscribe(ChannelName::InstanceEvents).await?;
        tracing::info!("Event subscription loop started");

        Ok(tokio::spawn(async move {
            let mut status_open = true;
            let mut instance_open = true;

            while status_open || instance_open {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        tracing::debug!("Event subscription loop shutting down");
                        break;
                    }

                    event = status_events.next(), if status_open => match event {
                        Some(event) => self.handle(event),
                        None => status_open = false,
                    },

                    event = instance_events.next(), if instance_open => match event {
                        Some(event) => self.handle(event),
                        None => instance_open = false,
                    },
                }
            }
            tracing::info!("Event subscription loop stopped");
        }))
    }

    fn handle(&self, event: ControlPlaneEvent) {
        match event {
            ControlPlaneEvent::InstanceStatusChanged(change) => {
                match self.registry.update_status(&change.instance_id, change.new_status) {
                    Ok(_) => tracing::debug!(
                        instance_id = %change.instance_id,
                        status = %change.new_status,
                        source = %change.source,
                        "Registry status reconciled"
                    ),
                    Err(e) => tracing::warn!(
                        instance_id = %change.instance_id,
                        error = %e,
                        "Could not apply status event"
                    ),
                }
            }
            ControlPlaneEvent::InstanceStarted(e) => {
                tracing::info!(instance_id = %e.instance_id, "Instance started")
            }
            ControlPlaneEvent::InstanceStopped(e) => {
                tracing::info!(instance_id = %e.instance_id, "Instance stopped")
            }
            ControlPlaneEvent::InstanceDeleted(e) => {
                tracing::info!(instance_id = %e.instance_id, "Instance deleted")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PortAllocator;
    use crate::events::{InMemoryEventChannel, InstanceStatusChangedEvent};
    use crate::factory::ManagerRegistry;
    use crate::manager::InstanceManager;
    use crate::orchestrator::PlatformOrchestrator;
    use crate::platform::ProcessManager;
    use crate::types::{InstanceId, InstanceStatus, Platform};
    use std::time::Duration;

    fn registry() -> Arc<InstanceRegistry> {
        let managers: Vec<Arc<dyn InstanceManager>> = vec![Arc::new(ProcessManager::new())];
        let managers = Arc::new(ManagerRegistry::new(managers, Platform::Process).unwrap());
        let orchestrator = PlatformOrchestrator::new(managers, Arc::new(PortAllocator::default()));
        Arc::new(InstanceRegistry::new(Arc::new(orchestrator)))
    }

    fn changed(id: &InstanceId, old: InstanceStatus, new: InstanceStatus) -> ControlPlaneEvent {
        ControlPlaneEvent::InstanceStatusChanged(InstanceStatusChangedEvent {
            instance_id: id.clone(),
            old_status: old,
            new_status: new,
            source: "agent".into(),
        })
    }

    async fn wait_for_status(registry: &InstanceRegistry, id: &InstanceId, status: InstanceStatus) {
        for _ in 0..100 {
            if registry.get(id).map(|i| i.status()) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("instance {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_status_event_updates_registry() {
        let channel = Arc::new(InMemoryEventChannel::default());
        let registry = registry();
        let instance = registry.create("a", "", None);
        let shutdown = CancellationToken::new();

        let handle = EventSubscriptionLoop::new(channel.clone(), registry.clone())
            .spawn(shutdown.clone())
            .await
            .unwrap();
        channel
            .publish(
                ChannelName::StatusEvents,
                changed(instance.id(), InstanceStatus::Created, InstanceStatus::Running),
            )
            .await
            .unwrap();

        wait_for_status(&registry, instance.id(), InstanceStatus::Running).await;
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_instance_does_not_stop_loop() {
        let channel = Arc::new(InMemoryEventChannel::default());
        let registry = registry();
        let instance = registry.create("a", "", None);
        let shutdown = CancellationToken::new();

        let handle = EventSubscriptionLoop::new(channel.clone(), registry.clone())
            .spawn(shutdown.clone())
            .await
            .unwrap();
        channel
            .publish(
                ChannelName::StatusEvents,
                changed(&InstanceId::new(), InstanceStatus::Created, InstanceStatus::Error),
            )
            .await
            .unwrap();
        channel
            .publish(
                ChannelName::StatusEvents,
                changed(instance.id(), InstanceStatus::Created, InstanceStatus::Stopped),
            )
            .await
            .unwrap();

        wait_for_status(&registry, instance.id(), InstanceStatus::Stopped).await;
        assert!(!handle.is_finished());
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let channel = Arc::new(InMemoryEventChannel::default());
        let shutdown = CancellationToken::new();
        let handle = EventSubscriptionLoop::new(channel, registry())
            .spawn(shutdown.clone())
            .await
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
