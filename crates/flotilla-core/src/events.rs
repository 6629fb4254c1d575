//! # Distributed event channel.
//!
//! Two named channels carry control-plane events between processes:
//!
//! ```text
//!   StatusBus ──publish──► StatusEvents   ──► EventSubscriptionLoop ──► InstanceRegistry
//!   ControlPlane ────────► InstanceEvents ──┘
//! ```
//!
//! ## Rules
//! - **At-most-once**: publish is best-effort and never retried by callers.
//! - **No cross-channel ordering**: each channel is ordered only as far as
//!   the transport orders it.
//! - **Drop to unsubscribe**: dropping an [`EventStream`] releases the subscription.
//!
//! [`InMemoryEventChannel`] is the in-process transport, a thin wrapper
//! around [`tokio::sync::broadcast`] per channel.

use crate::error::Result;
use crate::types::{InstanceId, InstanceStatus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError};

/// Default per-channel buffer of [`InMemoryEventChannel`].
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Named distributed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelName {
    /// Status transitions.
    StatusEvents,
    /// Start/stop/delete lifecycle events.
    InstanceEvents,
}

impl ChannelName {
    /// Wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::StatusEvents => "StatusEvents",
            ChannelName::InstanceEvents => "InstanceEvents",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance changed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatusChangedEvent {
    /// Instance that changed
    pub instance_id: InstanceId,
    /// Previous status
    pub old_status: InstanceStatus,
    /// New status
    pub new_status: InstanceStatus,
    /// Reporting subsystem
    pub source: String,
}

/// An instance was started by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStartedEvent {
    /// Started instance
    pub instance_id: InstanceId,
}

/// An instance was stopped by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStoppedEvent {
    /// Stopped instance
    pub instance_id: InstanceId,
}

/// An instance was deleted by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDeletedEvent {
    /// Deleted instance
    pub instance_id: InstanceId,
}

/// Message carried on a [`ChannelName`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlPlaneEvent {
    /// Published on `StatusEvents`.
    InstanceStatusChanged(InstanceStatusChangedEvent),
    /// Published on `InstanceEvents`.
    InstanceStarted(InstanceStartedEvent),
    /// Published on `InstanceEvents`.
    InstanceStopped(InstanceStoppedEvent),
    /// Published on `InstanceEvents`.
    InstanceDeleted(InstanceDeletedEvent),
}

impl ControlPlaneEvent {
    /// The instance this event is about.
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            ControlPlaneEvent::InstanceStatusChanged(e) => &e.instance_id,
            ControlPlaneEvent::InstanceStarted(e) => &e.instance_id,
            ControlPlaneEvent::InstanceStopped(e) => &e.instance_id,
            ControlPlaneEvent::InstanceDeleted(e) => &e.instance_id,
        }
    }

    /// The channel this event belongs on.
    pub fn channel(&self) -> ChannelName {
        match self {
            ControlPlaneEvent::InstanceStatusChanged(_) => ChannelName::StatusEvents,
            _ => ChannelName::InstanceEvents,
        }
    }
}

/// Stream of events from one subscription.
pub type EventStream = BoxStream<'static, ControlPlaneEvent>;

/// Transport for control-plane events.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publish an event on a channel.
    async fn publish(&self, channel: ChannelName, event: ControlPlaneEvent) -> Result<()>;

    /// Subscribe to every subsequent event on a channel.
    async fn subscribe(&self, channel: ChannelName) -> Result<EventStream>;
}

/// In-process event channel.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: events sent while nobody subscribes are dropped.
/// - **Bounded**: slow subscribers skip the oldest events and log the gap.
#[derive(Debug, Clone)]
pub struct InMemoryEventChannel {
    senders: HashMap<ChannelName, broadcast::Sender<ControlPlaneEvent>>,
}

impl InMemoryEventChannel {
    /// Create the channels with the given per-channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let senders = [ChannelName::StatusEvents, ChannelName::InstanceEvents]
            .into_iter()
            .map(|name| (name, broadcast::channel(capacity).0))
            .collect();
        Self { senders }
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: ChannelName) -> usize {
        self.senders
            .get(&channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, channel: ChannelName) -> &broadcast::Sender<ControlPlaneEvent> {
        // both names are inserted in `new`
        &self.senders[&channel]
    }
}

impl Default for InMemoryEventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    async fn publish(&self, channel: ChannelName, event: ControlPlaneEvent) -> Result<()> {
        let _ = self.sender(channel).send(event);
        Ok(())
    }

    async fn subscribe(&self, channel: ChannelName) -> Result<EventStream> {
        let rx = self.sender(channel).subscribe();
        let stream = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%channel, skipped, "Event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str) -> ControlPlaneEvent {
        ControlPlaneEvent::InstanceStarted(InstanceStartedEvent {
            instance_id: InstanceId::from_string(id),
        })
    }

    #[test]
    fn test_event_wire_format() {
        let event = ControlPlaneEvent::InstanceStatusChanged(InstanceStatusChangedEvent {
            instance_id: InstanceId::from_string("i-1"),
            old_status: InstanceStatus::Created,
            new_status: InstanceStatus::Running,
            source: "worker-1".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "InstanceStatusChanged",
                "instanceId": "i-1",
                "oldStatus": "created",
                "newStatus": "running",
                "source": "worker-1"
            })
        );
        assert_eq!(event.channel(), ChannelName::StatusEvents);
        assert_eq!(started("x").channel(), ChannelName::InstanceEvents);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let channel = InMemoryEventChannel::new(16);
        let mut stream = channel.subscribe(ChannelName::InstanceEvents).await.unwrap();
        assert_eq!(channel.subscriber_count(ChannelName::InstanceEvents), 1);

        channel
            .publish(ChannelName::InstanceEvents, started("a"))
            .await
            .unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.instance_id().as_str(), "a");

        drop(stream);
        assert_eq!(channel.subscriber_count(ChannelName::InstanceEvents), 0);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let channel = InMemoryEventChannel::new(16);
        let mut status = channel.subscribe(ChannelName::StatusEvents).await.unwrap();

        channel
            .publish(ChannelName::InstanceEvents, started("a"))
            .await
            .unwrap();
        channel
            .publish(ChannelName::StatusEvents, started("b"))
            .await
            .unwrap();
        assert_eq!(status.next().await.unwrap().instance_id().as_str(), "b");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let channel = InMemoryEventChannel::default();
        assert!(channel
            .publish(ChannelName::StatusEvents, started("a"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let channel = InMemoryEventChannel::new(2);
        let mut stream = channel.subscribe(ChannelName::InstanceEvents).await.unwrap();
        for id in ["a", "b", "c", "d"] {
            channel
                .publish(ChannelName::InstanceEvents, started(id))
                .await
                .unwrap();
        }
        assert_eq!(stream.next().await.unwrap().instance_id().as_str(), "c");
        assert_eq!(stream.next().await.unwrap().instance_id().as_str(), "d");
    }
}
