//! Domain types shared by every control-plane component.

use crate::error::ControlPlaneError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Loopback address used by platforms that bind on the local host.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Log level written into freshly initialized configuration documents.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Unique identifier for a managed instance.
///
/// Ids are opaque strings so that identifiers reported by platform-side
/// agents round-trip unchanged. Freshly created ids are random UUIDs and are
/// never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new random instance ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create an instance ID from a string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Execution environment backing an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// A bare operating-system process on the control-plane host.
    Process,
    /// A container managed by a container runtime.
    Container,
    /// A workload on a managed cluster.
    ManagedCluster,
}

impl Platform {
    /// Every platform variant, in declaration order.
    pub const ALL: [Platform; 3] = [Platform::Process, Platform::Container, Platform::ManagedCluster];

    /// Stable lowercase name, used in configuration and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Process => "process",
            Platform::Container => "container",
            Platform::ManagedCluster => "managed-cluster",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ControlPlaneError;

    /// Parse from string (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(Platform::Process),
            "container" | "docker" => Ok(Platform::Container),
            "managed-cluster" | "managedcluster" | "cluster" | "kubernetes" => {
                Ok(Platform::ManagedCluster)
            }
            other => Err(ControlPlaneError::InvalidConfig(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}

/// Lifecycle status of an instance.
///
/// The same enumeration describes the coarse status kept by the instance
/// registry and the fine-grained status reported by platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Registered, never started.
    Created,
    /// Start requested, not yet serving.
    Starting,
    /// Running and serving.
    Running,
    /// Stop requested, not yet stopped.
    Stopping,
    /// Stopped.
    Stopped,
    /// Failed to start or crashed.
    Error,
    /// Desired configuration changed since the last start.
    ConfigurationChanged,
    /// Removed from its platform.
    Deleted,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
            InstanceStatus::ConfigurationChanged => "configuration_changed",
            InstanceStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Control-plane metadata for a managed instance.
///
/// The id, status and timestamps are owned by the
/// [`InstanceRegistry`](crate::InstanceRegistry) and can only change through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    id: InstanceId,
    /// Human-readable name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Platform selected for this instance.
    pub platform: Platform,
    status: InstanceStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Open-ended string attributes.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub(crate) fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        platform: Platform,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::new(),
            name: name.into(),
            description: description.into(),
            platform,
            status: InstanceStatus::Created,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Get the instance ID.
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Get the coarse lifecycle status.
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last-modified timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
        self.touch();
    }

    /// Copy the caller-editable fields of `other` into `self`.
    pub(crate) fn apply_update(&mut self, other: Instance) {
        self.name = other.name;
        self.description = other.description;
        self.platform = other.platform;
        self.metadata = other.metadata;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Live state of an instance as last reported by its platform.
///
/// Runtime info references an [`Instance`] by id only; either side may be
/// missing during create/delete races and readers treat that as unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Instance this record describes.
    pub instance_id: InstanceId,
    /// Platform that reported it.
    pub platform: Platform,
    /// Last known status.
    pub status: InstanceStatus,
    /// When the instance last started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance last stopped.
    pub stopped_at: Option<DateTime<Utc>>,
    /// When the status last changed.
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Platform-specific attributes (process id, container id, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RuntimeInfo {
    /// Create a runtime record in the given status with no timestamps.
    pub fn new(instance_id: InstanceId, platform: Platform, status: InstanceStatus) -> Self {
        Self {
            instance_id,
            platform,
            status,
            started_at: None,
            stopped_at: None,
            status_changed_at: None,
            metadata: HashMap::new(),
        }
    }
}

/// Desired-state document for one instance.
///
/// The serialized shape is part of the wire contract:
/// `{ host, port, logLevel, sources, queries, reactions }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstanceConfiguration {
    /// Network host the instance binds.
    pub host: String,
    /// Network port the instance binds.
    pub port: u16,
    /// Log verbosity.
    pub log_level: String,
    /// Data sources.
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
    /// Continuous queries.
    #[serde(default)]
    pub queries: Vec<serde_json::Value>,
    /// Reactions.
    #[serde(default)]
    pub reactions: Vec<serde_json::Value>,
}

impl InstanceConfiguration {
    /// Create an empty document bound to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            sources: Vec::new(),
            queries: Vec::new(),
            reactions: Vec::new(),
        }
    }

    /// Project the network-facing subset.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            host: self.host.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
        }
    }

    /// Write the network-facing subset back, leaving the lists untouched.
    pub fn apply_server_settings(&mut self, settings: ServerSettings) {
        self.host = settings.host;
        self.port = settings.port;
        self.log_level = settings.log_level;
    }
}

/// Network-facing projection of an [`InstanceConfiguration`]:
/// exactly `{ host, port, logLevel }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerSettings {
    /// Network host.
    pub host: String,
    /// Network port.
    pub port: u16,
    /// Log verbosity.
    pub log_level: String,
}

/// Network binding decided by a platform manager when placing an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// Host the instance should bind.
    pub host: String,
    /// Port the instance should bind.
    pub port: u16,
    /// Port taken from the shared allocator, if any. `None` when the
    /// platform assigns its own fixed port.
    pub allocated_port: Option<u16>,
}

impl ResourceAllocation {
    /// Binding backed by a port from the shared allocator.
    pub fn allocated(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            allocated_port: Some(port),
        }
    }

    /// Binding on a platform-assigned port.
    pub fn fixed(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            allocated_port: None,
        }
    }
}

/// One observed status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeRecord {
    /// Instance that changed.
    pub instance_id: InstanceId,
    /// Status before the transition.
    pub old_status: InstanceStatus,
    /// Status after the transition.
    pub new_status: InstanceStatus,
    /// Subsystem that reported the change.
    pub source: String,
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
    /// Runtime metadata after the transition.
    pub metadata: HashMap<String, String>,
}
