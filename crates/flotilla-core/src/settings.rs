//! Control-plane settings.
//!
//! Settings are loaded from environment variables with sensible defaults.

use crate::allocator::{DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};
use crate::error::{ControlPlaneError, Result};
use crate::events::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::platform::DEFAULT_CLUSTER_PORT;
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::status_bus::DEFAULT_RECENT_CHANGES_CAPACITY;
use crate::types::Platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings for a [`ControlPlane`](crate::ControlPlane).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlPlaneSettings {
    /// Platform used when a caller does not choose one (default: process).
    pub default_platform: Platform,

    /// First port of the shared pool, inclusive (default: 8080).
    pub port_range_start: u16,

    /// Last port of the shared pool, inclusive (default: 9000).
    pub port_range_end: u16,

    /// Status changes retained for polling clients (default: 1000).
    pub recent_changes_capacity: usize,

    /// Directory for configuration documents. `None` keeps them in memory.
    pub config_dir: Option<PathBuf>,

    /// Seconds between status polls; 0 disables polling (default: 30).
    pub poll_interval_secs: u64,

    /// Per-channel buffer of the in-process event channel (default: 1024).
    pub event_channel_capacity: usize,

    /// Service port for managed-cluster instances (default: 8080).
    pub cluster_port: u16,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            default_platform: Platform::Process,
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            recent_changes_capacity: DEFAULT_RECENT_CHANGES_CAPACITY,
            config_dir: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            cluster_port: DEFAULT_CLUSTER_PORT,
        }
    }
}

impl ControlPlaneSettings {
    /// Load settings from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FLOTILLA_DEFAULT_PLATFORM` | `process` (process, container, managed-cluster) |
    /// | `FLOTILLA_PORT_RANGE_START` | `8080` |
    /// | `FLOTILLA_PORT_RANGE_END` | `9000` |
    /// | `FLOTILLA_RECENT_CHANGES_CAPACITY` | `1000` |
    /// | `FLOTILLA_CONFIG_DIR` | unset (in-memory) |
    /// | `FLOTILLA_POLL_INTERVAL_SECS` | `30` (0 disables) |
    /// | `FLOTILLA_EVENT_CHANNEL_CAPACITY` | `1024` |
    /// | `FLOTILLA_CLUSTER_PORT` | `8080` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        Self {
            default_platform: parse_var(&lookup, "FLOTILLA_DEFAULT_PLATFORM")
                .unwrap_or(default.default_platform),
            port_range_start: parse_var(&lookup, "FLOTILLA_PORT_RANGE_START")
                .unwrap_or(default.port_range_start),
            port_range_end: parse_var(&lookup, "FLOTILLA_PORT_RANGE_END")
                .unwrap_or(default.port_range_end),
            recent_changes_capacity: parse_var(&lookup, "FLOTILLA_RECENT_CHANGES_CAPACITY")
                .unwrap_or(default.recent_changes_capacity),
            config_dir: lookup("FLOTILLA_CONFIG_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            poll_interval_secs: parse_var(&lookup, "FLOTILLA_POLL_INTERVAL_SECS")
                .unwrap_or(default.poll_interval_secs),
            event_channel_capacity: parse_var(&lookup, "FLOTILLA_EVENT_CHANNEL_CAPACITY")
                .unwrap_or(default.event_channel_capacity),
            cluster_port: parse_var(&lookup, "FLOTILLA_CLUSTER_PORT")
                .unwrap_or(default.cluster_port),
        }
    }

    /// Reject settings the control plane cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.port_range_start > self.port_range_end {
            return Err(ControlPlaneError::InvalidConfig(format!(
                "port range {}-{} is empty",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.recent_changes_capacity == 0 {
            return Err(ControlPlaneError::InvalidConfig(
                "recent_changes_capacity must be > 0".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ControlPlaneError::InvalidConfig(
                "event_channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Poll interval, or `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = ControlPlaneSettings::default();
        assert_eq!(settings.default_platform, Platform::Process);
        assert_eq!((settings.port_range_start, settings.port_range_end), (8080, 9000));
        assert_eq!(settings.recent_changes_capacity, 1000);
        assert_eq!(settings.poll_interval(), Some(Duration::from_secs(30)));
        assert!(settings.config_dir.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let settings = ControlPlaneSettings::from_lookup(lookup(&[
            ("FLOTILLA_DEFAULT_PLATFORM", "managed-cluster"),
            ("FLOTILLA_PORT_RANGE_START", "20000"),
            ("FLOTILLA_PORT_RANGE_END", "20010"),
            ("FLOTILLA_CONFIG_DIR", "/var/lib/flotilla"),
            ("FLOTILLA_POLL_INTERVAL_SECS", "0"),
            ("FLOTILLA_CLUSTER_PORT", "9443"),
        ]));
        assert_eq!(settings.default_platform, Platform::ManagedCluster);
        assert_eq!((settings.port_range_start, settings.port_range_end), (20000, 20010));
        assert_eq!(settings.config_dir, Some(PathBuf::from("/var/lib/flotilla")));
        assert_eq!(settings.poll_interval(), None);
        assert_eq!(settings.cluster_port, 9443);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let settings = ControlPlaneSettings::from_lookup(lookup(&[
            ("FLOTILLA_DEFAULT_PLATFORM", "mainframe"),
            ("FLOTILLA_PORT_RANGE_START", "seventy"),
            ("FLOTILLA_CONFIG_DIR", "  "),
        ]));
        assert_eq!(settings, ControlPlaneSettings::default());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let settings = ControlPlaneSettings {
            port_range_start: 9000,
            port_range_end: 8000,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ControlPlaneError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let settings = ControlPlaneSettings {
            recent_changes_capacity: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_serde_camel_case_with_defaults() {
        let settings: ControlPlaneSettings =
            serde_json::from_str(r#"{"defaultPlatform":"container","pollIntervalSecs":5}"#).unwrap();
        assert_eq!(settings.default_platform, Platform::Container);
        assert_eq!(settings.poll_interval(), Some(Duration::from_secs(5)));
        assert_eq!(settings.port_range_end, 9000);
    }
}
