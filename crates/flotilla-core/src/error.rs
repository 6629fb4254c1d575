//! Error types for flotilla-core.

use crate::types::{InstanceId, Platform};
use thiserror::Error;

/// Result type alias for flotilla-core operations.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Errors that can occur during control-plane operations.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Instance id is unknown to the registry (or to a platform manager).
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// Instance exists but its configuration was never initialized or was deleted.
    #[error("configuration not initialized for instance: {0}")]
    ConfigurationNotInitialized(InstanceId),

    /// No manager is registered for the platform.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(Platform),

    /// The platform manager does not support the requested operation.
    #[error("operation '{operation}' not supported on platform {platform}")]
    UnsupportedOperation {
        /// Platform that rejected the operation
        platform: Platform,
        /// Name of the operation
        operation: &'static str,
    },

    /// Operation assumes prior state that is absent.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Every port in the allocator range is in use.
    #[error("port range {start}-{end} exhausted")]
    ResourceExhausted {
        /// First port of the range
        start: u16,
        /// Last port of the range (inclusive)
        end: u16,
    },

    /// Patch could not be applied as a whole.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Durable storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Distributed event channel failure.
    #[error("event channel error: {0}")]
    Channel(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlPlaneError {
    /// Check if this error indicates a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::InstanceNotFound(_) | ControlPlaneError::ConfigurationNotInitialized(_)
        )
    }

    /// Check if this error indicates an unsupported platform or operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::UnsupportedPlatform(_) | ControlPlaneError::UnsupportedOperation { .. }
        )
    }

    /// Short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlPlaneError::InstanceNotFound(_) => "instance_not_found",
            ControlPlaneError::ConfigurationNotInitialized(_) => "configuration_not_initialized",
            ControlPlaneError::UnsupportedPlatform(_) => "unsupported_platform",
            ControlPlaneError::UnsupportedOperation { .. } => "unsupported_operation",
            ControlPlaneError::InvalidOperation(_) => "invalid_operation",
            ControlPlaneError::ResourceExhausted { .. } => "resource_exhausted",
            ControlPlaneError::InvalidPatch(_) => "invalid_patch",
            ControlPlaneError::InvalidConfig(_) => "invalid_config",
            ControlPlaneError::Storage(_) => "storage",
            ControlPlaneError::Channel(_) => "channel",
            ControlPlaneError::Json(_) => "json",
            ControlPlaneError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControlPlaneError::InstanceNotFound(InstanceId::from_string("test-123"));
        assert_eq!(err.to_string(), "instance not found: test-123");

        let err = ControlPlaneError::ResourceExhausted { start: 8080, end: 9000 };
        assert_eq!(err.to_string(), "port range 8080-9000 exhausted");
    }

    #[test]
    fn test_not_found_discriminants_are_distinct() {
        let id = InstanceId::from_string("x");
        let missing = ControlPlaneError::InstanceNotFound(id.clone());
        let uninit = ControlPlaneError::ConfigurationNotInitialized(id);
        assert!(missing.is_not_found());
        assert!(uninit.is_not_found());
        assert_ne!(missing.as_label(), uninit.as_label());
    }

    #[test]
    fn test_is_unsupported() {
        assert!(ControlPlaneError::UnsupportedPlatform(Platform::Container).is_unsupported());
        assert!(ControlPlaneError::UnsupportedOperation {
            platform: Platform::ManagedCluster,
            operation: "restart",
        }
        .is_unsupported());
        assert!(!ControlPlaneError::Storage("disk".into()).is_unsupported());
    }
}
