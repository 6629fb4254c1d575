//! Registry of platform managers keyed by platform.

use crate::error::{ControlPlaneError, Result};
use crate::manager::InstanceManager;
use crate::types::Platform;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps each [`Platform`] to its [`InstanceManager`].
///
/// Built once at startup and immutable afterwards. Construction fails if the
/// configured default platform has no manager, so a misconfigured control
/// plane never starts.
pub struct ManagerRegistry {
    managers: HashMap<Platform, Arc<dyn InstanceManager>>,
    default_platform: Platform,
}

impl ManagerRegistry {
    /// Build the registry from the full set of managers.
    ///
    /// When two managers report the same platform the later one wins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no manager serves `default_platform`.
    pub fn new(
        managers: impl IntoIterator<Item = Arc<dyn InstanceManager>>,
        default_platform: Platform,
    ) -> Result<Self> {
        let mut by_platform = HashMap::new();
        for manager in managers {
            let platform = manager.platform();
            if by_platform.insert(platform, manager).is_some() {
                tracing::warn!(%platform, "Duplicate manager registration, replacing");
            } else {
                tracing::info!(%platform, "Manager registered");
            }
        }

        if !by_platform.contains_key(&default_platform) {
            return Err(ControlPlaneError::InvalidConfig(format!(
                "no manager registered for default platform {default_platform}"
            )));
        }

        Ok(Self {
            managers: by_platform,
            default_platform,
        })
    }

    /// Resolve the manager for a platform.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` if none is registered.
    pub fn resolve(&self, platform: Platform) -> Result<Arc<dyn InstanceManager>> {
        self.managers
            .get(&platform)
            .cloned()
            .ok_or(ControlPlaneError::UnsupportedPlatform(platform))
    }

    /// Resolve the manager for the default platform.
    pub fn resolve_default(&self) -> Arc<dyn InstanceManager> {
        // presence checked in `new`
        self.managers[&self.default_platform].clone()
    }

    /// The configured default platform.
    pub fn default_platform(&self) -> Platform {
        self.default_platform
    }

    /// Platforms with a registered manager.
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.managers.contains_key(p))
            .collect()
    }

    /// All registered managers.
    pub fn managers(&self) -> impl Iterator<Item = &Arc<dyn InstanceManager>> {
        self.managers.values()
    }
}
