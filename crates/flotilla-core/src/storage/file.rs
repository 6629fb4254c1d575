//! One JSON file per instance under a directory.

use crate::error::{ControlPlaneError, Result};
use crate::types::InstanceId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory of `<instance-id>.json` documents.
///
/// Saves write a temporary file and rename it into place, so readers never
/// observe a half-written document.
#[derive(Debug, Clone)]
pub(crate) struct JsonDir {
    dir: PathBuf,
}

impl JsonDir {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) async fn save<T: Serialize>(&self, id: &InstanceId, document: &T) -> Result<()> {
        let path = self.path_for(id)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(document)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(instance_id = %id, path = %path.display(), "Document persisted");
        Ok(())
    }

    pub(crate) async fn load<T: DeserializeOwned>(&self, id: &InstanceId) -> Result<Option<T>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Missing documents are not an error.
    pub(crate) async fn delete(&self, id: &InstanceId) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable document; unreadable files are skipped with a warning.
    pub(crate) async fn list<T: DeserializeOwned>(&self) -> Result<Vec<(InstanceId, T)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice(&bytes) {
                Ok(document) => documents.push((InstanceId::from_string(stem), document)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                }
            }
        }
        Ok(documents)
    }

    fn path_for(&self, id: &InstanceId) -> Result<PathBuf> {
        let name = id.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ControlPlaneError::Storage(format!(
                "instance id '{name}' cannot be used as a file name"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}
