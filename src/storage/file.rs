// src/storage/file.rs

use crate::error::{AppError, Result};
use crate::storage::{PersistedStatus, StatusStore, STATUS_SCHEMA_VERSION};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// JSON status file on local disk.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never leaves a truncated status file behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling_path(".tmp")
    }

    /// Where a status file from a newer schema is copied before anything
    /// can overwrite it.
    pub fn backup_path(&self, version: u32) -> PathBuf {
        self.sibling_path(&format!(".v{version}.bak"))
    }
}

#[async_trait]
impl StatusStore for JsonFileStore {
    async fn load(&self) -> Result<Option<PersistedStatus>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "Status file does not exist");
                return Ok(None);
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let status: PersistedStatus = serde_json::from_str(&contents)?;
        if status.version > STATUS_SCHEMA_VERSION {
            let backup = self.backup_path(status.version);
            tokio::fs::copy(&self.path, &backup).await?;
            warn!(
                path = %self.path.display(),
                backup = %backup.display(),
                version = status.version,
                "Status file written by a newer release, kept a copy"
            );
            return Err(AppError::UnsupportedStatusVersion {
                path: self.path.display().to_string(),
                found: status.version,
                supported: STATUS_SCHEMA_VERSION,
            });
        }
        debug!(path = %self.path.display(), keys = status.api_keys.len(), "Read status file");
        Ok(Some(status))
    }

    async fn save(&self, status: &PersistedStatus) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(status)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        trace!(path = %self.path.display(), "Wrote status file");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
