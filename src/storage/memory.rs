// src/storage/memory.rs

use crate::error::{AppError, Result};
use crate::storage::{PersistedStatus, StatusStore};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// In-memory status store. Keeps the last saved document and counts writes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    status: RwLock<Option<PersistedStatus>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: PersistedStatus) -> Self {
        Self {
            status: RwLock::new(Some(status)),
            ..Self::default()
        }
    }

    pub async fn snapshot(&self) -> Option<PersistedStatus> {
        self.status.read().await.clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every following `save` fail with an IO error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn load(&self) -> Result<Option<PersistedStatus>> {
        Ok(self.status.read().await.clone())
    }

    async fn save(&self, status: &PersistedStatus) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "in-memory store configured to fail",
            )));
        }
        trace!("InMemoryStore::save: waiting for write lock");
        *self.status.write().await = Some(status.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
