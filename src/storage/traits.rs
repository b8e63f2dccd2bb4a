// src/storage/traits.rs

use crate::error::Result;
use crate::storage::PersistedStatus;
use async_trait::async_trait;

/// Backing store for the credential pool status.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Reads the stored status. `Ok(None)` means nothing was persisted yet.
    async fn load(&self) -> Result<Option<PersistedStatus>>;

    /// Replaces the stored status with `status`.
    async fn save(&self, status: &PersistedStatus) -> Result<()>;

    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}
