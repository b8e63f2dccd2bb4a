// src/storage/mod.rs

pub mod file;
pub mod key_state;
pub mod memory;
pub mod traits;

pub use file::JsonFileStore;
pub use key_state::{
    preview_key, CredentialRecord, KeyHealth, PersistedKey, PersistedStatus,
    STATUS_SCHEMA_VERSION,
};
pub use memory::InMemoryStore;
pub use traits::StatusStore;
