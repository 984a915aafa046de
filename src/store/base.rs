use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::{file_store::FileStorage, memory_store::MemoryStorage};
use crate::config::{StoreBackend, StoreConfig};

/// Failures of the durable key-value storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize stored value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The Storage trait abstracts durable string key-value persistence.
/// It performs no validation of the values it holds.
#[async_trait]
pub trait Storage: Send + Sync {
    fn get_name(&self) -> &str;
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Stores several entries at once: either all of them land or none do.
    async fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Creates a concrete storage implementation based on the StoreConfig.
pub fn create_storage(config: &StoreConfig) -> Arc<dyn Storage> {
    match &config.backend {
        StoreBackend::File(file_config) => {
            let storage = FileStorage::new(file_config.path.clone());
            info!("Using file session storage at {}", storage.path().display());
            Arc::new(storage)
        }
        StoreBackend::Memory => {
            info!("Using in-memory session storage; sessions will not survive a restart.");
            Arc::new(MemoryStorage::new())
        }
    }
}
