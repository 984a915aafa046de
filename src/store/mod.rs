pub mod base;
pub mod file_store;
pub mod memory_store;
pub mod token_store;

// Re-export the primary storage items so code outside can do
// "use crate::store::{Storage, TokenStore};"
pub use base::{create_storage, Storage, StorageError};
pub use file_store::FileStorage;
pub use memory_store::MemoryStorage;
pub use token_store::{StoredSession, TokenStore};
