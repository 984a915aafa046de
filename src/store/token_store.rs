use std::sync::Arc;

use tracing::{debug, warn};

use super::{create_storage, Storage, StorageError};
use crate::config::StoreConfig;
use crate::models::User;

/// A token/user pair read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub token: String,
    pub user: User,
}

/// Persists the bearer token and the serialized user under two storage keys.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    token_key: String,
    user_key: String,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, token_key: impl Into<String>, user_key: impl Into<String>) -> Self {
        Self {
            storage,
            token_key: token_key.into(),
            user_key: user_key.into(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            create_storage(config),
            config.token_key.clone(),
            config.user_key.clone(),
        )
    }

    /// Returns the stored session, or `None` when either key is missing or the
    /// user record cannot be parsed.
    pub async fn read(&self) -> Result<Option<StoredSession>, StorageError> {
        let token = self.storage.get(&self.token_key).await?;
        let user = self.storage.get(&self.user_key).await?;

        let (token, raw_user) = match (token, user) {
            (Some(token), Some(user)) if !token.is_empty() => (token, user),
            (None, None) => return Ok(None),
            _ => {
                debug!(
                    "Storage '{}' holds only part of a session; treating it as empty.",
                    self.storage.get_name()
                );
                return Ok(None);
            }
        };

        match serde_json::from_str::<User>(&raw_user) {
            Ok(user) => Ok(Some(StoredSession { token, user })),
            Err(e) => {
                warn!("Stored user record is unreadable, ignoring it: {}", e);
                Ok(None)
            }
        }
    }

    /// Replaces the stored pair in one storage write, so a failure leaves the
    /// previous token and user together.
    pub async fn write(&self, token: &str, user: &User) -> Result<(), StorageError> {
        let raw_user = serde_json::to_string(user)?;
        self.storage
            .set_all(&[(self.token_key.as_str(), token), (self.user_key.as_str(), raw_user.as_str())])
            .await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(&self.token_key).await?;
        self.storage.remove(&self.user_key).await
    }
}
