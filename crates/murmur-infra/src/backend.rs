//! Backend selector for the conversation store.
//!
//! `ConversationBackend` wraps either concrete store behind one enum that
//! itself implements `ConversationStore` by delegation. The trait uses
//! native async fn (RPITIT) and is not dyn-safe, so the enum is what keeps
//! the factory's return type nameable for callers.

use serde::Deserialize;

use std::fmt;
use std::str::FromStr;

use murmur_core::conversation::repository::ConversationStore;
use murmur_types::conversation::{Channel, Message, NewMessage, Vendor, VendorFilter};
use murmur_types::error::StoreError;

use crate::config::StoreConfig;
use crate::memory::conversation::MemoryConversationStore;
use crate::sqlite::conversation::SqliteConversationStore;

/// Which backend a deployment runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Durable SQLite storage.
    Sqlite,
    /// Volatile in-process storage, for tests.
    Memory,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Sqlite
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("invalid backend kind: '{other}'")),
        }
    }
}

/// A connected conversation store, durable or ephemeral.
#[derive(Clone)]
pub enum ConversationBackend {
    Sqlite(SqliteConversationStore),
    Memory(MemoryConversationStore),
}

impl ConversationBackend {
    /// Connect the backend named by the configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.backend {
            BackendKind::Sqlite => {
                tracing::info!(database_url = %config.database_url, "Connecting SQLite store");
                Ok(Self::Sqlite(
                    SqliteConversationStore::connect(&config.database_url).await?,
                ))
            }
            BackendKind::Memory => {
                tracing::info!("Using in-memory store");
                Ok(Self::Memory(MemoryConversationStore::new()))
            }
        }
    }

    /// Release backend resources. Scoped to process shutdown.
    pub async fn close(&self) {
        if let Self::Sqlite(store) = self {
            store.close().await;
        }
    }
}

impl ConversationStore for ConversationBackend {
    async fn get_channel(&self, external_id: &str) -> Result<Option<Channel>, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_channel(external_id).await,
            Self::Memory(store) => store.get_channel(external_id).await,
        }
    }

    async fn create_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        match self {
            Self::Sqlite(store) => store.create_channel(external_id).await,
            Self::Memory(store) => store.create_channel(external_id).await,
        }
    }

    async fn get_or_create_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_or_create_channel(external_id).await,
            Self::Memory(store) => store.get_or_create_channel(external_id).await,
        }
    }

    async fn get_vendor(&self, name: &str) -> Result<Option<Vendor>, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_vendor(name).await,
            Self::Memory(store) => store.get_vendor(name).await,
        }
    }

    async fn create_vendor(&self, name: &str, model_config: &str) -> Result<Vendor, StoreError> {
        match self {
            Self::Sqlite(store) => store.create_vendor(name, model_config).await,
            Self::Memory(store) => store.create_vendor(name, model_config).await,
        }
    }

    async fn get_or_create_vendor(
        &self,
        name: &str,
        model_config: &str,
    ) -> Result<Vendor, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_or_create_vendor(name, model_config).await,
            Self::Memory(store) => store.get_or_create_vendor(name, model_config).await,
        }
    }

    async fn save_message(&self, message: &NewMessage) -> Result<i64, StoreError> {
        match self {
            Self::Sqlite(store) => store.save_message(message).await,
            Self::Memory(store) => store.save_message(message).await,
        }
    }

    async fn save_message_with_images(
        &self,
        message: &NewMessage,
        image_urls: &[String],
    ) -> Result<i64, StoreError> {
        match self {
            Self::Sqlite(store) => store.save_message_with_images(message, image_urls).await,
            Self::Memory(store) => store.save_message_with_images(message, image_urls).await,
        }
    }

    async fn get_visible_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<Vec<Message>, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_visible_messages(channel_id, vendor).await,
            Self::Memory(store) => store.get_visible_messages(channel_id, vendor).await,
        }
    }

    async fn get_latest_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_latest_messages(channel_id, vendor, limit).await,
            Self::Memory(store) => store.get_latest_messages(channel_id, vendor, limit).await,
        }
    }

    async fn get_latest_images(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        match self {
            Self::Sqlite(store) => store.get_latest_images(channel_id, vendor, limit).await,
            Self::Memory(store) => store.get_latest_images(channel_id, vendor, limit).await,
        }
    }

    async fn has_images_in_context(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Sqlite(store) => store.has_images_in_context(channel_id, vendor).await,
            Self::Memory(store) => store.has_images_in_context(channel_id, vendor).await,
        }
    }

    async fn deactivate_old_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        window: i64,
    ) -> Result<(), StoreError> {
        match self {
            Self::Sqlite(store) => {
                store
                    .deactivate_old_messages(channel_id, vendor, window)
                    .await
            }
            Self::Memory(store) => {
                store
                    .deactivate_old_messages(channel_id, vendor, window)
                    .await
            }
        }
    }

    async fn clear_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<(), StoreError> {
        match self {
            Self::Sqlite(store) => store.clear_messages(channel_id, vendor).await,
            Self::Memory(store) => store.clear_messages(channel_id, vendor).await,
        }
    }

    async fn get_recent_text_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> Result<i64, StoreError> {
        match self {
            Self::Sqlite(store) => {
                store
                    .get_recent_text_request_count(channel_id, vendor_name)
                    .await
            }
            Self::Memory(store) => {
                store
                    .get_recent_text_request_count(channel_id, vendor_name)
                    .await
            }
        }
    }

    async fn get_recent_image_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> Result<i64, StoreError> {
        match self {
            Self::Sqlite(store) => {
                store
                    .get_recent_image_request_count(channel_id, vendor_name)
                    .await
            }
            Self::Memory(store) => {
                store
                    .get_recent_image_request_count(channel_id, vendor_name)
                    .await
            }
        }
    }
}
