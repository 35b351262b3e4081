//! Store configuration loaded from `config.toml`.
//!
//! Covers backend selection and the two externally configured policies the
//! store's callers apply: the context window size and the hourly request
//! ceilings. Missing or malformed config falls back to defaults with a
//! warning rather than failing startup.

use serde::Deserialize;

use std::path::Path;

use crate::backend::BackendKind;
use crate::sqlite::pool::default_database_url;

/// Conversation store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Which backend to connect ("sqlite" or "memory").
    #[serde(default)]
    pub backend: BackendKind,

    /// SQLite database URL. Ignored by the memory backend.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Visible messages retained per channel/vendor pair.
    #[serde(default = "default_context_window")]
    pub context_window: i64,

    /// Hourly ceiling for text requests per channel/vendor.
    #[serde(default = "default_text_hourly_limit")]
    pub text_hourly_limit: i64,

    /// Hourly ceiling for image-generation requests per channel/vendor.
    #[serde(default = "default_image_hourly_limit")]
    pub image_hourly_limit: i64,
}

fn default_context_window() -> i64 {
    35
}

fn default_text_hourly_limit() -> i64 {
    30
}

fn default_image_hourly_limit() -> i64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            database_url: default_database_url(),
            context_window: default_context_window(),
            text_hourly_limit: default_text_hourly_limit(),
            image_hourly_limit: default_image_hourly_limit(),
        }
    }
}

/// Load `config.toml` from the given directory.
///
/// Returns defaults when the file is missing or unparseable (with a
/// warning), so a fresh deployment starts without any config present.
pub async fn load_store_config(config_dir: &Path) -> StoreConfig {
    let config_path = config_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return StoreConfig::default();
        }
    };

    match toml::from_str::<StoreConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            StoreConfig::default()
        }
    }
}
