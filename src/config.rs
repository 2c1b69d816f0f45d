use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// First-sync window when a principal has no checkpoint yet
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Listing page size passed to the provider
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Hard cap on refs collected per run
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Messages fetched/processed per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Label constraint for listing
    #[serde(default = "default_inbox_label")]
    pub inbox_label: String,
    /// Remove UNREAD from messages after they are stored
    #[serde(default)]
    pub mark_read: bool,
    /// Advance the checkpoint even when some items failed
    #[serde(default = "default_advance_on_errors")]
    pub advance_checkpoint_on_errors: bool,
    /// How many principals sync-all runs concurrently
    #[serde(default = "default_parallel_principals")]
    pub parallel_principals: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
            max_results: default_max_results(),
            batch_size: default_batch_size(),
            max_concurrent_requests: default_max_concurrent(),
            request_timeout_secs: default_request_timeout_secs(),
            inbox_label: default_inbox_label(),
            mark_read: false,
            advance_checkpoint_on_errors: default_advance_on_errors(),
            parallel_principals: default_parallel_principals(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Drive folder that receives offloaded attachments
    #[serde(default = "default_attachment_folder")]
    pub attachment_folder: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            attachment_folder: default_attachment_folder(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    /// Directory holding one cached token file per principal
    #[serde(default = "default_token_cache_dir")]
    pub token_cache_dir: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_cache_dir: default_token_cache_dir(),
        }
    }
}

fn default_lookback_days() -> u32 {
    7
}

fn default_page_size() -> u32 {
    100
}

fn default_max_results() -> usize {
    1000
}

fn default_batch_size() -> usize {
    25
}

fn default_max_concurrent() -> usize {
    40
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_inbox_label() -> String {
    "INBOX".to_string()
}

fn default_advance_on_errors() -> bool {
    true
}

fn default_parallel_principals() -> usize {
    4
}

fn default_database_path() -> PathBuf {
    PathBuf::from("mailsink.db3")
}

fn default_attachment_folder() -> String {
    "Mailsink Attachments".to_string()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_cache_dir() -> PathBuf {
    PathBuf::from(".mailsink/tokens")
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| SyncError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.page_size == 0 || self.sync.page_size > 500 {
            return Err(SyncError::ConfigError(
                "sync.page_size must be between 1 and 500".to_string(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::ConfigError(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.sync.max_results == 0 {
            return Err(SyncError::ConfigError(
                "sync.max_results must be at least 1".to_string(),
            ));
        }
        if self.sync.parallel_principals == 0 {
            return Err(SyncError::ConfigError(
                "sync.parallel_principals must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
