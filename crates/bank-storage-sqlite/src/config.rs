//! Storage configuration

use crate::Result;
use bank_core::SyncMode;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "bank.sqlite";

/// Default number of retries on `SQLITE_BUSY`
pub const DEFAULT_BUSY_RETRIES: u32 = 5;

/// Values used when migrating rows from the pre-account `enabled_coins` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyDefaults {
    /// Account id given to migrated wallets
    pub account_id: String,
    /// Sync mode given to migrated wallets
    pub sync_mode: SyncMode,
}

impl Default for LegacyDefaults {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            sync_mode: SyncMode::Fast,
        }
    }
}

/// Account storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub database_path: PathBuf,
    /// Retries on a busy database before a write fails
    pub busy_retries: u32,
    /// Remove secrets of deleted accounts and released references
    pub reclaim_secrets: bool,
    /// Legacy migration defaults
    pub legacy: LegacyDefaults,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join(DATABASE_FILE),
            busy_retries: DEFAULT_BUSY_RETRIES,
            reclaim_secrets: true,
            legacy: LegacyDefaults::default(),
        }
    }
}

impl StorageConfig {
    /// Config with defaults and the database at `path`
    pub fn with_database_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            database_path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Platform data directory, or the working directory when none is known
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "BankWallet", "BankWallet")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
