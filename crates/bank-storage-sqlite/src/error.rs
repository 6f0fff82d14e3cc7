//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored account could not be turned back into an `Account`
    #[error("Incomplete account record {id}: {reason}")]
    IncompleteRecord {
        /// Account id of the offending row
        id: String,
        /// Which field was missing or unreadable
        reason: String,
    },

    /// Migration error (fatal at startup)
    #[error("Migration {name} failed: {reason}")]
    Migration {
        /// Name of the failing step
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// Writing a secret to the secret store failed
    #[error("Secret store write failed for {key}: {reason}")]
    SecretStoreWrite {
        /// Identifier being written
        key: String,
        /// Backend failure
        reason: String,
    },

    /// Secret store read/remove error
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Domain model error
    #[error("Account model error: {0}")]
    Core(#[from] bank_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
