//! SQLite account storage for Bank Wallet
//!
//! Persists wallet accounts (mnemonic, private key, HD master key, exchange
//! account) in SQLite while keeping all key material in a separate
//! [`SecretStore`]. Rows hold only secret identifiers.
//!
//! ## Layout
//!
//! - **Account store**: [`AccountStore`], the public list/save/delete surface
//! - **Records**: row mapping and secret-identifier bookkeeping
//! - **Migrations**: named, recorded schema steps run at open
//! - **Secret stores**: [`MemoryKeystore`] and [`SealedFileKeystore`]
//!   (Argon2id-derived key, AES-256-GCM or ChaCha20-Poly1305 envelopes)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod database;
pub mod error;
pub mod file_keystore;
pub mod keystore;
pub mod migrations;
pub mod record;
pub mod repository;
pub mod retry;
pub mod secret_ref;
pub mod security;

pub use config::{LegacyDefaults, StorageConfig};
pub use database::Database;
pub use error::{Error, Result};
pub use file_keystore::SealedFileKeystore;
pub use keystore::{MemoryKeystore, SecretStore};
pub use record::AccountRecord;
pub use repository::AccountStore;
pub use secret_ref::{SecretRef, SecretValue};
pub use security::{EncryptionAlgorithm, KdfParams, MasterKey};
