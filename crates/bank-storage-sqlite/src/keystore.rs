//! Secret store capability
//!
//! The account store never talks to a platform keychain directly. It is
//! handed an `Arc<dyn SecretStore>` at construction; platform integrations
//! (Keychain, Android Keystore, libsecret, ...) implement the trait on their
//! side of the FFI boundary. [`MemoryKeystore`] and
//! [`SealedFileKeystore`](crate::file_keystore::SealedFileKeystore) are the
//! in-crate implementations.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroizing;

/// Longest accepted key identifier
pub const MAX_KEY_LENGTH: usize = 128;

/// Keyed store for secret payloads
///
/// Implementations must be safe to call from several threads and must treat
/// a missing key as `Ok(None)` / a no-op, never as an error.
pub trait SecretStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous value
    fn set_data(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch bytes stored under `key`
    fn get_data(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Remove `key`
    fn remove(&self, key: &str) -> Result<()>;

    /// Store a UTF-8 string under `key`
    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_data(key, value.as_bytes())
    }

    /// Fetch a UTF-8 string stored under `key`
    fn get_string(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        match self.get_data(key)? {
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes).map_err(|_| {
                    Error::SecretStore(format!("Value under {} is not valid UTF-8", key))
                })?;
                Ok(Some(Zeroizing::new(text.to_string())))
            }
            None => Ok(None),
        }
    }
}

/// Check a key identifier before it reaches a backend
pub fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("Invalid secret key identifier: {:?}", key)))
    }
}

/// In-process secret store for tests and platforms without native integration
#[derive(Default)]
pub struct MemoryKeystore {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
    fail_writes: AtomicBool,
}

impl MemoryKeystore {
    /// Create empty keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (simulates a locked device)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the keystore holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SecretStore for MemoryKeystore {
    fn set_data(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::SecretStore("Keystore is locked".to_string()));
        }
        self.entries
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn get_data(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }
}
