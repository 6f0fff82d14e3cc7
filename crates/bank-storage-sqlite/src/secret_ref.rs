//! Secret references
//!
//! A [`SecretRef`] is what an account column holds instead of key material:
//! an identifier into the [`SecretStore`] plus the plaintext cached in
//! memory. The identifier is assigned the first time the reference is
//! persisted and never changes afterwards, so rewriting a record overwrites
//! the same secret-store entry instead of leaving stale copies behind.

use crate::keystore::SecretStore;
use crate::{Error, Result};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Separator used to flatten mnemonic words into one secret string
pub const WORD_SEPARATOR: char = ',';

/// A value that can live in the secret store
pub trait SecretValue: Zeroize + Clone + PartialEq + Sized {
    /// Write `self` under `key`
    fn store(&self, store: &dyn SecretStore, key: &str) -> Result<()>;

    /// Read the value under `key`, `None` if absent
    fn load(store: &dyn SecretStore, key: &str) -> Result<Option<Self>>;
}

impl SecretValue for String {
    fn store(&self, store: &dyn SecretStore, key: &str) -> Result<()> {
        store.set_string(key, self)
    }

    fn load(store: &dyn SecretStore, key: &str) -> Result<Option<Self>> {
        Ok(store.get_string(key)?.map(|s| s.as_str().to_owned()))
    }
}

impl SecretValue for Vec<u8> {
    fn store(&self, store: &dyn SecretStore, key: &str) -> Result<()> {
        store.set_data(key, self)
    }

    fn load(store: &dyn SecretStore, key: &str) -> Result<Option<Self>> {
        Ok(store.get_data(key)?.map(|d| d.as_slice().to_vec()))
    }
}

/// Mnemonic words, stored as a single comma-joined string
impl SecretValue for Vec<String> {
    fn store(&self, store: &dyn SecretStore, key: &str) -> Result<()> {
        let joined = Zeroizing::new(self.join(&WORD_SEPARATOR.to_string()));
        store.set_string(key, &joined)
    }

    fn load(store: &dyn SecretStore, key: &str) -> Result<Option<Self>> {
        Ok(store
            .get_string(key)?
            .map(|s| s.split(WORD_SEPARATOR).map(str::to_owned).collect()))
    }
}

/// Identifier plus cached plaintext of one secret
pub struct SecretRef<V: SecretValue> {
    id: Option<String>,
    value: Zeroizing<V>,
}

impl<V: SecretValue> SecretRef<V> {
    /// Wrap a value; nothing is written until [`SecretRef::persist`]
    pub fn new(value: V) -> Self {
        Self {
            id: None,
            value: Zeroizing::new(value),
        }
    }

    /// Identifier, if already assigned
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cached plaintext
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Replace the cached plaintext, keeping the identifier
    pub fn set_value(&mut self, value: V) {
        self.value = Zeroizing::new(value);
    }

    /// Write the value to `store` and return the identifier for the column.
    ///
    /// A fresh identifier is generated on first call. A backend failure is
    /// returned as [`Error::SecretStoreWrite`]; the caller must not commit
    /// a row pointing at it.
    pub fn persist(&mut self, store: &dyn SecretStore) -> Result<String> {
        let id = self.id.get_or_insert_with(generate_id).clone();

        if let Err(e) = self.value.store(store, &id) {
            tracing::error!(key = %id, "Failed to write secret: {}", e);
            return Err(Error::SecretStoreWrite {
                key: id,
                reason: e.to_string(),
            });
        }

        Ok(id)
    }

    /// Write the cached value back under the existing identifier.
    ///
    /// No-op for a reference that was never persisted.
    pub fn restore(&self, store: &dyn SecretStore) -> Result<()> {
        match self.id.as_deref() {
            Some(id) => self.value.store(store, id),
            None => Ok(()),
        }
    }

    /// Load the secret stored under `id`; `None` when the store has no entry
    pub fn resolve(store: &dyn SecretStore, id: &str) -> Result<Option<Self>> {
        Ok(V::load(store, id)?.map(|value| Self {
            id: Some(id.to_string()),
            value: Zeroizing::new(value),
        }))
    }
}

impl<V: SecretValue> Clone for SecretRef<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            value: self.value.clone(),
        }
    }
}

impl<V: SecretValue> fmt::Debug for SecretRef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRef")
            .field("id", &self.id)
            .field("value", &"<redacted>")
            .finish()
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
