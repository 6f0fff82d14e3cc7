//! Account store
//!
//! Public persistence surface. Rows live in SQLite, key material lives in the
//! injected [`SecretStore`]; every write is one `IMMEDIATE` transaction with
//! the secrets written before the row is committed.

use crate::config::StorageConfig;
use crate::database::Database;
use crate::keystore::SecretStore;
use crate::record::AccountRecord;
use crate::retry::with_busy_retry;
use crate::{Error, Result};
use bank_core::Account;
use parking_lot::Mutex;
use rusqlite::{params, Transaction};
use std::collections::HashSet;
use std::sync::Arc;

/// Persistent store of wallet accounts
pub struct AccountStore {
    db: Mutex<Database>,
    secrets: Arc<dyn SecretStore>,
    busy_retries: u32,
    reclaim_secrets: bool,
}

impl AccountStore {
    /// Open the database at `config.database_path`, running pending migrations
    pub fn open(config: &StorageConfig, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let db = Database::open(&config.database_path, &config.legacy)?;
        Ok(Self::with_database(db, config, secrets))
    }

    /// Open a private in-memory store with default settings
    pub fn open_in_memory(secrets: Arc<dyn SecretStore>) -> Result<Self> {
        Self::open_in_memory_with_config(&StorageConfig::default(), secrets)
    }

    /// Open a private in-memory store; `config.database_path` is ignored
    pub fn open_in_memory_with_config(
        config: &StorageConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let db = Database::open_in_memory(&config.legacy)?;
        Ok(Self::with_database(db, config, secrets))
    }

    fn with_database(db: Database, config: &StorageConfig, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            db: Mutex::new(db),
            secrets,
            busy_retries: config.busy_retries,
            reclaim_secrets: config.reclaim_secrets,
        }
    }

    /// Secret store backing this account store
    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// All accounts in rowid order; a re-saved account moves last.
    ///
    /// Fails as a whole if any row cannot be rebuilt.
    pub fn list_all(&self) -> Result<Vec<Account>> {
        let records = with_busy_retry(self.busy_retries, || {
            let db = self.db.lock();
            AccountRecord::load_all(db.conn(), self.secrets.as_ref())
        })?;

        records.iter().map(AccountRecord::to_account).collect()
    }

    /// Account with `id`, if stored
    pub fn get(&self, id: &str) -> Result<Option<Account>> {
        let record = with_busy_retry(self.busy_retries, || {
            let db = self.db.lock();
            AccountRecord::load(db.conn(), self.secrets.as_ref(), id)
        })?;

        record.as_ref().map(AccountRecord::to_account).transpose()
    }

    /// Number of stored accounts
    pub fn count(&self) -> Result<usize> {
        with_busy_retry(self.busy_retries, || {
            let db = self.db.lock();
            let count: i64 = db
                .conn()
                .query_row("SELECT COUNT(*) FROM account", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Insert or replace `account`.
    ///
    /// An existing row keeps its secret identifiers; identifiers the new
    /// state no longer uses are reclaimed after commit.
    pub fn save(&self, account: &Account) -> Result<()> {
        let released = with_busy_retry(self.busy_retries, || self.save_once(account))?;

        tracing::debug!("Saved account {}", account.id);
        self.reclaim(&released);
        Ok(())
    }

    fn save_once(&self, account: &Account) -> Result<Vec<String>> {
        let secrets = self.secrets.as_ref();
        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let existing = match AccountRecord::load(&tx, secrets, &account.id) {
            Ok(existing) => existing,
            Err(Error::IncompleteRecord { reason, .. }) => {
                tracing::warn!("Overwriting unreadable account {}: {}", account.id, reason);
                None
            }
            Err(e) => return Err(e),
        };

        let previous = existing.clone();
        let (mut record, released) = match existing {
            Some(mut record) => {
                let released = record.update_from(account)?;
                (record, released)
            }
            None => (AccountRecord::from_account(account)?, Vec::new()),
        };

        let known: HashSet<String> = record.secret_ids().into_iter().collect();
        if let Err(e) = commit_record(tx, &mut record, secrets) {
            // The row is rolled back; put the secret store back to match it
            if let Some(previous) = &previous {
                previous.restore_secrets(secrets);
            }
            let fresh: Vec<String> = record
                .secret_ids()
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect();
            self.remove_secrets(&fresh);
            return Err(e);
        }

        Ok(released)
    }

    /// Delete the account `id`; missing ids are a no-op
    pub fn delete(&self, id: &str) -> Result<()> {
        let ids = with_busy_retry(self.busy_retries, || {
            let mut db = self.db.lock();
            let tx = db.transaction()?;
            let ids = AccountRecord::load_secret_ids(&tx, id)?;
            let deleted = tx.execute("DELETE FROM account WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(if deleted > 0 { ids } else { Vec::new() })
        })?;

        tracing::debug!("Deleted account {}", id);
        self.reclaim(&ids);
        Ok(())
    }

    /// Set the backed-up flag of `id`; missing ids are a no-op
    pub fn mark_backed_up(&self, id: &str) -> Result<()> {
        with_busy_retry(self.busy_retries, || {
            let mut db = self.db.lock();
            let tx = db.transaction()?;
            tx.execute("UPDATE account SET backedUp = 1 WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Secret identifiers referenced by the row `id`
    pub fn secret_identifiers(&self, id: &str) -> Result<Vec<String>> {
        with_busy_retry(self.busy_retries, || {
            let db = self.db.lock();
            AccountRecord::load_secret_ids(db.conn(), id)
        })
    }

    /// Remove secrets no committed row references, if reclamation is enabled
    fn reclaim(&self, ids: &[String]) {
        if self.reclaim_secrets {
            self.remove_secrets(ids);
        }
    }

    /// Best-effort removal of `ids`
    fn remove_secrets(&self, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.secrets.remove(id) {
                tracing::warn!("Failed to remove secret {}: {}", id, e);
            }
        }
    }
}

/// Write secrets, then the row, then commit. Any error leaves the row untouched.
fn commit_record(
    tx: Transaction<'_>,
    record: &mut AccountRecord,
    secrets: &dyn SecretStore,
) -> Result<()> {
    record.persist_secrets(secrets)?;
    record.write(&tx)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeystore;
    use bank_core::{AccountType, MnemonicDerivation};

    fn store() -> (Arc<MemoryKeystore>, AccountStore) {
        let secrets = Arc::new(MemoryKeystore::new());
        let store = AccountStore::open_in_memory(secrets.clone()).unwrap();
        (secrets, store)
    }

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AccountStore>();
    }

    #[test]
    fn test_empty_store() {
        let (_, store) = store();
        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.get("missing").unwrap().is_none());
        assert!(store.secret_identifiers("missing").unwrap().is_empty());
    }

    #[test]
    fn test_save_and_get() {
        let (secrets, store) = store();
        let account = Account::new(
            "h1",
            "HD",
            AccountType::HdMasterKey {
                data: vec![3; 64],
                derivation: MnemonicDerivation::Bip49,
            },
        );
        store.save(&account).unwrap();

        assert_eq!(store.get("h1").unwrap(), Some(account));
        assert_eq!(secrets.len(), 1);
    }

    #[test]
    fn test_reclaim_disabled_keeps_secrets() {
        let secrets = Arc::new(MemoryKeystore::new());
        let config = StorageConfig {
            reclaim_secrets: false,
            ..StorageConfig::default()
        };
        let store = AccountStore::open_in_memory_with_config(&config, secrets.clone()).unwrap();
        store
            .save(&Account::new("p", "Key", AccountType::PrivateKey { data: vec![1] }))
            .unwrap();
        store.delete("p").unwrap();

        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(secrets.len(), 1);
    }
}
