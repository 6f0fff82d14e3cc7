//! Account record: the persisted shape of an [`Account`]
//!
//! A row keeps the non-secret fields inline and one secret identifier per
//! secret column. Only the columns used by the stored discriminant are
//! populated.

use crate::keystore::SecretStore;
use crate::secret_ref::{SecretRef, SecretValue, WORD_SEPARATOR};
use crate::{Error, Result};
use bank_core::{Account, AccountKind, AccountType, MnemonicDerivation, SyncMode};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str = "SELECT id, name, \"type\", backedUp, defaultSyncMode, \
     words, derivation, salt, data, eosAccount FROM account";

/// Persisted form of one account
#[derive(Debug, Clone)]
pub struct AccountRecord {
    /// Account id (primary key)
    pub id: String,
    /// Display name
    pub name: String,
    /// Variant discriminant
    pub kind: AccountKind,
    /// Whether the user confirmed a backup
    pub backed_up: bool,
    /// Preferred sync mode
    pub default_sync_mode: Option<SyncMode>,
    /// Mnemonic derivation (Mnemonic and HdMasterKey)
    pub derivation: Option<MnemonicDerivation>,
    words: Option<SecretRef<Vec<String>>>,
    salt: Option<SecretRef<String>>,
    data: Option<SecretRef<Vec<u8>>>,
    eos_account: Option<SecretRef<String>>,
}

/// Secret payloads of one account, by column
#[derive(Default)]
struct SecretFields {
    words: Option<Vec<String>>,
    derivation: Option<MnemonicDerivation>,
    salt: Option<String>,
    data: Option<Vec<u8>>,
    eos_account: Option<String>,
}

impl SecretFields {
    fn from_account(account: &Account) -> Result<Self> {
        Ok(match &account.account_type {
            AccountType::Mnemonic {
                words,
                derivation,
                salt,
            } => {
                validate_words(words)?;
                Self {
                    words: Some(words.clone()),
                    derivation: Some(*derivation),
                    salt: salt.clone(),
                    ..Self::default()
                }
            }
            AccountType::PrivateKey { data } => Self {
                data: Some(data.clone()),
                ..Self::default()
            },
            AccountType::HdMasterKey { data, derivation } => Self {
                data: Some(data.clone()),
                derivation: Some(*derivation),
                ..Self::default()
            },
            AccountType::ExchangeAccount {
                account,
                active_private_key,
            } => Self {
                data: Some(active_private_key.clone()),
                eos_account: Some(account.clone()),
                ..Self::default()
            },
        })
    }
}

/// Words must survive the comma-joined encoding unchanged
fn validate_words(words: &[String]) -> Result<()> {
    if words.is_empty() {
        return Err(Error::Validation("Mnemonic has no words".to_string()));
    }
    if words.iter().any(|w| w.is_empty() || w.contains(WORD_SEPARATOR)) {
        return Err(Error::Validation(format!(
            "Mnemonic words must be non-empty and must not contain '{}'",
            WORD_SEPARATOR
        )));
    }
    Ok(())
}

/// Point `slot` at `value`, keeping an existing identifier.
/// A slot that loses its value has its identifier pushed to `released`.
fn assign<V: SecretValue>(
    slot: &mut Option<SecretRef<V>>,
    value: Option<V>,
    released: &mut Vec<String>,
) {
    match value {
        Some(value) => {
            if let Some(existing) = slot.as_mut() {
                existing.set_value(value);
            } else {
                *slot = Some(SecretRef::new(value));
            }
        }
        None => {
            if let Some(id) = slot.take().and_then(|old| old.id().map(str::to_string)) {
                released.push(id);
            }
        }
    }
}

impl AccountRecord {
    /// Build a record with fresh secret references
    pub fn from_account(account: &Account) -> Result<Self> {
        let fields = SecretFields::from_account(account)?;
        Ok(Self {
            id: account.id.clone(),
            name: account.name.clone(),
            kind: account.kind(),
            backed_up: account.backed_up,
            default_sync_mode: account.default_sync_mode,
            derivation: fields.derivation,
            words: fields.words.map(SecretRef::new),
            salt: fields.salt.map(SecretRef::new),
            data: fields.data.map(SecretRef::new),
            eos_account: fields.eos_account.map(SecretRef::new),
        })
    }

    /// Overwrite this record with `account`, reusing secret identifiers.
    ///
    /// Returns the identifiers no longer referenced by the record.
    pub fn update_from(&mut self, account: &Account) -> Result<Vec<String>> {
        let fields = SecretFields::from_account(account)?;
        let mut released = Vec::new();

        self.id = account.id.clone();
        self.name = account.name.clone();
        self.kind = account.kind();
        self.backed_up = account.backed_up;
        self.default_sync_mode = account.default_sync_mode;
        self.derivation = fields.derivation;

        assign(&mut self.words, fields.words, &mut released);
        assign(&mut self.salt, fields.salt, &mut released);
        assign(&mut self.data, fields.data, &mut released);
        assign(&mut self.eos_account, fields.eos_account, &mut released);

        Ok(released)
    }

    /// Rebuild the domain account
    pub fn to_account(&self) -> Result<Account> {
        let account_type = match self.kind {
            AccountKind::Mnemonic => AccountType::Mnemonic {
                words: self.require(&self.words, "words")?.value().clone(),
                derivation: *self.require(&self.derivation, "derivation")?,
                salt: self.salt.as_ref().map(|s| s.value().clone()),
            },
            AccountKind::PrivateKey => AccountType::PrivateKey {
                data: self.require(&self.data, "data")?.value().clone(),
            },
            AccountKind::HdMasterKey => AccountType::HdMasterKey {
                data: self.require(&self.data, "data")?.value().clone(),
                derivation: *self.require(&self.derivation, "derivation")?,
            },
            AccountKind::ExchangeAccount => AccountType::ExchangeAccount {
                account: self.require(&self.eos_account, "eosAccount")?.value().clone(),
                active_private_key: self.require(&self.data, "data")?.value().clone(),
            },
        };

        Ok(Account {
            id: self.id.clone(),
            name: self.name.clone(),
            account_type,
            backed_up: self.backed_up,
            default_sync_mode: self.default_sync_mode,
        })
    }

    fn require<'a, T>(&self, field: &'a Option<T>, column: &str) -> Result<&'a T> {
        field.as_ref().ok_or_else(|| Error::IncompleteRecord {
            id: self.id.clone(),
            reason: format!("missing {}", column),
        })
    }

    /// Identifiers currently referenced by this record
    pub fn secret_ids(&self) -> Vec<String> {
        [
            self.words.as_ref().and_then(|r| r.id()),
            self.salt.as_ref().and_then(|r| r.id()),
            self.data.as_ref().and_then(|r| r.id()),
            self.eos_account.as_ref().and_then(|r| r.id()),
        ]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect()
    }

    /// Write every secret to `store`, assigning identifiers where missing
    pub fn persist_secrets(&mut self, store: &dyn SecretStore) -> Result<()> {
        if let Some(words) = self.words.as_mut() {
            words.persist(store)?;
        }
        if let Some(salt) = self.salt.as_mut() {
            salt.persist(store)?;
        }
        if let Some(data) = self.data.as_mut() {
            data.persist(store)?;
        }
        if let Some(eos_account) = self.eos_account.as_mut() {
            eos_account.persist(store)?;
        }
        Ok(())
    }

    /// Rewrite every cached secret under its existing identifier.
    ///
    /// Best-effort: each failure is logged and the remaining secrets are still
    /// written.
    pub fn restore_secrets(&self, store: &dyn SecretStore) {
        let results = [
            self.words.as_ref().map(|r| (r.id(), r.restore(store))),
            self.salt.as_ref().map(|r| (r.id(), r.restore(store))),
            self.data.as_ref().map(|r| (r.id(), r.restore(store))),
            self.eos_account.as_ref().map(|r| (r.id(), r.restore(store))),
        ];

        for (id, result) in results.into_iter().flatten() {
            if let Err(e) = result {
                tracing::warn!(
                    "Failed to restore secret {} of account {}: {}",
                    id.unwrap_or("<unassigned>"),
                    self.id,
                    e
                );
            }
        }
    }

    /// Insert or replace the row. Secrets must be persisted first.
    pub(crate) fn write(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO account
                (id, name, \"type\", backedUp, defaultSyncMode, words, derivation, salt, data, eosAccount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.id,
                self.name,
                self.kind.code(),
                self.backed_up,
                self.default_sync_mode.map(|m| m.as_str()),
                self.words.as_ref().and_then(|r| r.id()),
                self.derivation.map(|d| d.code()),
                self.salt.as_ref().and_then(|r| r.id()),
                self.data.as_ref().and_then(|r| r.id()),
                self.eos_account.as_ref().and_then(|r| r.id()),
            ],
        )?;
        Ok(())
    }

    /// Load one record by id
    pub(crate) fn load(
        conn: &Connection,
        store: &dyn SecretStore,
        id: &str,
    ) -> Result<Option<Self>> {
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                RawAccountRow::from_row,
            )
            .optional()?;

        raw.map(|raw| raw.resolve(store)).transpose()
    }

    /// Secret identifiers stored in the row `id`, without touching the secret store
    pub(crate) fn load_secret_ids(conn: &Connection, id: &str) -> Result<Vec<String>> {
        let columns = conn
            .query_row(
                "SELECT words, salt, data, eosAccount FROM account WHERE id = ?1",
                params![id],
                |row| {
                    Ok([
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ])
                },
            )
            .optional()?;

        Ok(columns
            .map(|ids| ids.into_iter().flatten().collect())
            .unwrap_or_default())
    }

    /// Load every record in rowid order (`INSERT OR REPLACE` moves a re-saved row last)
    pub(crate) fn load_all(conn: &Connection, store: &dyn SecretStore) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("{} ORDER BY rowid", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map([], RawAccountRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(|raw| raw.resolve(store)).collect()
    }
}

/// Row as stored, before secrets are fetched
struct RawAccountRow {
    id: String,
    name: String,
    kind: i64,
    backed_up: bool,
    default_sync_mode: Option<String>,
    words: Option<String>,
    derivation: Option<i64>,
    salt: Option<String>,
    data: Option<String>,
    eos_account: Option<String>,
}

impl RawAccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            backed_up: row.get(3)?,
            default_sync_mode: row.get(4)?,
            words: row.get(5)?,
            derivation: row.get(6)?,
            salt: row.get(7)?,
            data: row.get(8)?,
            eos_account: row.get(9)?,
        })
    }

    fn incomplete(&self, reason: String) -> Error {
        Error::IncompleteRecord {
            id: self.id.clone(),
            reason,
        }
    }

    /// Decode codes and fetch the secrets the discriminant uses
    fn resolve(self, store: &dyn SecretStore) -> Result<AccountRecord> {
        let kind = AccountKind::from_code(self.kind).map_err(|e| self.incomplete(e.to_string()))?;
        let default_sync_mode = self
            .default_sync_mode
            .as_deref()
            .map(str::parse::<SyncMode>)
            .transpose()
            .map_err(|e| self.incomplete(e.to_string()))?;

        let uses_derivation = matches!(kind, AccountKind::Mnemonic | AccountKind::HdMasterKey);
        let derivation = match self.derivation {
            Some(code) if uses_derivation => Some(
                MnemonicDerivation::from_code(code).map_err(|e| self.incomplete(e.to_string()))?,
            ),
            _ => None,
        };

        let mnemonic = kind == AccountKind::Mnemonic;
        let exchange = kind == AccountKind::ExchangeAccount;
        let words = fetch(store, self.words.as_deref().filter(|_| mnemonic))?;
        let salt = fetch(store, self.salt.as_deref().filter(|_| mnemonic))?;
        let data = fetch(store, self.data.as_deref().filter(|_| !mnemonic))?;
        let eos_account = fetch(store, self.eos_account.as_deref().filter(|_| exchange))?;

        Ok(AccountRecord {
            id: self.id,
            name: self.name,
            kind,
            backed_up: self.backed_up,
            default_sync_mode,
            derivation,
            words,
            salt,
            data,
            eos_account,
        })
    }
}

fn fetch<V: SecretValue>(store: &dyn SecretStore, id: Option<&str>) -> Result<Option<SecretRef<V>>> {
    match id {
        Some(id) => SecretRef::resolve(store, id),
        None => Ok(None),
    }
}
