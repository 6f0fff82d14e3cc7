//! Account store integration tests

use bank_core::{Account, AccountType, MnemonicDerivation, SyncMode};
use bank_storage_sqlite::{
    AccountStore, EncryptionAlgorithm, Error, KdfParams, MasterKey, MemoryKeystore,
    SealedFileKeystore, SecretStore, StorageConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use tempfile::TempDir;
use zeroize::Zeroizing;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Keystore whose `fail_at`-th write (1-based) fails
struct FailingNthWrite {
    inner: MemoryKeystore,
    writes: AtomicUsize,
    fail_at: AtomicUsize,
}

impl FailingNthWrite {
    fn new() -> Self {
        Self {
            inner: MemoryKeystore::new(),
            writes: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(0),
        }
    }

    /// Fail the `n`-th write from now on
    fn fail_write(&self, n: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.fail_at.store(done + n, Ordering::SeqCst);
    }
}

impl SecretStore for FailingNthWrite {
    fn set_data(&self, key: &str, value: &[u8]) -> bank_storage_sqlite::Result<()> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at.load(Ordering::SeqCst) {
            return Err(Error::SecretStore(format!("write {} rejected", n)));
        }
        self.inner.set_data(key, value)
    }

    fn get_data(&self, key: &str) -> bank_storage_sqlite::Result<Option<Zeroizing<Vec<u8>>>> {
        self.inner.get_data(key)
    }

    fn remove(&self, key: &str) -> bank_storage_sqlite::Result<()> {
        self.inner.remove(key)
    }
}

fn failing_store(config: &StorageConfig) -> (Arc<FailingNthWrite>, AccountStore) {
    init_tracing();
    let secrets = Arc::new(FailingNthWrite::new());
    let store = AccountStore::open_in_memory_with_config(config, secrets.clone()).unwrap();
    (secrets, store)
}

fn memory_store() -> (Arc<MemoryKeystore>, AccountStore) {
    init_tracing();
    let secrets = Arc::new(MemoryKeystore::new());
    let store = AccountStore::open_in_memory(secrets.clone()).unwrap();
    (secrets, store)
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

fn mnemonic_account(id: &str, salt: Option<&str>) -> Account {
    Account::new(
        id,
        "Main",
        AccountType::Mnemonic {
            words: words(&["abc", "def"]),
            derivation: MnemonicDerivation::Bip44,
            salt: salt.map(str::to_string),
        },
    )
}

fn all_variants() -> Vec<Account> {
    vec![
        mnemonic_account("m-nosalt", None),
        mnemonic_account("m-salt", Some("pepper")).with_sync_mode(SyncMode::New),
        Account::new("pk", "Key", AccountType::PrivateKey { data: vec![0xAB; 32] }),
        Account::new(
            "hd",
            "Master",
            AccountType::HdMasterKey {
                data: vec![1, 2, 3, 4],
                derivation: MnemonicDerivation::Bip84,
            },
        )
        .with_sync_mode(SyncMode::Slow),
        Account::new(
            "eos",
            "Exchange",
            AccountType::ExchangeAccount {
                account: "bankwallet11".to_string(),
                active_private_key: vec![9; 37],
            },
        ),
    ]
}

#[test]
fn test_first_mnemonic_account() {
    let (secrets, store) = memory_store();
    let account = mnemonic_account("a1", None);

    store.save(&account).unwrap();

    let listed = store.list_all().unwrap();
    assert_eq!(listed, vec![account]);
    assert!(!listed[0].backed_up);
    assert_eq!(listed[0].default_sync_mode, None);

    let ids = store.secret_identifiers("a1").unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(secrets.get_string(&ids[0]).unwrap().unwrap().as_str(), "abc,def");
}

#[test]
fn test_every_variant_roundtrips() {
    let (_, store) = memory_store();
    let accounts = all_variants();

    for account in &accounts {
        store.save(account).unwrap();
    }

    assert_eq!(store.list_all().unwrap(), accounts);
    assert_eq!(store.count().unwrap(), accounts.len());
    for account in &accounts {
        assert_eq!(store.get(&account.id).unwrap().as_ref(), Some(account));
    }
}

#[test]
fn test_rows_hold_no_plaintext() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bank.sqlite");
    let secrets = Arc::new(MemoryKeystore::new());
    {
        let store = AccountStore::open(&StorageConfig::with_database_path(&path), secrets).unwrap();
        store
            .save(&Account::new(
                "eos",
                "Exchange",
                AccountType::ExchangeAccount {
                    account: "plaintextaccount".to_string(),
                    active_private_key: b"plaintextkeymaterial".to_vec(),
                },
            ))
            .unwrap();
        store.save(&mnemonic_account("m", Some("plaintextsalt"))).unwrap();
    }

    let conn = rusqlite::Connection::open(&path).unwrap();
    let mut stmt = conn
        .prepare("SELECT words, salt, data, eosAccount FROM account")
        .unwrap();
    let cells = stmt
        .query_map([], |row| {
            Ok((0..4)
                .map(|i| row.get::<_, Option<String>>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();

    for cell in cells.into_iter().flatten().flatten() {
        assert!(!cell.contains("plaintext"), "secret leaked into row: {}", cell);
        assert!(uuid::Uuid::parse_str(&cell).is_ok());
    }
}

#[test]
fn test_identifiers_stable_across_saves() {
    let (secrets, store) = memory_store();
    let mut account = mnemonic_account("a1", Some("pepper"));
    store.save(&account).unwrap();
    let before = store.secret_identifiers("a1").unwrap();

    account.name = "Renamed".to_string();
    account.account_type = AccountType::Mnemonic {
        words: words(&["ghi", "jkl"]),
        derivation: MnemonicDerivation::Bip49,
        salt: Some("other".to_string()),
    };
    store.save(&account).unwrap();

    assert_eq!(store.secret_identifiers("a1").unwrap(), before);
    assert_eq!(secrets.len(), 2);
    assert_eq!(store.get("a1").unwrap(), Some(account));
}

#[test]
fn test_save_replaces_existing_row() {
    let (_, store) = memory_store();
    store.save(&mnemonic_account("a1", None)).unwrap();

    let mut renamed = mnemonic_account("a1", None);
    renamed.name = "Savings".to_string();
    store.save(&renamed).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.list_all().unwrap(), vec![renamed]);
}

#[test]
fn test_missing_secret_is_incomplete_record() {
    let (secrets, store) = memory_store();
    store.save(&mnemonic_account("a1", None)).unwrap();

    for id in store.secret_identifiers("a1").unwrap() {
        secrets.remove(&id).unwrap();
    }

    match store.list_all() {
        Err(Error::IncompleteRecord { id, .. }) => assert_eq!(id, "a1"),
        other => panic!("expected IncompleteRecord, got {:?}", other),
    }
    assert!(matches!(store.get("a1"), Err(Error::IncompleteRecord { .. })));
}

#[test]
fn test_one_bad_row_fails_listing() {
    let (secrets, store) = memory_store();
    store
        .save(&Account::new("good", "Good", AccountType::PrivateKey { data: vec![1] }))
        .unwrap();
    store
        .save(&Account::new("bad", "Bad", AccountType::PrivateKey { data: vec![2] }))
        .unwrap();
    for id in store.secret_identifiers("bad").unwrap() {
        secrets.remove(&id).unwrap();
    }

    assert!(store.list_all().is_err());
    assert!(store.get("good").unwrap().is_some());
}

#[test]
fn test_resaving_unreadable_row_repairs_it() {
    let (secrets, store) = memory_store();
    let account = mnemonic_account("a1", None);
    store.save(&account).unwrap();
    for id in store.secret_identifiers("a1").unwrap() {
        secrets.remove(&id).unwrap();
    }

    store.save(&account).unwrap();
    assert_eq!(store.get("a1").unwrap(), Some(account));
}

/// File-backed store holding `accounts`, plus its database path
fn file_store(dir: &TempDir, accounts: &[Account]) -> (AccountStore, std::path::PathBuf) {
    init_tracing();
    let path = dir.path().join("bank.sqlite");
    let store = AccountStore::open(
        &StorageConfig::with_database_path(&path),
        Arc::new(MemoryKeystore::new()),
    )
    .unwrap();
    for account in accounts {
        store.save(account).unwrap();
    }
    (store, path)
}

fn expect_incomplete(result: bank_storage_sqlite::Result<Option<Account>>, id: &str) -> String {
    match result {
        Err(Error::IncompleteRecord { id: bad, reason }) => {
            assert_eq!(bad, id);
            reason
        }
        other => panic!("expected IncompleteRecord for {}, got {:?}", id, other),
    }
}

#[test]
fn test_null_derivation_is_incomplete_record() {
    let dir = TempDir::new().unwrap();
    let hd = Account::new(
        "hd",
        "Master",
        AccountType::HdMasterKey {
            data: vec![1, 2, 3],
            derivation: MnemonicDerivation::Bip49,
        },
    );
    let (store, path) = file_store(&dir, &[mnemonic_account("m", None), hd]);

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("UPDATE account SET derivation = NULL", [])
        .unwrap();

    for id in ["m", "hd"] {
        assert_eq!(expect_incomplete(store.get(id), id), "missing derivation");
    }
    assert!(matches!(store.list_all(), Err(Error::IncompleteRecord { .. })));
}

#[test]
fn test_unknown_type_code_is_incomplete_record() {
    let dir = TempDir::new().unwrap();
    let (store, path) = file_store(&dir, &[mnemonic_account("m", None)]);

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("UPDATE account SET \"type\" = 9 WHERE id = 'm'", [])
        .unwrap();

    expect_incomplete(store.get("m"), "m");
    assert!(matches!(store.list_all(), Err(Error::IncompleteRecord { .. })));
}

#[test]
fn test_unknown_sync_mode_is_incomplete_record() {
    let dir = TempDir::new().unwrap();
    let account = mnemonic_account("m", None).with_sync_mode(SyncMode::Slow);
    let (store, path) = file_store(&dir, &[account]);

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("UPDATE account SET defaultSyncMode = 'turbo' WHERE id = 'm'", [])
        .unwrap();

    expect_incomplete(store.get("m"), "m");
    assert!(matches!(store.list_all(), Err(Error::IncompleteRecord { .. })));
}

#[test]
fn test_resaved_account_lists_last() {
    let (_, store) = memory_store();
    let first = mnemonic_account("a", None);
    let second = Account::new("b", "Key", AccountType::PrivateKey { data: vec![7] });
    store.save(&first).unwrap();
    store.save(&second).unwrap();

    let mut renamed = first.clone();
    renamed.name = "Renamed".to_string();
    store.save(&renamed).unwrap();

    assert_eq!(store.list_all().unwrap(), vec![second, renamed]);
}

#[test]
fn test_missing_id_operations_are_noops() {
    let (secrets, store) = memory_store();

    store.delete("ghost").unwrap();
    store.mark_backed_up("ghost").unwrap();

    assert_eq!(store.count().unwrap(), 0);
    assert!(secrets.is_empty());
}

#[test]
fn test_mark_backed_up_changes_only_flag() {
    let (_, store) = memory_store();
    let account = mnemonic_account("a1", Some("pepper")).with_sync_mode(SyncMode::Fast);
    store.save(&account).unwrap();
    let ids = store.secret_identifiers("a1").unwrap();

    store.mark_backed_up("a1").unwrap();

    let stored = store.get("a1").unwrap().unwrap();
    assert!(stored.backed_up);
    assert_eq!(
        Account {
            backed_up: false,
            ..stored
        },
        account
    );
    assert_eq!(store.secret_identifiers("a1").unwrap(), ids);
}

#[test]
fn test_delete_reclaims_secrets() {
    let (secrets, store) = memory_store();
    store.save(&mnemonic_account("a1", Some("pepper"))).unwrap();
    store.save(&mnemonic_account("a2", None)).unwrap();
    let remaining = store.secret_identifiers("a2").unwrap();

    store.delete("a1").unwrap();

    assert!(store.get("a1").unwrap().is_none());
    assert_eq!(secrets.keys(), remaining);
}

#[test]
fn test_clearing_salt_reclaims_it() {
    let (secrets, store) = memory_store();
    store.save(&mnemonic_account("a1", Some("pepper"))).unwrap();
    assert_eq!(secrets.len(), 2);

    store.save(&mnemonic_account("a1", None)).unwrap();

    let ids = store.secret_identifiers("a1").unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(secrets.keys(), ids);
    assert_eq!(store.get("a1").unwrap(), Some(mnemonic_account("a1", None)));
}

#[test]
fn test_variant_change_on_same_id() {
    let (secrets, store) = memory_store();
    store.save(&mnemonic_account("a1", Some("pepper"))).unwrap();

    let replacement = Account::new(
        "a1",
        "Main",
        AccountType::ExchangeAccount {
            account: "bankwallet11".to_string(),
            active_private_key: vec![5; 8],
        },
    );
    store.save(&replacement).unwrap();

    assert_eq!(store.list_all().unwrap(), vec![replacement]);
    assert_eq!(secrets.len(), 2);
    assert_eq!(secrets.keys().len(), store.secret_identifiers("a1").unwrap().len());
}

#[test]
fn test_secret_write_failure_leaves_no_row() {
    let (secrets, store) = memory_store();
    secrets.set_fail_writes(true);

    let err = store.save(&mnemonic_account("a1", Some("pepper"))).unwrap_err();

    assert!(matches!(err, Error::SecretStoreWrite { .. }));
    assert_eq!(store.count().unwrap(), 0);
    assert!(secrets.is_empty());

    secrets.set_fail_writes(false);
    store.save(&mnemonic_account("a1", Some("pepper"))).unwrap();
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn test_secret_write_failure_keeps_previous_row() {
    let (secrets, store) = memory_store();
    let previous = mnemonic_account("a1", None);
    store.save(&previous).unwrap();

    secrets.set_fail_writes(true);
    let mut renamed = previous.clone();
    renamed.name = "Renamed".to_string();
    assert!(store.save(&renamed).is_err());
    secrets.set_fail_writes(false);

    assert_eq!(store.list_all().unwrap(), vec![previous]);
}

#[test]
fn test_partial_secret_write_restores_previous_secrets() {
    let (secrets, store) = failing_store(&StorageConfig::default());
    let mut old = mnemonic_account("a1", Some("pepper"));
    old.name = "Old".to_string();
    store.save(&old).unwrap();
    let ids = store.secret_identifiers("a1").unwrap();

    // Words are rewritten under the reused id, then the salt write fails
    let new = Account::new(
        "a1",
        "New",
        AccountType::Mnemonic {
            words: words(&["xyz", "uvw"]),
            derivation: MnemonicDerivation::Bip44,
            salt: Some("salt2".to_string()),
        },
    );
    secrets.fail_write(2);
    let err = store.save(&new).unwrap_err();

    assert!(matches!(err, Error::SecretStoreWrite { .. }));
    assert_eq!(store.get("a1").unwrap(), Some(old));
    assert_eq!(store.secret_identifiers("a1").unwrap(), ids);
    assert_eq!(secrets.inner.len(), ids.len());
}

#[test]
fn test_failed_save_removes_fresh_secrets_without_reclamation() {
    let config = StorageConfig {
        reclaim_secrets: false,
        ..StorageConfig::default()
    };
    let (secrets, store) = failing_store(&config);

    // The words land, then the salt write fails
    secrets.fail_write(2);
    assert!(store.save(&mnemonic_account("a1", Some("pepper"))).is_err());

    assert_eq!(store.count().unwrap(), 0);
    assert!(secrets.inner.is_empty());
}

#[test]
fn test_failed_update_keeps_reused_and_drops_added_secrets() {
    let (secrets, store) = failing_store(&StorageConfig::default());
    let old = mnemonic_account("a1", None);
    store.save(&old).unwrap();

    // Reused words id is rewritten, the new salt id fails on its first write
    let mut salted = mnemonic_account("a1", Some("pepper"));
    salted.name = "Salted".to_string();
    secrets.fail_write(2);
    assert!(store.save(&salted).is_err());

    assert_eq!(store.list_all().unwrap(), vec![old]);
    assert_eq!(secrets.inner.len(), 1);
}

#[test]
fn test_invalid_words_rejected() {
    let (secrets, store) = memory_store();
    let account = Account::new(
        "bad",
        "Bad",
        AccountType::Mnemonic {
            words: words(&["comma,word"]),
            derivation: MnemonicDerivation::Bip44,
            salt: None,
        },
    );

    assert!(matches!(store.save(&account), Err(Error::Validation(_))));
    assert_eq!(store.count().unwrap(), 0);
    assert!(secrets.is_empty());
}

#[test]
fn test_concurrent_saves() {
    let (_, store) = memory_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let id = format!("t{}-{}", t, i);
                    store
                        .save(&Account::new(
                            id.as_str(),
                            "Concurrent",
                            AccountType::PrivateKey { data: vec![t as u8, i as u8] },
                        ))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 80);
    assert_eq!(store.list_all().unwrap().len(), 80);
}

#[test]
fn test_reopen_file_database_and_keystore() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::with_database_path(dir.path().join("db").join("bank.sqlite"));
    let keys_dir = dir.path().join("keys");
    let params = KdfParams {
        m_cost: 1024,
        t_cost: 1,
        p_cost: 1,
    };
    let accounts = all_variants();

    {
        let secrets = Arc::new(
            SealedFileKeystore::open_with_passphrase(&keys_dir, "correct horse", params).unwrap(),
        );
        let store = AccountStore::open(&config, secrets).unwrap();
        for account in &accounts {
            store.save(account).unwrap();
        }
        store.mark_backed_up("pk").unwrap();
    }

    let secrets = Arc::new(
        SealedFileKeystore::open_with_passphrase(&keys_dir, "correct horse", params).unwrap(),
    );
    let store = AccountStore::open(&config, secrets).unwrap();
    let listed = store.list_all().unwrap();

    assert_eq!(listed.len(), accounts.len());
    for (stored, expected) in listed.iter().zip(&accounts) {
        assert_eq!(stored.account_type, expected.account_type);
        assert_eq!(stored.backed_up, expected.id == "pk");
    }
}

#[test]
fn test_file_keystore_with_other_key_fails_reads() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::with_database_path(dir.path().join("bank.sqlite"));
    let keys_dir = dir.path().join("keys");

    {
        let secrets = Arc::new(
            SealedFileKeystore::open(&keys_dir, MasterKey::generate(EncryptionAlgorithm::AesGcm))
                .unwrap(),
        );
        let store = AccountStore::open(&config, secrets).unwrap();
        store.save(&mnemonic_account("a1", None)).unwrap();
    }

    let secrets = Arc::new(
        SealedFileKeystore::open(&keys_dir, MasterKey::generate(EncryptionAlgorithm::AesGcm))
            .unwrap(),
    );
    let store = AccountStore::open(&config, secrets).unwrap();
    assert!(matches!(store.list_all(), Err(Error::Encryption(_))));
}
