//! Database schema migrations
//!
//! Migrations are named steps applied in order. Applied names are recorded in
//! `schema_migrations`; each pending step commits together with its marker,
//! so a failed step leaves neither its changes nor its marker behind.

use crate::config::LegacyDefaults;
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;

/// Migration step body
pub type MigrationFn = fn(&Connection, &LegacyDefaults) -> Result<()>;

/// One named schema step
#[derive(Clone, Copy)]
pub struct Migration {
    /// Unique name recorded once applied
    pub name: &'static str,
    /// Step body, run inside the step's transaction
    pub apply: MigrationFn,
}

/// Schema history, oldest first
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "createRate",
        apply: create_rate,
    },
    Migration {
        name: "createEnabledWalletsTable",
        apply: create_enabled_wallets_table,
    },
    Migration {
        name: "timestampToDateRates",
        apply: timestamp_to_date_rates,
    },
    Migration {
        name: "createAccountsTable",
        apply: create_accounts_table,
    },
];

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection, defaults: &LegacyDefaults) -> Result<()> {
    let applied = apply_migrations(conn, MIGRATIONS, defaults)?;
    if applied.is_empty() {
        tracing::debug!("Schema up to date ({} migrations)", MIGRATIONS.len());
    }
    Ok(())
}

/// Apply the pending steps of `migrations` in order, returning the names applied now
pub fn apply_migrations(
    conn: &mut Connection,
    migrations: &[Migration],
    defaults: &LegacyDefaults,
) -> Result<Vec<&'static str>> {
    if !table_exists(conn, "schema_migrations")? {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at INTEGER NOT NULL
            );",
        )?;
    }

    // Up-to-date databases are checked with a plain read, no write lock
    let applied: HashSet<String> = applied_migrations(conn)?.into_iter().collect();

    let mut newly_applied = Vec::new();
    for migration in migrations {
        if applied.contains(migration.name) {
            continue;
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Another connection may have applied it since the read above
        let done: Option<String> = tx
            .query_row(
                "SELECT name FROM schema_migrations WHERE name = ?1",
                params![migration.name],
                |row| row.get(0),
            )
            .optional()?;
        if done.is_some() {
            continue;
        }

        tracing::debug!("Applying migration {}", migration.name);
        let step = (migration.apply)(&tx, defaults).and_then(|()| {
            tx.execute(
                "INSERT INTO schema_migrations (name, applied_at)
                 VALUES (?1, CAST(strftime('%s', 'now') AS INTEGER))",
                params![migration.name],
            )?;
            Ok(())
        });

        if let Err(e) = step {
            tracing::error!("Migration {} failed: {}", migration.name, e);
            // Dropping the transaction rolls it back
            return Err(Error::Migration {
                name: migration.name.to_string(),
                reason: e.to_string(),
            });
        }

        tx.commit().map_err(|e| Error::Migration {
            name: migration.name.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!("Applied migration {}", migration.name);
        newly_applied.push(migration.name);
    }

    Ok(newly_applied)
}

/// Names of applied migrations, in the order they were applied
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY applied_at, rowid")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Whether a table named `name` exists
pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn create_rate(conn: &Connection, _: &LegacyDefaults) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE rate (
            coinCode TEXT NOT NULL,
            currencyCode TEXT NOT NULL,
            value TEXT NOT NULL,
            isLatest BOOLEAN NOT NULL,
            PRIMARY KEY (coinCode, currencyCode, isLatest) ON CONFLICT REPLACE
        );
        "#,
    )?;
    Ok(())
}

fn create_enabled_wallets_table(conn: &Connection, defaults: &LegacyDefaults) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE enabled_wallet (
            coinCode TEXT NOT NULL,
            accountId TEXT NOT NULL,
            syncMode TEXT,
            walletOrder INTEGER NOT NULL,
            PRIMARY KEY (coinCode, accountId) ON CONFLICT REPLACE
        );
        "#,
    )?;

    migrate_enabled_coins(conn, defaults)
}

/// Move rows of the legacy `enabled_coins` table into `enabled_wallet`.
///
/// No-op when `enabled_coins` does not exist. Rows get the configured
/// account id and sync mode, then the legacy table is dropped.
pub fn migrate_enabled_coins(conn: &Connection, defaults: &LegacyDefaults) -> Result<()> {
    if !table_exists(conn, "enabled_coins")? {
        return Ok(());
    }

    let moved = conn.execute(
        "INSERT INTO enabled_wallet (coinCode, accountId, syncMode, walletOrder)
         SELECT coinCode, ?1, ?2, coinOrder FROM enabled_coins",
        params![defaults.account_id, defaults.sync_mode.as_str()],
    )?;
    conn.execute_batch("DROP TABLE enabled_coins;")?;

    tracing::info!("Moved {} rows from enabled_coins to enabled_wallet", moved);
    Ok(())
}

fn timestamp_to_date_rates(conn: &Connection, _: &LegacyDefaults) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE rate;
        CREATE TABLE rate (
            coinCode TEXT NOT NULL,
            currencyCode TEXT NOT NULL,
            value TEXT NOT NULL,
            date DOUBLE NOT NULL,
            isLatest BOOLEAN NOT NULL,
            PRIMARY KEY (coinCode, currencyCode, date, isLatest) ON CONFLICT REPLACE
        );
        "#,
    )?;
    Ok(())
}

fn create_accounts_table(conn: &Connection, _: &LegacyDefaults) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE account (
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            "type" INTEGER NOT NULL,
            backedUp BOOLEAN NOT NULL,
            defaultSyncMode TEXT,
            words BLOB,
            derivation INTEGER,
            salt BLOB,
            data BLOB,
            eosAccount BLOB,
            PRIMARY KEY (id) ON CONFLICT REPLACE
        );
        "#,
    )?;
    Ok(())
}
