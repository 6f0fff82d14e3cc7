//! Database connection and initialization

use crate::config::LegacyDefaults;
use crate::{migrations, Result};
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P, legacy: &LegacyDefaults) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!("Opened database at {} (journal_mode={})", path.display(), mode);

        Self::init(conn, legacy)
    }

    /// Open a private in-memory database
    pub fn open_in_memory(legacy: &LegacyDefaults) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, legacy)
    }

    fn init(mut conn: Connection, legacy: &LegacyDefaults) -> Result<Self> {
        migrations::run_migrations(&mut conn, legacy)?;
        Ok(Self { conn })
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin an `IMMEDIATE` transaction (takes the write lock up front)
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}
