//! Database schema migrations
//!
//! Table and column names are shared with the other services that read and
//! write the same ledger file; renaming anything here is a breaking change.

use crate::{Error, Result};
use rusqlite::Connection;

/// Latest schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
        set_schema_version(conn, 1)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
        set_schema_version(conn, 2)?;
    }

    Ok(())
}

/// Current schema version, 0 for a fresh database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

/// Whether `table` exists
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )?)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    if inserted > 0 {
        tracing::debug!("Inserted schema version {}", version);
    } else {
        tracing::debug!("Schema version {} already exists, skipped insert", version);
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            leaf_index INTEGER PRIMARY KEY,
            commitment BLOB NOT NULL,
            nullifier BLOB,
            txn_id TEXT NOT NULL
        );

        -- Deposits (txn_type = 0) and withdrawals (txn_type = 1)
        CREATE TABLE IF NOT EXISTS txns (
            leaf_index INTEGER PRIMARY KEY,
            txn_type INTEGER NOT NULL CHECK (txn_type IN (0, 1)),
            txn_id TEXT NOT NULL,
            address TEXT NOT NULL,
            commitment BLOB NOT NULL,
            from_nullifier BLOB,
            amount INTEGER NOT NULL,
            fee INTEGER NOT NULL DEFAULT 0,
            confirmed_block INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_txns_address ON txns(address);
        CREATE INDEX IF NOT EXISTS idx_txns_from_nullifier ON txns(from_nullifier);

        -- Notes submitted by a frontend but not yet seen on chain
        CREATE TABLE IF NOT EXISTS unconfirmed_notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            commitment BLOB NOT NULL,
            nullifier BLOB,
            txn_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_unconfirmed_notes_commitment ON unconfirmed_notes(commitment);

        CREATE TABLE IF NOT EXISTS debug_notes (
            leaf_index INTEGER PRIMARY KEY,
            text TEXT NOT NULL
        );

        -- Single row, kept that way by LedgerStore::set_watermark
        CREATE TABLE IF NOT EXISTS watermark (
            value INTEGER NOT NULL
        );

        INSERT INTO watermark (value)
        SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM watermark);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Latest commitment tree root and its leaf count
        CREATE TABLE IF NOT EXISTS roots (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            value BLOB NOT NULL,
            leaf_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stats (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO stats (key, value) VALUES
            ('total_deposits', 0),
            ('total_withdrawals', 0),
            ('total_fees', 0),
            ('count_deposits', 0);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}
