//! Database connection and initialization

use crate::{migrations, Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// How long SQLite itself waits on a lock before reporting BUSY
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the ledger at `path` and bring the schema up to date
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::init(conn)
    }

    /// Open an existing ledger for writing without creating it or
    /// touching its schema or journal mode
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = require_file(path.as_ref())?;
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Open an existing ledger read-only. Tables another service has not
    /// created yet may be missing; see [`Database::has_table`].
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = require_file(path.as_ref())?;
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        tracing::debug!("Opened {} read-only", path.display());
        Ok(Self { conn })
    }

    /// Private in-memory ledger
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // journal_mode returns a row, so it cannot go through execute()
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Whether `table` exists in this database
    pub fn has_table(&self, table: &str) -> Result<bool> {
        migrations::table_exists(&self.conn, table)
    }

    /// Begin a DEFERRED transaction: a consistent snapshot for reads that
    /// never takes the write lock
    pub fn read_transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Deferred)?)
    }

    /// Begin an IMMEDIATE transaction so write contention surfaces as BUSY up front
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?)
    }
}

fn require_file(path: &Path) -> Result<&Path> {
    if !path.exists() {
        return Err(Error::NotFound(format!("database {}", path.display())));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_database() {
        let file = NamedTempFile::new().unwrap();
        let db = Database::open(file.path()).unwrap();

        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let file = NamedTempFile::new().unwrap();
        {
            let db = Database::open(file.path()).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO debug_notes (leaf_index, text) VALUES (1, 'ab')",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(file.path()).unwrap();
        let text: String = db
            .conn()
            .query_row("SELECT text FROM debug_notes WHERE leaf_index = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(text, "ab");
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("txns.db");
        assert!(matches!(
            Database::open_existing(&missing),
            Err(Error::NotFound(_))
        ));
        assert!(!missing.exists());
    }

    fn legacy_file() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (leaf_index INTEGER PRIMARY KEY, commitment BLOB NOT NULL, \
             nullifier BLOB, txn_id TEXT NOT NULL);",
        )
        .unwrap();
        file
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_existing_and_readonly_leave_schema_alone() {
        let file = legacy_file();

        let db = Database::open_existing(file.path()).unwrap();
        assert_eq!(table_names(db.conn()), ["notes"]);
        assert!(db.has_table("notes").unwrap());
        assert!(!db.has_table("watermark").unwrap());
        drop(db);

        let db = Database::open_readonly(file.path()).unwrap();
        assert_eq!(table_names(db.conn()), ["notes"]);
        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "delete");
        assert!(db
            .conn()
            .execute("INSERT INTO notes VALUES (1, X'00', NULL, 'T')", [])
            .is_err());
    }

    #[test]
    fn test_readonly_requires_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("txns.db");
        assert!(matches!(
            Database::open_readonly(&missing),
            Err(Error::NotFound(_))
        ));
        assert!(!missing.exists());
    }

    #[test]
    fn test_transaction_rollback() {
        let mut db = Database::open_in_memory().unwrap();
        {
            let tx = db.transaction().unwrap();
            tx.execute("INSERT INTO debug_notes (leaf_index, text) VALUES (7, 'x')", [])
                .unwrap();
            // dropped without commit
        }
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM debug_notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
