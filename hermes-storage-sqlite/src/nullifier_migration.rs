//! One-shot sealing of legacy plaintext nullifiers
//!
//! Scans `notes` and `unconfirmed_notes`, seals every nullifier shorter
//! than [`hermes_core::MIN_ENCRYPTED_LEN`] to the given public key, and
//! writes all updates in one transaction. A dry run reports the same
//! plan from a read transaction and never takes the write lock, so it
//! works on a read-only connection.

use crate::{migrations, Database, Result};
use hermes_core::{looks_encrypted, nullifier, NullifierPublicKey};
use rusqlite::params;
use std::fmt;

/// Table a migrated row lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTable {
    /// `notes`, keyed by leaf index
    Notes,
    /// `unconfirmed_notes`, keyed by row id
    UnconfirmedNotes,
}

impl fmt::Display for MigrationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationTable::Notes => f.write_str("notes"),
            MigrationTable::UnconfirmedNotes => f.write_str("unconfirmed_notes"),
        }
    }
}

/// What happened to one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    /// Plaintext nullifier sealed (or would be, on a dry run)
    Sealed,
    /// Already sealed; left alone
    AlreadySealed,
    /// No nullifier stored; left alone
    Empty,
}

/// One row visited by the migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowReport {
    /// Source table
    pub table: MigrationTable,
    /// Leaf index for `notes`, row id for `unconfirmed_notes`
    pub key: i64,
    /// Outcome
    pub action: RowAction,
}

impl fmt::Display for RowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.table {
            MigrationTable::Notes => "note with leaf_index",
            MigrationTable::UnconfirmedNotes => "unconfirmed note with id",
        };
        match self.action {
            RowAction::Sealed => write!(f, "Encrypting nullifier for {} {}", what, self.key),
            RowAction::AlreadySealed => write!(
                f,
                "Nullifier for {} {} already encrypted, skipping",
                what, self.key
            ),
            RowAction::Empty => write!(f, "No nullifier for {} {}, skipping", what, self.key),
        }
    }
}

/// Migration outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Every row visited, `notes` first
    pub rows: Vec<RowReport>,
    /// Nothing was written
    pub dry_run: bool,
}

impl MigrationReport {
    /// Rows sealed (or planned) in `table`
    pub fn sealed(&self, table: MigrationTable) -> usize {
        self.rows
            .iter()
            .filter(|r| r.table == table && r.action == RowAction::Sealed)
            .count()
    }
}

/// Seal plaintext nullifiers in place
pub fn encrypt_nullifiers(
    db: &mut Database,
    public_key: &NullifierPublicKey,
    dry_run: bool,
) -> Result<MigrationReport> {
    let tx = if dry_run {
        db.read_transaction()?
    } else {
        db.transaction()?
    };
    let mut report = MigrationReport {
        rows: Vec::new(),
        dry_run,
    };

    for (table, select, update) in [
        (
            MigrationTable::Notes,
            "SELECT leaf_index, nullifier FROM notes ORDER BY leaf_index",
            "UPDATE notes SET nullifier = ?1 WHERE leaf_index = ?2 AND nullifier = ?3",
        ),
        (
            MigrationTable::UnconfirmedNotes,
            "SELECT id, nullifier FROM unconfirmed_notes ORDER BY id",
            "UPDATE unconfirmed_notes SET nullifier = ?1 WHERE id = ?2 AND nullifier = ?3",
        ),
    ] {
        if !migrations::table_exists(&tx, &table.to_string())? {
            tracing::warn!(%table, "Table missing, nothing to migrate");
            continue;
        }
        let rows: Vec<(i64, Option<Vec<u8>>)> = {
            let mut stmt = tx.prepare(select)?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for (key, value) in rows {
            let action = match value {
                None => RowAction::Empty,
                Some(ref blob) if looks_encrypted(blob) => RowAction::AlreadySealed,
                Some(plaintext) => {
                    if !dry_run {
                        let sealed = nullifier::encrypt(Some(&plaintext[..]), public_key)?;
                        tx.execute(update, params![sealed, key, plaintext])?;
                    }
                    RowAction::Sealed
                }
            };
            tracing::debug!(%table, key, ?action, "Nullifier migration row");
            report.rows.push(RowReport { table, key, action });
        }
    }

    if !dry_run {
        tx.commit()?;
    }

    tracing::info!(
        dry_run,
        notes = report.sealed(MigrationTable::Notes),
        unconfirmed_notes = report.sealed(MigrationTable::UnconfirmedNotes),
        "Nullifier migration finished"
    );
    Ok(report)
}
