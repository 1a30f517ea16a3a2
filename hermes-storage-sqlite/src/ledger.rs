//! Ledger persistence
//!
//! [`LedgerStore`] owns the connection to the shared ledger file. Every
//! write that ingestion performs for a single on-chain transaction happens
//! inside one SQLite transaction, and every write is idempotent per
//! `leaf_index` so that redelivery after a crash is harmless.

use crate::models::{bytes32_column, sql_int, u64_column};
use crate::{
    Database, Deposit, DepositRecord, Error, LedgerStats, Note, Result, RetryPolicy, TreeRoot,
    UnconfirmedNote, Withdrawal, WithdrawalRecord,
};
use hermes_core::Bytes32;
use hermes_params::MethodKind;
use rusqlite::{params, OptionalExtension, Transaction};
use std::path::Path;

/// Whether a save recorded something new or replayed a known leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First time this leaf was seen
    Inserted,
    /// Leaf already recorded; nothing changed
    AlreadyPresent,
}

/// Durable record of notes, deposits, withdrawals and the watermark
pub struct LedgerStore {
    db: Database,
    retry_policy: RetryPolicy,
}

impl LedgerStore {
    /// Wrap an open database
    pub fn new(db: Database) -> Self {
        Self {
            db,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Open (or create) the ledger file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an existing ledger read-only, leaving its schema untouched
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Database::open_readonly(path)?))
    }

    /// Private in-memory ledger
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Mutable access for multi-statement maintenance jobs
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Run `operation`, retrying on SQLITE_BUSY / SQLITE_LOCKED.
    ///
    /// Exhaustion returns [`Error::RetriesExhausted`]; callers that advance
    /// the watermark must stop rather than skip the transaction.
    pub fn retry<F, T>(&mut self, mut operation: F) -> Result<T>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let policy = self.retry_policy;
        policy.run(|| operation(self))
    }

    /// Record a deposit and its note atomically
    pub fn save_deposit(
        &mut self,
        note: &Note,
        deposit: &Deposit,
        tree_root: &Bytes32,
        confirmed_block: u64,
    ) -> Result<SaveOutcome> {
        check_leaf(note.leaf_index, deposit.leaf_index)?;

        let tx = self.db.transaction()?;
        insert_note(&tx, note)?;

        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO txns
                (leaf_index, txn_type, txn_id, address, commitment, from_nullifier, amount, fee, confirmed_block)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 0, ?7)
            "#,
            params![
                sql_int(deposit.leaf_index)?,
                MethodKind::Deposit.txn_type(),
                note.txn_id,
                deposit.address,
                &note.commitment[..],
                sql_int(deposit.amount)?,
                sql_int(confirmed_block)?,
            ],
        )? > 0;

        if inserted {
            add_stat(&tx, "total_deposits", deposit.amount)?;
            add_stat(&tx, "count_deposits", 1)?;
        }
        update_root(&tx, tree_root, note.leaf_index)?;

        let cleared = tx.execute(
            "DELETE FROM unconfirmed_notes WHERE commitment = ?1",
            [&note.commitment[..]],
        )?;
        tx.commit()?;

        if cleared > 0 {
            tracing::debug!(leaf_index = note.leaf_index, cleared, "Cleared unconfirmed notes");
        }

        if inserted {
            tracing::info!(
                leaf_index = deposit.leaf_index,
                txn_id = %note.txn_id,
                confirmed_block,
                "Saved deposit of {} from {}",
                deposit.amount,
                deposit.address
            );
            Ok(SaveOutcome::Inserted)
        } else {
            tracing::debug!(leaf_index = deposit.leaf_index, "Deposit already recorded");
            Ok(SaveOutcome::AlreadyPresent)
        }
    }

    /// Record a withdrawal and its change note atomically
    pub fn save_withdrawal(
        &mut self,
        note: &Note,
        withdrawal: &Withdrawal,
        tree_root: &Bytes32,
        confirmed_block: u64,
    ) -> Result<SaveOutcome> {
        check_leaf(note.leaf_index, withdrawal.leaf_index)?;

        let tx = self.db.transaction()?;
        insert_note(&tx, note)?;

        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO txns
                (leaf_index, txn_type, txn_id, address, commitment, from_nullifier, amount, fee, confirmed_block)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                sql_int(withdrawal.leaf_index)?,
                MethodKind::Withdraw.txn_type(),
                note.txn_id,
                withdrawal.address,
                &note.commitment[..],
                &withdrawal.nullifier[..],
                sql_int(withdrawal.amount)?,
                sql_int(withdrawal.fee)?,
                sql_int(confirmed_block)?,
            ],
        )? > 0;

        if inserted {
            add_stat(&tx, "total_withdrawals", withdrawal.amount)?;
            add_stat(&tx, "total_fees", withdrawal.fee)?;
        }
        update_root(&tx, tree_root, note.leaf_index)?;

        // Sealed nullifiers cannot be matched without the secret key; only
        // legacy plaintext rows are found by nullifier.
        let cleared = tx.execute(
            "DELETE FROM unconfirmed_notes WHERE commitment = ?1 OR nullifier = ?2",
            params![&note.commitment[..], &withdrawal.nullifier[..]],
        )?;
        tx.commit()?;

        if cleared > 0 {
            tracing::debug!(leaf_index = note.leaf_index, cleared, "Cleared unconfirmed notes");
        }

        if inserted {
            tracing::info!(
                leaf_index = withdrawal.leaf_index,
                txn_id = %note.txn_id,
                confirmed_block,
                "Saved withdrawal of {} (fee {}) to {}",
                withdrawal.amount,
                withdrawal.fee,
                withdrawal.address
            );
            Ok(SaveOutcome::Inserted)
        } else {
            tracing::debug!(leaf_index = withdrawal.leaf_index, "Withdrawal already recorded");
            Ok(SaveOutcome::AlreadyPresent)
        }
    }

    /// Persisted watermark, 0 when none has been written
    pub fn get_watermark(&self) -> Result<u64> {
        if !self.db.has_table("watermark")? {
            return Ok(0);
        }
        let value: Option<i64> = self
            .db
            .conn()
            .query_row("SELECT MAX(value) FROM watermark", [], |row| row.get(0))?;
        match value {
            None => Ok(0),
            Some(v) => u64::try_from(v)
                .map_err(|_| Error::Validation(format!("negative watermark {}", v))),
        }
    }

    /// Persist the watermark; committed before returning.
    ///
    /// The table has a single `value` column shared with other services,
    /// so the one-row shape is kept here rather than by a key.
    pub fn set_watermark(&mut self, value: u64) -> Result<()> {
        let value = sql_int(value)?;
        let tx = self.db.transaction()?;
        let updated = tx.execute("UPDATE watermark SET value = ?1", [value])?;
        if updated == 0 {
            tx.execute("INSERT INTO watermark (value) VALUES (?1)", [value])?;
        } else if updated > 1 {
            tx.execute(
                "DELETE FROM watermark WHERE rowid NOT IN (SELECT MIN(rowid) FROM watermark)",
                [],
            )?;
        }
        tx.commit()?;
        tracing::debug!(watermark = value, "Watermark persisted");
        Ok(())
    }

    /// Set a note's nullifier if it has none yet. Returns whether it changed.
    pub fn record_note_nullifier(&self, leaf_index: u64, nullifier: &[u8]) -> Result<bool> {
        let changed = self.db.conn().execute(
            "UPDATE notes SET nullifier = ?2 WHERE leaf_index = ?1 AND nullifier IS NULL",
            params![sql_int(leaf_index)?, nullifier],
        )?;
        if changed == 0 && self.note(leaf_index)?.is_none() {
            return Err(Error::NotFound(format!("note at leaf {}", leaf_index)));
        }
        Ok(changed > 0)
    }

    /// Store the secret-note text for a leaf
    pub fn save_debug_note(&self, leaf_index: u64, text: &str) -> Result<()> {
        self.db.conn().execute(
            r#"
            INSERT INTO debug_notes (leaf_index, text) VALUES (?1, ?2)
            ON CONFLICT(leaf_index) DO UPDATE SET text = excluded.text
            "#,
            params![sql_int(leaf_index)?, text],
        )?;
        Ok(())
    }

    /// Secret-note text for a leaf
    pub fn debug_note_text(&self, leaf_index: u64) -> Result<Option<String>> {
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT text FROM debug_notes WHERE leaf_index = ?1",
                [sql_int(leaf_index)?],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Queue a note submitted but not yet confirmed. Returns the row id.
    pub fn register_unconfirmed_note(
        &self,
        commitment: &[u8],
        nullifier: Option<&[u8]>,
        txn_id: Option<&str>,
    ) -> Result<i64> {
        self.db.conn().execute(
            "INSERT INTO unconfirmed_notes (commitment, nullifier, txn_id) VALUES (?1, ?2, ?3)",
            params![commitment, nullifier, txn_id],
        )?;
        Ok(self.db.conn().last_insert_rowid())
    }

    /// All pending notes
    pub fn unconfirmed_notes(&self) -> Result<Vec<UnconfirmedNote>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, commitment, nullifier, txn_id FROM unconfirmed_notes ORDER BY id",
        )?;
        let rows = stmt.query_map([], UnconfirmedNote::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Note at a leaf
    pub fn note(&self, leaf_index: u64) -> Result<Option<Note>> {
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT leaf_index, commitment, txn_id, nullifier FROM notes WHERE leaf_index = ?1",
                [sql_int(leaf_index)?],
                Note::from_row,
            )
            .optional()?)
    }

    /// Deposits made by `address`, in leaf order
    pub fn deposits_for_address(&self, address: &str) -> Result<Vec<DepositRecord>> {
        let mut stmt = self.db.conn().prepare(
            r#"
            SELECT leaf_index, txn_id, address, amount, confirmed_block
            FROM txns
            WHERE txn_type = ?1 AND address = ?2
            ORDER BY leaf_index
            "#,
        )?;
        let rows = stmt.query_map(
            params![MethodKind::Deposit.txn_type(), address],
            DepositRecord::from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Withdrawal that revealed the plaintext `nullifier`, if any
    pub fn withdrawal_spending(&self, nullifier: &[u8]) -> Result<Option<WithdrawalRecord>> {
        Ok(self
            .db
            .conn()
            .query_row(
                r#"
                SELECT leaf_index, txn_id, address, amount, fee, confirmed_block
                FROM txns
                WHERE txn_type = ?1 AND from_nullifier = ?2
                ORDER BY leaf_index
                LIMIT 1
                "#,
                params![MethodKind::Withdraw.txn_type(), nullifier],
                WithdrawalRecord::from_row,
            )
            .optional()?)
    }

    /// Number of notes stored
    pub fn note_count(&self) -> Result<u64> {
        Ok(self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM notes", [], |row| u64_column(row, 0))?)
    }

    /// Running pool totals; zero on a ledger without a `stats` table
    pub fn stats(&self) -> Result<LedgerStats> {
        if !self.db.has_table("stats")? {
            return Ok(LedgerStats::default());
        }
        let mut stmt = self.db.conn().prepare("SELECT key, value FROM stats")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, u64_column(row, 1)?)))?;

        let mut stats = LedgerStats::default();
        for row in rows {
            let (key, value) = row?;
            match key.as_str() {
                "total_deposits" => stats.total_deposits = value,
                "total_withdrawals" => stats.total_withdrawals = value,
                "total_fees" => stats.total_fees = value,
                "count_deposits" => stats.count_deposits = value,
                other => tracing::debug!("Ignoring unknown stats key {}", other),
            }
        }
        Ok(stats)
    }

    /// Latest tree root, if any note has been recorded
    pub fn latest_root(&self) -> Result<Option<TreeRoot>> {
        if !self.db.has_table("roots")? {
            return Ok(None);
        }
        Ok(self
            .db
            .conn()
            .query_row(
                "SELECT value, leaf_count FROM roots WHERE id = 1",
                [],
                |row| {
                    Ok(TreeRoot {
                        value: bytes32_column(row, 0)?,
                        leaf_count: u64_column(row, 1)?,
                    })
                },
            )
            .optional()?)
    }
}

fn check_leaf(note_leaf: u64, record_leaf: u64) -> Result<()> {
    if note_leaf != record_leaf {
        return Err(Error::Validation(format!(
            "note leaf {} does not match transaction leaf {}",
            note_leaf, record_leaf
        )));
    }
    Ok(())
}

/// Insert a note once. A replay with the same commitment is a no-op; a
/// different commitment at a known leaf means the ledger is corrupt.
///
/// A new note with no nullifier adopts the sealed nullifier of a pending
/// note with the same commitment, when a frontend registered one.
fn insert_note(tx: &Transaction<'_>, note: &Note) -> Result<()> {
    let existing: Option<Vec<u8>> = tx
        .query_row(
            "SELECT commitment FROM notes WHERE leaf_index = ?1",
            [sql_int(note.leaf_index)?],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(commitment) = existing {
        if commitment.as_slice() != note.commitment.as_slice() {
            return Err(Error::Validation(format!(
                "leaf {} already holds commitment {}; refusing {}",
                note.leaf_index,
                hex::encode(&commitment),
                hex::encode(note.commitment)
            )));
        }
        return Ok(());
    }

    let nullifier = match &note.nullifier {
        Some(nullifier) => Some(nullifier.clone()),
        None => tx
            .query_row(
                r#"
                SELECT nullifier FROM unconfirmed_notes
                WHERE commitment = ?1 AND nullifier IS NOT NULL
                ORDER BY id
                LIMIT 1
                "#,
                [&note.commitment[..]],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?,
    };

    tx.execute(
        "INSERT INTO notes (leaf_index, commitment, txn_id, nullifier) VALUES (?1, ?2, ?3, ?4)",
        params![
            sql_int(note.leaf_index)?,
            &note.commitment[..],
            note.txn_id,
            nullifier
        ],
    )?;
    Ok(())
}

fn add_stat(tx: &Transaction<'_>, key: &str, amount: u64) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO stats (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
        "#,
        params![key, sql_int(amount)?],
    )?;
    Ok(())
}

/// Keep the root of the largest tree seen; replays of older leaves never
/// roll it back.
fn update_root(tx: &Transaction<'_>, root: &Bytes32, leaf_index: u64) -> Result<()> {
    let leaf_count = leaf_index
        .checked_add(1)
        .ok_or_else(|| Error::Validation(format!("leaf index {} overflows", leaf_index)))?;
    tx.execute(
        r#"
        INSERT INTO roots (id, value, leaf_count) VALUES (1, ?1, ?2)
        ON CONFLICT(id) DO UPDATE SET value = excluded.value, leaf_count = excluded.leaf_count
        WHERE excluded.leaf_count > roots.leaf_count
        "#,
        params![&root[..], sql_int(leaf_count)?],
    )?;
    Ok(())
}
