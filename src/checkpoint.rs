use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{BankbookError, Result};
use crate::models::Checkpoint;

/// Declared and calculated balances within one cent count as reconciled.
pub const BALANCE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct CheckpointInput<'a> {
    pub account_id: i64,
    pub date: NaiveDate,
    pub declared_balance: f64,
    pub notes: Option<&'a str>,
    pub batch_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CheckpointOutcome {
    pub checkpoint: Checkpoint,
    /// Later checkpoints whose calculated balance was recomputed.
    pub recalculated: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteOutcome {
    pub account_id: i64,
    pub recalculated: usize,
}

const CHECKPOINT_COLUMNS: &str = "id, account_id, date, declared_balance, calculated_balance, \
     adjustment_amount, is_reconciled, batch_id, notes";

fn checkpoint_from_row(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
    let date_text: String = row.get(2)?;
    let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Checkpoint {
        id: row.get(0)?,
        account_id: row.get(1)?,
        date,
        declared_balance: row.get(3)?,
        calculated_balance: row.get(4)?,
        adjustment_amount: row.get(5)?,
        is_reconciled: row.get::<_, i64>(6)? != 0,
        batch_id: row.get(7)?,
        notes: row.get(8)?,
    })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Reconcile a declared end-of-day balance against the replayed transaction
/// history, persisting an adjustment transaction when they disagree, then
/// recalculate every later checkpoint on the account.
pub fn create_or_update_checkpoint(
    conn: &Connection,
    input: &CheckpointInput,
) -> Result<CheckpointOutcome> {
    let checkpoint = reconcile_at(
        conn,
        input.account_id,
        input.date,
        input.declared_balance,
        input.notes,
        input.batch_id,
    )?;
    let recalculated = recalculate_after(conn, input.account_id, input.date)?;
    let message = if recalculated == 0 {
        "no later checkpoints affected".to_string()
    } else {
        format!("{recalculated} later checkpoint(s) recalculated")
    };
    Ok(CheckpointOutcome {
        checkpoint,
        recalculated,
        message,
    })
}

/// Delete a checkpoint together with its adjustment transaction, then
/// recalculate every later checkpoint.
pub fn delete_checkpoint(conn: &Connection, id: i64) -> Result<DeleteOutcome> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT account_id, date FROM balance_checkpoints WHERE id = ?1",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((account_id, date_text)) = row else {
        return Err(BankbookError::CheckpointNotFound(id));
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM transactions WHERE checkpoint_id = ?1", [id])?;
    tx.execute("DELETE FROM balance_checkpoints WHERE id = ?1", [id])?;
    tx.commit()?;

    let date = parse_db_date(&date_text)?;
    let recalculated = recalculate_after(conn, account_id, date)?;
    Ok(DeleteOutcome {
        account_id,
        recalculated,
    })
}

/// Recompute every checkpoint on the account dated strictly after `date`, in
/// ascending date order so each one sees its predecessors' adjustments. This
/// is the explicit cascade every mutation path (import, edit, rollback) calls
/// rather than a database trigger.
pub fn recalculate_after(conn: &Connection, account_id: i64, date: NaiveDate) -> Result<usize> {
    let date_text = date.format("%Y-%m-%d").to_string();
    let laters: Vec<(String, f64, Option<String>, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT date, declared_balance, notes, batch_id FROM balance_checkpoints \
             WHERE account_id = ?1 AND date > ?2 ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![account_id, date_text], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };
    for (later_date, declared, notes, batch_id) in &laters {
        let later = parse_db_date(later_date)?;
        reconcile_at(
            conn,
            account_id,
            later,
            *declared,
            notes.as_deref(),
            batch_id.as_deref(),
        )?;
    }
    Ok(laters.len())
}

pub fn get_checkpoint(conn: &Connection, id: i64) -> Result<Checkpoint> {
    conn.query_row(
        &format!("SELECT {CHECKPOINT_COLUMNS} FROM balance_checkpoints WHERE id = ?1"),
        [id],
        checkpoint_from_row,
    )
    .optional()?
    .ok_or(BankbookError::CheckpointNotFound(id))
}

pub fn list_checkpoints(conn: &Connection, account_id: i64) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHECKPOINT_COLUMNS} FROM balance_checkpoints WHERE account_id = ?1 ORDER BY date"
    ))?;
    let rows = stmt.query_map([account_id], checkpoint_from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

// ---------------------------------------------------------------------------
// Reconciliation of a single (account, date)
// ---------------------------------------------------------------------------

fn reconcile_at(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    declared: f64,
    notes: Option<&str>,
    batch_id: Option<&str>,
) -> Result<Checkpoint> {
    let date_text = date.format("%Y-%m-%d").to_string();

    // The statement's own running balance is more authoritative than a
    // manually retyped number.
    let declared = match last_recorded_balance_on(conn, account_id, &date_text)? {
        Some(statement_balance) => {
            if (statement_balance - declared).abs() > BALANCE_EPSILON {
                log::warn!(
                    "account {account_id} {date_text}: declared balance {declared:.2} differs \
                     from statement balance {statement_balance:.2}; using the statement value"
                );
            }
            statement_balance
        }
        None => declared,
    };

    let existing_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM balance_checkpoints WHERE account_id = ?1 AND date = ?2",
            rusqlite::params![account_id, date_text],
            |r| r.get(0),
        )
        .optional()?;

    let calculated = replay_balance(conn, account_id, &date_text, existing_id)?;
    let adjustment = declared - calculated;
    let is_reconciled = adjustment.abs() < BALANCE_EPSILON;

    // One checkpoint per (account, date): an existing one is replaced in
    // place so its adjustment link survives.
    let id = match existing_id {
        Some(id) => {
            conn.execute(
                "UPDATE balance_checkpoints SET declared_balance = ?1, calculated_balance = ?2, \
                 adjustment_amount = ?3, is_reconciled = ?4, notes = COALESCE(?5, notes), \
                 batch_id = COALESCE(?6, batch_id) WHERE id = ?7",
                rusqlite::params![
                    declared,
                    calculated,
                    adjustment,
                    is_reconciled as i64,
                    notes,
                    batch_id,
                    id
                ],
            )?;
            id
        }
        None => {
            conn.execute(
                "INSERT INTO balance_checkpoints (account_id, date, declared_balance, \
                 calculated_balance, adjustment_amount, is_reconciled, batch_id, notes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    account_id,
                    date_text,
                    declared,
                    calculated,
                    adjustment,
                    is_reconciled as i64,
                    batch_id,
                    notes
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    if is_reconciled {
        conn.execute("DELETE FROM transactions WHERE checkpoint_id = ?1", [id])?;
    } else {
        upsert_adjustment(conn, id, account_id, &date_text, adjustment)?;
    }

    Ok(Checkpoint {
        id,
        account_id,
        date,
        declared_balance: declared,
        calculated_balance: calculated,
        adjustment_amount: adjustment,
        is_reconciled,
        batch_id: batch_id.map(|s| s.to_string()),
        notes: notes.map(|s| s.to_string()),
    })
}

/// Sum credit − debit over the account's history up to end-of-day `up_to`,
/// folding in (date, sequence) order since same-day rows are disambiguated
/// only by sequence. Starts from the nearest prior reconciled checkpoint when
/// one exists. Adjustments belonging to other checkpoints count; only the
/// checkpoint's own adjustment is excluded, so it never feeds back into its
/// own calculation.
fn replay_balance(
    conn: &Connection,
    account_id: i64,
    up_to: &str,
    own_checkpoint: Option<i64>,
) -> Result<f64> {
    let prior: Option<(String, f64)> = conn
        .query_row(
            "SELECT date, calculated_balance FROM balance_checkpoints \
             WHERE account_id = ?1 AND date < ?2 AND is_reconciled = 1 \
             ORDER BY date DESC LIMIT 1",
            rusqlite::params![account_id, up_to],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    // Empty string sorts before every date, so "no prior checkpoint" replays
    // from the beginning of history.
    let (after, mut balance) = prior.unwrap_or((String::new(), 0.0));

    let own = own_checkpoint.unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT COALESCE(credit_amount, 0) - COALESCE(debit_amount, 0) FROM transactions \
         WHERE account_id = ?1 AND date > ?2 AND date <= ?3 \
         AND (checkpoint_id IS NULL OR checkpoint_id <> ?4) \
         ORDER BY date, sequence, id",
    )?;
    let rows = stmt.query_map(rusqlite::params![account_id, after, up_to, own], |r| {
        r.get::<_, f64>(0)
    })?;
    for delta in rows {
        balance += delta?;
    }
    Ok(balance)
}

/// Balance recorded on the chronologically last transaction of the day, if
/// the imported data carried a balance column.
fn last_recorded_balance_on(
    conn: &Connection,
    account_id: i64,
    date_text: &str,
) -> Result<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT balance FROM transactions \
             WHERE account_id = ?1 AND date = ?2 AND balance IS NOT NULL \
             AND is_balance_adjustment = 0 \
             ORDER BY sequence DESC, id DESC LIMIT 1",
            rusqlite::params![account_id, date_text],
            |r| r.get(0),
        )
        .optional()?)
}

/// The synthetic transaction carrying the unexplained difference. Positive
/// adjustments post as credits, negative as debits. Owned by the engine:
/// never user-editable, removed only through its checkpoint.
fn upsert_adjustment(
    conn: &Connection,
    checkpoint_id: i64,
    account_id: i64,
    date_text: &str,
    adjustment: f64,
) -> Result<()> {
    let (debit, credit) = if adjustment < 0.0 {
        (Some(-adjustment), None)
    } else {
        (None, Some(adjustment))
    };
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM transactions WHERE checkpoint_id = ?1",
            [checkpoint_id],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE transactions SET date = ?1, debit_amount = ?2, credit_amount = ?3 \
                 WHERE id = ?4",
                rusqlite::params![date_text, debit, credit, id],
            )?;
        }
        None => {
            let next_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM transactions WHERE account_id = ?1",
                [account_id],
                |r| r.get(0),
            )?;
            conn.execute(
                "INSERT INTO transactions (id, account_id, date, description, debit_amount, \
                 credit_amount, sequence, is_balance_adjustment, checkpoint_id) \
                 VALUES (?1, ?2, ?3, 'Balance adjustment', ?4, ?5, ?6, 1, ?7)",
                rusqlite::params![
                    format!("adj-{checkpoint_id}"),
                    account_id,
                    date_text,
                    debit,
                    credit,
                    next_seq,
                    checkpoint_id
                ],
            )?;
        }
    }
    Ok(())
}

fn parse_db_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| BankbookError::Other(format!("corrupt date in database: {text} ({e})")))
}
