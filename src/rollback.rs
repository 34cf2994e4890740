use rusqlite::{Connection, OptionalExtension};

use crate::checkpoint;
use crate::error::{BankbookError, Result};
use crate::models::{AuditEntry, BatchLog, BatchStatus};

#[derive(Debug, Clone)]
pub struct RollbackSummary {
    pub account_id: i64,
    pub transactions_deleted: usize,
    pub checkpoints_deleted: usize,
    pub recalculated: usize,
}

/// Reverse a completed import: delete its checkpoint(s) and transactions,
/// mark the batch rolled back with an audit entry, and recalculate every
/// checkpoint the deletions invalidated. The whole rollback is one database
/// transaction; a partial rollback is not an acceptable outcome.
pub fn rollback_batch(conn: &Connection, batch_id: &str) -> Result<RollbackSummary> {
    let row: Option<(i64, String, Option<String>)> = conn
        .query_row(
            "SELECT account_id, status, error_log FROM import_batches WHERE id = ?1",
            [batch_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((account_id, status, error_log)) = row else {
        return Err(BankbookError::BatchNotFound(batch_id.to_string()));
    };
    if BatchStatus::parse(&status) == Some(BatchStatus::RolledBack) {
        return Err(BankbookError::AlreadyRolledBack(batch_id.to_string()));
    }

    // Everything after the earliest deleted date needs recalculating, and
    // deleting a batch checkpoint invalidates later ones the same way.
    let earliest: Option<String> = conn
        .query_row(
            "SELECT MIN(date) FROM (\
               SELECT date FROM transactions WHERE batch_id = ?1 \
               UNION ALL \
               SELECT date FROM balance_checkpoints WHERE batch_id = ?1)",
            [batch_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();

    let tx = conn.unchecked_transaction()?;

    let checkpoint_ids: Vec<i64> = {
        let mut stmt =
            tx.prepare("SELECT id FROM balance_checkpoints WHERE batch_id = ?1")?;
        let rows = stmt.query_map([batch_id], |r| r.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };
    for checkpoint_id in &checkpoint_ids {
        tx.execute(
            "DELETE FROM transactions WHERE checkpoint_id = ?1",
            [checkpoint_id],
        )?;
        tx.execute(
            "DELETE FROM balance_checkpoints WHERE id = ?1",
            [checkpoint_id],
        )?;
    }

    let transactions_deleted =
        tx.execute("DELETE FROM transactions WHERE batch_id = ?1", [batch_id])?;

    let mut batch_log = BatchLog::from_json(error_log.as_deref().unwrap_or("{}"));
    batch_log.audit.push(AuditEntry {
        at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        action: "rollback".into(),
        detail: format!(
            "deleted {transactions_deleted} transactions and {} checkpoint(s) at user request",
            checkpoint_ids.len()
        ),
    });
    tx.execute(
        "UPDATE import_batches SET status = ?1, rolled_back_at = datetime('now'), \
         error_log = ?2 WHERE id = ?3",
        rusqlite::params![
            BatchStatus::RolledBack.as_str(),
            batch_log.to_json(),
            batch_id
        ],
    )?;

    // Cascade inside the same transaction so rollback plus recalculation
    // land (or fail) as one unit.
    let recalculated = match earliest {
        Some(date_text) => {
            let date = chrono::NaiveDate::parse_from_str(&date_text, "%Y-%m-%d")
                .map_err(|e| BankbookError::Other(format!("corrupt date in database: {e}")))?;
            // Recalculate from the day before so checkpoints dated exactly on
            // the earliest deleted date are included.
            let from = date.pred_opt().unwrap_or(date);
            checkpoint::recalculate_after(&tx, account_id, from)?
        }
        None => 0,
    };

    tx.commit()?;

    Ok(RollbackSummary {
        account_id,
        transactions_deleted,
        checkpoints_deleted: checkpoint_ids.len(),
        recalculated,
    })
}
