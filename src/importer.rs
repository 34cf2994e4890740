use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::checkpoint::{self, CheckpointInput, CheckpointOutcome};
use crate::classifier;
use crate::error::{BankbookError, Result};
use crate::mapper::{self, MapOptions, RowContext};
use crate::models::{
    AuditEntry, BatchLog, BatchStatus, ColumnMapping, DuplicateRecord, RowError, Transaction,
};
use crate::normalizer::{self, FileKind};
use crate::resolver::{self, SortOrder, DUPLICATE_WINDOW_DAYS};
use crate::sequencer;

/// Rows per insert statement batch; bounded to respect store-side limits.
/// Chunks run sequentially and a failure aborts the remainder.
pub const INSERT_CHUNK_SIZE: usize = 50;

#[derive(Debug)]
pub struct ImportRequest<'a> {
    pub account_name: &'a str,
    pub file_path: &'a Path,
    /// Empty means: classify columns and auto-accept confident suggestions.
    pub mappings: Vec<ColumnMapping>,
    pub options: MapOptions,
    /// Declared statement period; rows outside it are dropped.
    pub period: Option<(NaiveDate, NaiveDate)>,
    /// Declared ending balance; creates/updates a checkpoint when present.
    pub declared_balance: Option<f64>,
    pub checkpoint_notes: Option<&'a str>,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub batch_id: String,
    pub duplicate_file: bool,
    pub total_rows: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub out_of_range: usize,
    pub row_errors: Vec<RowError>,
    pub detected_order: SortOrder,
    pub renumbered: bool,
    pub checkpoint: Option<CheckpointOutcome>,
}

/// Run the whole import pipeline: normalize, map, resolve order and
/// duplicates, persist in chunks, renumber, reconcile. Row-level problems
/// are collected, not fatal; partial success is a normal outcome.
pub fn import_statement(conn: &Connection, req: &ImportRequest) -> Result<ImportOutcome> {
    let account_id: i64 = conn
        .query_row(
            "SELECT id FROM accounts WHERE name = ?1",
            [req.account_name],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| BankbookError::UnknownAccount(req.account_name.to_string()))?;

    let bytes = std::fs::read(req.file_path)?;
    let kind = FileKind::from_path(req.file_path)?;
    let checksum = hex::encode(Sha256::digest(&bytes));
    let file_name = req
        .file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();

    // Byte-identical re-import of the same file is a no-op.
    let prior_batch: Option<String> = conn
        .query_row(
            "SELECT id FROM import_batches WHERE account_id = ?1 AND checksum = ?2 \
             AND status <> 'rolled_back'",
            rusqlite::params![account_id, checksum],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(batch_id) = prior_batch {
        return Ok(ImportOutcome {
            batch_id,
            duplicate_file: true,
            total_rows: 0,
            imported: 0,
            duplicates: 0,
            out_of_range: 0,
            row_errors: Vec::new(),
            detected_order: SortOrder::Ascending,
            renumbered: false,
            checkpoint: None,
        });
    }

    let table = normalizer::normalize_file(&bytes, kind)?;

    let mappings = if req.mappings.is_empty() {
        classifier::auto_mappings(&classifier::classify_columns(&table))
    } else {
        req.mappings.clone()
    };
    mapper::validate_mappings(&mappings)?;

    let batch_id = new_batch_id();
    conn.execute(
        "INSERT INTO import_batches (id, account_id, file_name, checksum, total_rows, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            batch_id,
            account_id,
            file_name,
            checksum,
            table.rows.len() as i64,
            BatchStatus::Processing.as_str()
        ],
    )?;

    let mut mapped = Vec::new();
    let mut row_errors = Vec::new();
    for (row_index, row) in table.rows.iter().enumerate() {
        let ctx = RowContext {
            account_id,
            batch_id: &batch_id,
            row_index,
            source_file: &file_name,
        };
        match mapper::map_row(row, &mappings, &req.options, &ctx) {
            Ok(txn) => mapped.push(txn),
            Err(err) => row_errors.push(err),
        }
    }

    let existing = existing_window(conn, account_id, &mapped)?;
    let resolution = resolver::resolve_order_and_duplicates(mapped, &existing, req.period);

    // Offset past the account's current maximum so sequences stay unique
    // even when the dense renumber is skipped for a large account.
    let base_sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM transactions WHERE account_id = ?1",
        [account_id],
        |r| r.get(0),
    )?;
    let mut insert_set = resolution.insert_set;
    for txn in &mut insert_set {
        txn.sequence += base_sequence;
    }

    let mut batch_log = BatchLog {
        row_errors: row_errors.clone(),
        duplicates: resolution
            .duplicate_warnings
            .iter()
            .map(|w| DuplicateRecord {
                row: w.incoming.sequence.max(0) as usize,
                date: w.incoming.date_str(),
                description: w.incoming.description.clone(),
                debit: w.incoming.debit_amount,
                credit: w.incoming.credit_amount,
                existing_id: w.existing_id.clone(),
                reason: w.reason.clone(),
            })
            .collect(),
        audit: Vec::new(),
    };

    let inserted = match insert_chunks(conn, &insert_set) {
        Ok(count) => count,
        Err((count, source)) => {
            // Already-inserted chunks stay; the batch records the accurate
            // partial count and the user can roll back explicitly.
            batch_log.audit.push(AuditEntry {
                at: now_utc(),
                action: "import".into(),
                detail: format!("aborted after {count} rows: storage failure"),
            });
            finalize_batch(conn, &batch_id, BatchStatus::Failed, count, &row_errors, &batch_log)?;
            return Err(BankbookError::Persistence {
                inserted: count,
                source,
            });
        }
    };

    batch_log.audit.push(AuditEntry {
        at: now_utc(),
        action: "import".into(),
        detail: format!(
            "{inserted} inserted, {} duplicates skipped, {} out of range, {} row errors",
            resolution.duplicate_warnings.len(),
            resolution.out_of_range,
            row_errors.len()
        ),
    });
    finalize_batch(
        conn,
        &batch_id,
        BatchStatus::Completed,
        inserted,
        &row_errors,
        &batch_log,
    )?;

    let renumbered = sequencer::renumber_account(conn, account_id)?.renumbered;

    let checkpoint = match req.declared_balance {
        Some(declared) => {
            let date = req
                .period
                .map(|(_, end)| end)
                .or_else(|| insert_set.iter().map(|t| t.date).max());
            match date {
                Some(date) => Some(checkpoint::create_or_update_checkpoint(
                    conn,
                    &CheckpointInput {
                        account_id,
                        date,
                        declared_balance: declared,
                        notes: req.checkpoint_notes,
                        batch_id: Some(&batch_id),
                    },
                )?),
                None => {
                    log::warn!(
                        "batch {batch_id}: declared balance given but no checkpoint date \
                         could be derived; skipping checkpoint"
                    );
                    None
                }
            }
        }
        None => None,
    };

    Ok(ImportOutcome {
        batch_id,
        duplicate_file: false,
        total_rows: table.rows.len(),
        imported: inserted,
        duplicates: resolution.duplicate_warnings.len(),
        out_of_range: resolution.out_of_range,
        row_errors,
        detected_order: resolution.detected_order,
        renumbered,
        checkpoint,
    })
}

/// Existing history around the imported date range, for cross-batch
/// duplicate detection. Adjustment transactions never participate.
fn existing_window(
    conn: &Connection,
    account_id: i64,
    mapped: &[Transaction],
) -> Result<Vec<Transaction>> {
    let Some(min) = mapped.iter().map(|t| t.date).min() else {
        return Ok(Vec::new());
    };
    let max = mapped.iter().map(|t| t.date).max().unwrap_or(min);
    let from = (min - chrono::Duration::days(DUPLICATE_WINDOW_DAYS))
        .format("%Y-%m-%d")
        .to_string();
    let to = (max + chrono::Duration::days(DUPLICATE_WINDOW_DAYS))
        .format("%Y-%m-%d")
        .to_string();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE account_id = ?1 AND date >= ?2 AND date <= ?3 \
         AND is_balance_adjustment = 0",
        Transaction::SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map(
        rusqlite::params![account_id, from, to],
        Transaction::from_row,
    )?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Sequential chunked insert. Returns the rows inserted, or the count of
/// fully committed rows paired with the failing chunk's error.
fn insert_chunks(
    conn: &Connection,
    insert_set: &[Transaction],
) -> std::result::Result<usize, (usize, rusqlite::Error)> {
    let mut inserted = 0usize;
    for chunk in insert_set.chunks(INSERT_CHUNK_SIZE) {
        if let Err(e) = insert_chunk(conn, chunk) {
            return Err((inserted, e));
        }
        inserted += chunk.len();
    }
    Ok(inserted)
}

fn insert_chunk(conn: &Connection, chunk: &[Transaction]) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO transactions (id, account_id, date, description, debit_amount, \
             credit_amount, balance, bank_reference, branch, sequence, is_balance_adjustment, \
             checkpoint_id, batch_id, source_file) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        for txn in chunk {
            stmt.execute(rusqlite::params![
                txn.id,
                txn.account_id,
                txn.date_str(),
                txn.description,
                txn.debit_amount,
                txn.credit_amount,
                txn.balance,
                txn.bank_reference,
                txn.branch,
                txn.sequence,
                txn.is_balance_adjustment as i64,
                txn.checkpoint_id,
                txn.batch_id,
                txn.source_file,
            ])?;
        }
    }
    tx.commit()
}

fn finalize_batch(
    conn: &Connection,
    batch_id: &str,
    status: BatchStatus,
    successful: usize,
    row_errors: &[RowError],
    log: &BatchLog,
) -> Result<()> {
    conn.execute(
        "UPDATE import_batches SET status = ?1, successful_count = ?2, failed_count = ?3, \
         error_log = ?4 WHERE id = ?5",
        rusqlite::params![
            status.as_str(),
            successful as i64,
            row_errors.len() as i64,
            log.to_json(),
            batch_id
        ],
    )?;
    Ok(())
}

fn new_batch_id() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let salt: u16 = rand::random();
    format!("imp-{stamp}-{salt:04x}")
}

fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::models::ColumnRole;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO accounts (name, account_type) VALUES ('Checking', 'checking')",
            [],
        )
        .unwrap();
        (dir, conn)
    }

    fn write_file(dir: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn explicit_mappings() -> Vec<ColumnMapping> {
        vec![
            ColumnMapping {
                source_column: "Date".into(),
                role: ColumnRole::Date,
                date_format: Some("%d/%m/%Y".into()),
                negative_debits: None,
            },
            ColumnMapping::new("Description", ColumnRole::Description),
            ColumnMapping::new("Debit", ColumnRole::Debit),
            ColumnMapping::new("Credit", ColumnRole::Credit),
        ]
    }

    fn request<'a>(path: &'a std::path::Path, mappings: Vec<ColumnMapping>) -> ImportRequest<'a> {
        ImportRequest {
            account_name: "Checking",
            file_path: path,
            mappings,
            options: MapOptions::default(),
            period: None,
            declared_balance: None,
            checkpoint_notes: None,
        }
    }

    #[test]
    fn test_import_csv_end_to_end() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             24/12/2024,OPENING DEPOSIT,,500000\n\
             25/12/2024,COFFEE BEANS,100000,\n\
             26/12/2024,CLIENT PAYMENT,,250000\n",
        );
        let outcome = import_statement(&conn, &request(&path, explicit_mappings())).unwrap();
        assert!(!outcome.duplicate_file);
        assert_eq!(outcome.total_rows, 3);
        assert_eq!(outcome.imported, 3);
        assert!(outcome.row_errors.is_empty());
        assert_eq!(outcome.detected_order, SortOrder::Ascending);

        let (count, status): (i64, String) = conn
            .query_row(
                "SELECT successful_count, status FROM import_batches WHERE id = ?1",
                [&outcome.batch_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(status, "completed");

        let log_json: String = conn
            .query_row(
                "SELECT error_log FROM import_batches WHERE id = ?1",
                [&outcome.batch_id],
                |r| r.get(0),
            )
            .unwrap();
        let log = BatchLog::from_json(&log_json);
        assert_eq!(log.audit.len(), 1);
        assert_eq!(log.audit[0].action, "import");
    }

    #[test]
    fn test_descending_file_gets_chronological_sequences() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             25/12/2024,SECOND CHRONOLOGICALLY,100000,\n\
             24/12/2024,FIRST CHRONOLOGICALLY,50000,\n",
        );
        let outcome = import_statement(&conn, &request(&path, explicit_mappings())).unwrap();
        assert_eq!(outcome.detected_order, SortOrder::Descending);
        assert_eq!(outcome.imported, 2);

        let rows: Vec<(String, i64)> = conn
            .prepare("SELECT date, sequence FROM transactions ORDER BY sequence")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![("2024-12-24".to_string(), 1), ("2024-12-25".to_string(), 2)]
        );
    }

    #[test]
    fn test_duplicate_file_guard() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n25/12/2024,COFFEE,100,\n",
        );
        let first = import_statement(&conn, &request(&path, explicit_mappings())).unwrap();
        assert_eq!(first.imported, 1);
        let second = import_statement(&conn, &request(&path, explicit_mappings())).unwrap();
        assert!(second.duplicate_file);
        assert_eq!(second.batch_id, first.batch_id);
        assert_eq!(second.imported, 0);
    }

    #[test]
    fn test_reimport_same_rows_is_idempotent() {
        let (dir, conn) = test_db();
        let rows = "Date,Description,Debit,Credit\n\
             24/12/2024,ALPHA,100,\n\
             25/12/2024,BETA,,200\n";
        let first_path = write_file(dir.path(), "stmt1.csv", rows);
        let first = import_statement(&conn, &request(&first_path, explicit_mappings())).unwrap();
        assert_eq!(first.imported, 2);

        // Same rows, different bytes, so the checksum guard stays out of the
        // way and the duplicate resolver does the work.
        let second_path = write_file(dir.path(), "stmt2.csv", &format!("{rows}\n"));
        let second = import_statement(&conn, &request(&second_path, explicit_mappings())).unwrap();
        assert!(!second.duplicate_file);
        assert_eq!(second.imported, 0);
        assert_eq!(second.duplicates, first.imported);

        let total: i64 = conn
            .query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 2);

        // The collision trail is persisted, each row paired with the record
        // it collided with.
        let log_json: String = conn
            .query_row(
                "SELECT error_log FROM import_batches WHERE id = ?1",
                [&second.batch_id],
                |r| r.get(0),
            )
            .unwrap();
        let log = BatchLog::from_json(&log_json);
        assert_eq!(log.duplicates.len(), 2);
        assert!(log.duplicates.iter().all(|d| d.existing_id.is_some()));
    }

    #[test]
    fn test_in_batch_duplicate_scenario() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             25/12/2024,COFFEE,100000,\n\
             25/12/2024,COFFEE,100000,\n",
        );
        let outcome = import_statement(&conn, &request(&path, explicit_mappings())).unwrap();
        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_row_errors_are_local() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             25/12/2024,GOOD ROW,100,\n\
             31/13/2024,BAD DATE,50,\n\
             26/12/2024,NO AMOUNTS,,\n",
        );
        let outcome = import_statement(&conn, &request(&path, explicit_mappings())).unwrap();
        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.row_errors.len(), 2);
        let failed: i64 = conn
            .query_row(
                "SELECT failed_count FROM import_batches WHERE id = ?1",
                [&outcome.batch_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(failed, 2);
    }

    #[test]
    fn test_period_filter_drops_strays() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             30/11/2024,STRAY,10,\n\
             15/12/2024,IN PERIOD,20,\n",
        );
        let mut req = request(&path, explicit_mappings());
        req.period = Some((
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        ));
        let outcome = import_statement(&conn, &req).unwrap();
        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.out_of_range, 1);
    }

    #[test]
    fn test_declared_balance_creates_checkpoint() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             20/12/2024,DEPOSIT,,950000\n",
        );
        let mut req = request(&path, explicit_mappings());
        req.period = Some((
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        ));
        req.declared_balance = Some(1_000_000.0);
        let outcome = import_statement(&conn, &req).unwrap();
        let cp = outcome.checkpoint.unwrap();
        assert_eq!(cp.checkpoint.calculated_balance, 950_000.0);
        assert_eq!(cp.checkpoint.adjustment_amount, 50_000.0);
        assert!(!cp.checkpoint.is_reconciled);
        assert_eq!(cp.checkpoint.date_str(), "2024-12-31");
    }

    #[test]
    fn test_auto_mapping_when_none_given() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Date,Description,Debit,Credit\n\
             25/12/2024,COFFEE SHOP DOWNTOWN,100.00,\n\
             26/12/2024,CLIENT PAYMENT RECEIVED,,500.00\n",
        );
        let outcome = import_statement(&conn, &request(&path, Vec::new())).unwrap();
        assert_eq!(outcome.imported, 2);
    }

    #[test]
    fn test_unmappable_file_is_fatal() {
        let (dir, conn) = test_db();
        let path = write_file(
            dir.path(),
            "stmt.csv",
            "Alpha,Beta\nhello,world\nfoo,bar\n",
        );
        let err = import_statement(&conn, &request(&path, Vec::new())).unwrap_err();
        assert!(matches!(err, BankbookError::FileFormat(_)));
        // Fatal before the batch exists.
        let batches: i64 = conn
            .query_row("SELECT count(*) FROM import_batches", [], |r| r.get(0))
            .unwrap();
        assert_eq!(batches, 0);
    }

    #[test]
    fn test_unknown_account() {
        let (dir, conn) = test_db();
        let path = write_file(dir.path(), "stmt.csv", "Date,Debit\n25/12/2024,1\n");
        let mut req = request(&path, explicit_mappings());
        req.account_name = "Nope";
        let err = import_statement(&conn, &req).unwrap_err();
        assert!(matches!(err, BankbookError::UnknownAccount(_)));
    }
}
