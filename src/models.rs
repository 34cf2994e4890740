use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub account_type: String,
    pub institution: Option<String>,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
    RolledBack,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub id: String,
    pub account_id: i64,
    pub file_name: String,
    pub checksum: Option<String>,
    pub total_rows: i64,
    pub successful_count: i64,
    pub failed_count: i64,
    pub status: BatchStatus,
}

/// Canonical persisted transaction. Exactly one of debit_amount/credit_amount
/// is set, and always positive. `sequence` orders transactions within an
/// account independent of wall clock, since statement rows often share a date.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub account_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub debit_amount: Option<f64>,
    pub credit_amount: Option<f64>,
    pub balance: Option<f64>,
    pub bank_reference: Option<String>,
    pub branch: Option<String>,
    pub sequence: i64,
    pub is_balance_adjustment: bool,
    pub checkpoint_id: Option<i64>,
    pub batch_id: Option<String>,
    pub source_file: Option<String>,
}

impl Transaction {
    /// Credit minus debit: the signed effect on the running balance.
    pub fn signed_amount(&self) -> f64 {
        self.credit_amount.unwrap_or(0.0) - self.debit_amount.unwrap_or(0.0)
    }

    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Column order must match SELECT_COLUMNS.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let date_text: String = row.get(2)?;
        let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Transaction {
            id: row.get(0)?,
            account_id: row.get(1)?,
            date,
            description: row.get(3)?,
            debit_amount: row.get(4)?,
            credit_amount: row.get(5)?,
            balance: row.get(6)?,
            bank_reference: row.get(7)?,
            branch: row.get(8)?,
            sequence: row.get(9)?,
            is_balance_adjustment: row.get::<_, i64>(10)? != 0,
            checkpoint_id: row.get(11)?,
            batch_id: row.get(12)?,
            source_file: row.get(13)?,
        })
    }

    pub const SELECT_COLUMNS: &'static str = "id, account_id, date, description, debit_amount, \
         credit_amount, balance, bank_reference, branch, sequence, is_balance_adjustment, \
         checkpoint_id, batch_id, source_file";
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub declared_balance: f64,
    pub calculated_balance: f64,
    pub adjustment_amount: f64,
    pub is_reconciled: bool,
    pub batch_id: Option<String>,
    pub notes: Option<String>,
}

impl Checkpoint {
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

// ---------------------------------------------------------------------------
// Normalized file grid — transient, consumed once by the mapper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Display form; dates come out timezone-free as YYYY-MM-DD.
    pub fn to_display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// One row of a normalized file: an ordered (header, value) mapping.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub cells: Vec<(String, CellValue)>,
}

impl RawRow {
    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Date,
    Description,
    Debit,
    Credit,
    SignedAmount,
    Balance,
    Reference,
    Branch,
    Ignore,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Description => "description",
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::SignedAmount => "signed_amount",
            Self::Balance => "balance",
            Self::Reference => "reference",
            Self::Branch => "branch",
            Self::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub role: ColumnRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    /// For signed-amount columns: true means negative values are debits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_debits: Option<bool>,
}

impl ColumnMapping {
    pub fn new(source_column: &str, role: ColumnRole) -> Self {
        Self {
            source_column: source_column.to_string(),
            role,
            date_format: None,
            negative_debits: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted batch diagnostics (import_batches.error_log)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub row: usize,
    pub date: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit: Option<f64>,
    /// Id of the already-persisted transaction this row collided with;
    /// absent for duplicates within the same file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: String,
    pub action: String,
    pub detail: String,
}

/// Structured diagnostic trail persisted with each batch. Part of the import
/// contract, not incidental logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchLog {
    #[serde(default)]
    pub row_errors: Vec<RowError>,
    #[serde(default)]
    pub duplicates: Vec<DuplicateRecord>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

impl BatchLog {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(s: &str) -> Self {
        serde_json::from_str(s).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_amount() {
        let mut txn = Transaction {
            id: "t1".into(),
            account_id: 1,
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            description: "x".into(),
            debit_amount: Some(40.0),
            credit_amount: None,
            balance: None,
            bank_reference: None,
            branch: None,
            sequence: 1,
            is_balance_adjustment: false,
            checkpoint_id: None,
            batch_id: None,
            source_file: None,
        };
        assert_eq!(txn.signed_amount(), -40.0);
        txn.debit_amount = None;
        txn.credit_amount = Some(25.5);
        assert_eq!(txn.signed_amount(), 25.5);
    }

    #[test]
    fn test_batch_status_roundtrip() {
        for status in [
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::RolledBack,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BatchStatus::parse("bogus"), None);
    }

    #[test]
    fn test_column_mapping_json_roundtrip() {
        let mapping = ColumnMapping {
            source_column: "Ngày giao dịch".into(),
            role: ColumnRole::Date,
            date_format: Some("%d/%m/%Y".into()),
            negative_debits: None,
        };
        let json = serde_json::to_string(&mapping).unwrap();
        assert!(json.contains("\"date\""));
        let back: ColumnMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, ColumnRole::Date);
        assert_eq!(back.date_format.as_deref(), Some("%d/%m/%Y"));
    }

    #[test]
    fn test_batch_log_json_roundtrip() {
        let mut log = BatchLog::default();
        log.row_errors.push(RowError {
            row: 3,
            message: "unparseable date: 31/13/2024".into(),
        });
        log.duplicates.push(DuplicateRecord {
            row: 5,
            date: "2024-12-25".into(),
            description: "COFFEE".into(),
            debit: Some(100000.0),
            credit: None,
            existing_id: None,
            reason: "duplicate transaction (skipped)".into(),
        });
        let back = BatchLog::from_json(&log.to_json());
        assert_eq!(back.row_errors.len(), 1);
        assert_eq!(back.duplicates.len(), 1);
        assert_eq!(back.duplicates[0].reason, "duplicate transaction (skipped)");
    }

    #[test]
    fn test_raw_row_lookup() {
        let row = RawRow {
            cells: vec![
                ("Date".into(), CellValue::Text("25/12/2024".into())),
                ("Amount".into(), CellValue::Number(100.0)),
            ],
        };
        assert_eq!(row.get("Amount"), Some(&CellValue::Number(100.0)));
        assert!(row.get("Missing").is_none());
        assert!(!row.is_empty());
    }
}
