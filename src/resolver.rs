use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::models::Transaction;

/// Days of existing history fetched on either side of the imported date range
/// for cross-batch duplicate checks.
pub const DUPLICATE_WINDOW_DAYS: i64 = 7;

const DESCRIPTION_KEY_LEN: usize = 50;

/// Outcome of the two-endpoint order heuristic. A non-monotonic file (for
/// example grouped by branch before date) is misclassified by design; the
/// caller surfaces the guess so a human can override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateWarning {
    pub incoming: Transaction,
    /// The persisted transaction this row collided with; None for an exact
    /// repeat within the same file.
    pub existing_id: Option<String>,
    pub reason: String,
}

#[derive(Debug)]
pub struct Resolution {
    /// Order-corrected, de-duplicated transactions, ascending by sequence.
    pub insert_set: Vec<Transaction>,
    pub duplicate_warnings: Vec<DuplicateWarning>,
    /// Rows dropped by the statement-period pre-filter.
    pub out_of_range: usize,
    pub detected_order: SortOrder,
}

/// Detect file order, normalize sequences to chronological order, drop rows
/// outside the statement period, and suppress duplicates both within the
/// batch and against existing account history.
pub fn resolve_order_and_duplicates(
    mut mapped: Vec<Transaction>,
    existing: &[Transaction],
    period: Option<(NaiveDate, NaiveDate)>,
) -> Resolution {
    // Endpoint heuristic only: first row newer than the last means the
    // export runs newest-first.
    let detected_order = match (mapped.first(), mapped.last()) {
        (Some(first), Some(last)) if first.date > last.date => SortOrder::Descending,
        _ => SortOrder::Ascending,
    };
    if detected_order == SortOrder::Descending {
        let n = mapped.len() as i64;
        for txn in &mut mapped {
            txn.sequence = n - txn.sequence + 1;
        }
        mapped.reverse();
    }

    let mut out_of_range = 0usize;
    if let Some((start, end)) = period {
        let before = mapped.len();
        mapped.retain(|t| t.date >= start && t.date <= end);
        out_of_range = before - mapped.len();
    }

    let mut duplicate_warnings = Vec::new();

    // In-batch suppression: exact composite-key repeats.
    let mut seen: HashSet<(NaiveDate, String, i64, i64, Option<String>)> = HashSet::new();
    let mut unique = Vec::with_capacity(mapped.len());
    for txn in mapped {
        let key = (
            txn.date,
            txn.description.clone(),
            opt_cents(txn.debit_amount),
            opt_cents(txn.credit_amount),
            txn.bank_reference.clone(),
        );
        if seen.insert(key) {
            unique.push(txn);
        } else {
            duplicate_warnings.push(DuplicateWarning {
                incoming: txn,
                existing_id: None,
                reason: "duplicate transaction (skipped)".into(),
            });
        }
    }

    // Cross-batch detection against the history window.
    let mut by_description: HashMap<(NaiveDate, i64, i64, String), &Transaction> = HashMap::new();
    let mut by_reference: HashMap<(NaiveDate, i64, i64, String), &Transaction> = HashMap::new();
    for txn in existing {
        by_description
            .entry((
                txn.date,
                opt_cents(txn.debit_amount),
                opt_cents(txn.credit_amount),
                description_key(&txn.description),
            ))
            .or_insert(txn);
        if let Some(reference) = non_empty(&txn.bank_reference) {
            by_reference
                .entry((
                    txn.date,
                    opt_cents(txn.debit_amount),
                    opt_cents(txn.credit_amount),
                    reference,
                ))
                .or_insert(txn);
        }
    }

    let mut insert_set = Vec::with_capacity(unique.len());
    for txn in unique {
        let amounts = (opt_cents(txn.debit_amount), opt_cents(txn.credit_amount));
        let desc_hit = by_description
            .get(&(txn.date, amounts.0, amounts.1, description_key(&txn.description)))
            .copied();
        let ref_hit = non_empty(&txn.bank_reference).and_then(|reference| {
            by_reference
                .get(&(txn.date, amounts.0, amounts.1, reference))
                .copied()
        });
        if let Some(hit) = desc_hit.or(ref_hit) {
            duplicate_warnings.push(DuplicateWarning {
                existing_id: Some(hit.id.clone()),
                reason: format!(
                    "matches previously imported transaction on {}",
                    hit.date.format("%Y-%m-%d")
                ),
                incoming: txn,
            });
        } else {
            insert_set.push(txn);
        }
    }

    insert_set.sort_by_key(|t| t.sequence);

    Resolution {
        insert_set,
        duplicate_warnings,
        out_of_range,
        detected_order,
    }
}

fn opt_cents(v: Option<f64>) -> i64 {
    v.map(|x| (x * 100.0).round() as i64).unwrap_or(-1)
}

fn description_key(description: &str) -> String {
    description
        .to_lowercase()
        .chars()
        .take(DESCRIPTION_KEY_LEN)
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
