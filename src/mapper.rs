use chrono::NaiveDate;

use crate::error::{BankbookError, Result};
use crate::models::{CellValue, ColumnMapping, ColumnRole, RawRow, RowError, Transaction};

/// Supported statement date formats, day-first formats ahead of month-first
/// so ambiguous values resolve to the regionally likely reading.
pub const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y-%m-%d",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d %b %Y",
];

/// Roles are applied in this fixed order regardless of file column order.
const ROLE_ORDER: &[ColumnRole] = &[
    ColumnRole::Date,
    ColumnRole::Description,
    ColumnRole::Debit,
    ColumnRole::Credit,
    ColumnRole::SignedAmount,
    ColumnRole::Balance,
    ColumnRole::Reference,
    ColumnRole::Branch,
];

#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    /// Fallback date format when a mapping carries none.
    pub date_format: Option<String>,
    /// For a single signed-amount column: negative values are debits.
    pub negative_debits: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub account_id: i64,
    pub batch_id: &'a str,
    pub row_index: usize,
    pub source_file: &'a str,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse a raw amount string: strips commas, quotes and currency markers,
/// accepts parenthesized negatives. None when nothing numeric remains.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v);
    }
    s.parse().ok()
}

/// Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug).
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(chrono::Duration::days(serial as i64))
}

/// Drop a trailing clock component; statements sometimes embed one
/// ("25/12/2024 14:30:05", "2024-12-25T09:00").
fn strip_time_component(raw: &str) -> String {
    let cleaned = raw.replace('T', " ");
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        let t = last.trim_end_matches('Z');
        if t.contains(':') || t.eq_ignore_ascii_case("am") || t.eq_ignore_ascii_case("pm") {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

pub fn parse_date_with_format(raw: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&strip_time_component(raw), format).ok()
}

/// Parse a date string, trying the preferred format first and then every
/// supported format in order.
pub fn parse_date_str(raw: &str, preferred: Option<&str>) -> Option<NaiveDate> {
    let cleaned = strip_time_component(raw);
    if cleaned.is_empty() {
        return None;
    }
    if let Some(fmt) = preferred {
        if let Ok(d) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return Some(d);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

fn parse_date_cell(cell: &CellValue, format: Option<&str>) -> Option<NaiveDate> {
    match cell {
        CellValue::Date(d) => Some(*d),
        CellValue::Text(s) => parse_date_str(s, format),
        // An unformatted Excel date cell surfaces as a bare serial number.
        CellValue::Number(n) if (20000.0..80000.0).contains(n) => excel_serial_to_date(*n),
        _ => None,
    }
}

fn parse_amount_cell(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) => Some(*n),
        CellValue::Text(s) => parse_amount(s),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Mapping validation
// ---------------------------------------------------------------------------

/// An import cannot proceed without exactly one date column and at least one
/// amount-bearing column.
pub fn validate_mappings(mappings: &[ColumnMapping]) -> Result<()> {
    let dates = mappings
        .iter()
        .filter(|m| m.role == ColumnRole::Date)
        .count();
    if dates != 1 {
        return Err(BankbookError::FileFormat(format!(
            "mapping must include exactly one date column (found {dates})"
        )));
    }
    let amounts = mappings
        .iter()
        .filter(|m| {
            matches!(
                m.role,
                ColumnRole::Debit | ColumnRole::Credit | ColumnRole::SignedAmount
            )
        })
        .count();
    if amounts == 0 {
        return Err(BankbookError::FileFormat(
            "mapping must include a debit, credit, or signed amount column".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// map_row
// ---------------------------------------------------------------------------

/// Apply a confirmed column mapping to one normalized row. Failures are
/// row-local: the caller collects them and the batch continues.
pub fn map_row(
    row: &RawRow,
    mappings: &[ColumnMapping],
    options: &MapOptions,
    ctx: &RowContext,
) -> std::result::Result<Transaction, RowError> {
    let mut date: Option<NaiveDate> = None;
    let mut description = String::new();
    let mut debit: Option<f64> = None;
    let mut credit: Option<f64> = None;
    let mut balance: Option<f64> = None;
    let mut bank_reference: Option<String> = None;
    let mut branch: Option<String> = None;

    for role in ROLE_ORDER {
        for mapping in mappings.iter().filter(|m| m.role == *role) {
            let Some(cell) = row.get(&mapping.source_column) else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            match role {
                ColumnRole::Date => {
                    let format = mapping
                        .date_format
                        .as_deref()
                        .or(options.date_format.as_deref());
                    match parse_date_cell(cell, format) {
                        Some(d) => date = Some(d),
                        None => {
                            return Err(row_error(
                                ctx,
                                format!("unparseable date: {}", cell.to_display()),
                            ))
                        }
                    }
                }
                ColumnRole::Description => {
                    let text = cell.to_display().trim().to_string();
                    if !text.is_empty() {
                        if description.is_empty() {
                            description = text;
                        } else {
                            // Multiple description columns concatenate.
                            description.push_str(" | ");
                            description.push_str(&text);
                        }
                    }
                }
                ColumnRole::Debit => match parse_amount_cell(cell) {
                    // Zero means absent, not a zero-value transaction; some
                    // exports encode debits as negatives, so keep magnitude.
                    Some(v) if v != 0.0 => debit = Some(v.abs()),
                    Some(_) => {}
                    None => {
                        return Err(row_error(
                            ctx,
                            format!("unparseable debit amount: {}", cell.to_display()),
                        ))
                    }
                },
                ColumnRole::Credit => match parse_amount_cell(cell) {
                    Some(v) if v != 0.0 => credit = Some(v.abs()),
                    Some(_) => {}
                    None => {
                        return Err(row_error(
                            ctx,
                            format!("unparseable credit amount: {}", cell.to_display()),
                        ))
                    }
                },
                ColumnRole::SignedAmount => match parse_amount_cell(cell) {
                    Some(v) if v != 0.0 => {
                        let negative_is_debit =
                            mapping.negative_debits.unwrap_or(options.negative_debits);
                        let is_debit = (v < 0.0) == negative_is_debit;
                        if is_debit {
                            debit = Some(v.abs());
                        } else {
                            credit = Some(v.abs());
                        }
                    }
                    Some(_) => {}
                    None => {
                        return Err(row_error(
                            ctx,
                            format!("unparseable amount: {}", cell.to_display()),
                        ))
                    }
                },
                ColumnRole::Balance => {
                    balance = parse_amount_cell(cell);
                }
                ColumnRole::Reference => {
                    let text = cell.to_display().trim().to_string();
                    if !text.is_empty() {
                        bank_reference = Some(text);
                    }
                }
                ColumnRole::Branch => {
                    let text = cell.to_display().trim().to_string();
                    if !text.is_empty() {
                        branch = Some(text);
                    }
                }
                ColumnRole::Ignore => {}
            }
        }
    }

    let Some(date) = date else {
        return Err(row_error(ctx, "missing or empty date".to_string()));
    };
    if debit.is_none() && credit.is_none() {
        return Err(row_error(
            ctx,
            "row has neither a debit nor a credit amount".to_string(),
        ));
    }

    Ok(Transaction {
        id: synthetic_id(ctx.batch_id, ctx.row_index),
        account_id: ctx.account_id,
        date,
        description,
        debit_amount: debit,
        credit_amount: credit,
        balance,
        bank_reference,
        branch,
        // File order; the resolver corrects this when the file runs
        // newest-first.
        sequence: ctx.row_index as i64 + 1,
        is_balance_adjustment: false,
        checkpoint_id: None,
        batch_id: Some(ctx.batch_id.to_string()),
        source_file: Some(ctx.source_file.to_string()),
    })
}

fn row_error(ctx: &RowContext, message: String) -> RowError {
    RowError {
        row: ctx.row_index,
        message,
    }
}

/// Collision-free without a database round trip: batch id + row index are
/// unique within a batch, the timestamp nonce separates batches that might
/// share an id prefix.
fn synthetic_id(batch_id: &str, row_index: usize) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let salt: u16 = rand::random();
    format!("{batch_id}-r{row_index}-{millis:x}{salt:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: Vec<(&str, CellValue)>) -> RawRow {
        RawRow {
            cells: cells
                .into_iter()
                .map(|(h, v)| (h.to_string(), v))
                .collect(),
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn ctx() -> RowContext<'static> {
        RowContext {
            account_id: 1,
            batch_id: "imp-test",
            row_index: 0,
            source_file: "stmt.csv",
        }
    }

    fn base_mappings() -> Vec<ColumnMapping> {
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

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("\"500.00\""), Some(500.0));
        assert_eq!(parse_amount("  -42.50  "), Some(-42.5));
        assert_eq!(parse_amount("(500.00)"), Some(-500.0));
        assert_eq!(parse_amount("$1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("100,000"), Some(100000.0));
        assert_eq!(parse_amount("not_a_number"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_date_strips_time() {
        assert_eq!(
            parse_date_str("25/12/2024 14:30:05", Some("%d/%m/%Y")),
            NaiveDate::from_ymd_opt(2024, 12, 25)
        );
        assert_eq!(
            parse_date_str("2024-12-25T09:00:00Z", None),
            NaiveDate::from_ymd_opt(2024, 12, 25)
        );
        assert_eq!(
            parse_date_str("25 Dec 2024", None),
            NaiveDate::from_ymd_opt(2024, 12, 25)
        );
    }

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(
            excel_serial_to_date(45667.0),
            NaiveDate::from_ymd_opt(2025, 1, 10)
        );
    }

    #[test]
    fn test_map_row_basic_debit() {
        let r = row(vec![
            ("Date", text("25/12/2024")),
            ("Description", text("COFFEE")),
            ("Debit", text("100,000")),
            ("Credit", CellValue::Empty),
        ]);
        let txn = map_row(&r, &base_mappings(), &MapOptions::default(), &ctx()).unwrap();
        assert_eq!(txn.date, NaiveDate::from_ymd_opt(2024, 12, 25).unwrap());
        assert_eq!(txn.debit_amount, Some(100000.0));
        assert_eq!(txn.credit_amount, None);
        assert_eq!(txn.sequence, 1);
        assert!(txn.id.starts_with("imp-test-r0-"));
    }

    #[test]
    fn test_zero_amount_is_absent() {
        let r = row(vec![
            ("Date", text("25/12/2024")),
            ("Description", text("X")),
            ("Debit", text("0.00")),
            ("Credit", CellValue::Empty),
        ]);
        let err = map_row(&r, &base_mappings(), &MapOptions::default(), &ctx()).unwrap_err();
        assert!(err.message.contains("neither a debit nor a credit"));
    }

    #[test]
    fn test_negative_debit_coerced_positive() {
        let r = row(vec![
            ("Date", text("25/12/2024")),
            ("Description", text("X")),
            ("Debit", text("-50.00")),
            ("Credit", CellValue::Empty),
        ]);
        let txn = map_row(&r, &base_mappings(), &MapOptions::default(), &ctx()).unwrap();
        assert_eq!(txn.debit_amount, Some(50.0));
    }

    #[test]
    fn test_signed_amount_split_negative_debits() {
        let mappings = vec![
            ColumnMapping {
                source_column: "Date".into(),
                role: ColumnRole::Date,
                date_format: Some("%d/%m/%Y".into()),
                negative_debits: None,
            },
            ColumnMapping::new("Amount", ColumnRole::SignedAmount),
        ];
        let options = MapOptions {
            date_format: None,
            negative_debits: true,
        };
        let r = row(vec![("Date", text("25/12/2024")), ("Amount", text("-75.00"))]);
        let txn = map_row(&r, &mappings, &options, &ctx()).unwrap();
        assert_eq!(txn.debit_amount, Some(75.0));
        assert_eq!(txn.credit_amount, None);

        let r = row(vec![("Date", text("25/12/2024")), ("Amount", text("120.00"))]);
        let txn = map_row(&r, &mappings, &options, &ctx()).unwrap();
        assert_eq!(txn.credit_amount, Some(120.0));
    }

    #[test]
    fn test_signed_amount_split_flipped() {
        // negative_debits = false means the opposite: positives are debits.
        let mappings = vec![
            ColumnMapping {
                source_column: "Date".into(),
                role: ColumnRole::Date,
                date_format: Some("%d/%m/%Y".into()),
                negative_debits: None,
            },
            ColumnMapping::new("Amount", ColumnRole::SignedAmount),
        ];
        let options = MapOptions {
            date_format: None,
            negative_debits: false,
        };
        let r = row(vec![("Date", text("25/12/2024")), ("Amount", text("120.00"))]);
        let txn = map_row(&r, &mappings, &options, &ctx()).unwrap();
        assert_eq!(txn.debit_amount, Some(120.0));
    }

    #[test]
    fn test_unparseable_date_is_row_error() {
        let r = row(vec![
            ("Date", text("31/13/2024")),
            ("Description", text("X")),
            ("Debit", text("10.00")),
            ("Credit", CellValue::Empty),
        ]);
        let err = map_row(&r, &base_mappings(), &MapOptions::default(), &ctx()).unwrap_err();
        assert!(err.message.contains("unparseable date"));
        assert_eq!(err.row, 0);
    }

    #[test]
    fn test_missing_date_is_row_error() {
        let r = row(vec![
            ("Date", CellValue::Empty),
            ("Description", text("X")),
            ("Debit", text("10.00")),
            ("Credit", CellValue::Empty),
        ]);
        let err = map_row(&r, &base_mappings(), &MapOptions::default(), &ctx()).unwrap_err();
        assert!(err.message.contains("missing or empty date"));
    }

    #[test]
    fn test_reference_and_branch_captured() {
        let mut mappings = base_mappings();
        mappings.push(ColumnMapping::new("Ref", ColumnRole::Reference));
        mappings.push(ColumnMapping::new("Branch", ColumnRole::Branch));
        let r = row(vec![
            ("Date", text("25/12/2024")),
            ("Description", text("X")),
            ("Debit", text("10.00")),
            ("Credit", CellValue::Empty),
            ("Ref", text("FT2412250001")),
            ("Branch", text("Downtown")),
        ]);
        let txn = map_row(&r, &mappings, &MapOptions::default(), &ctx()).unwrap();
        assert_eq!(txn.bank_reference.as_deref(), Some("FT2412250001"));
        assert_eq!(txn.branch.as_deref(), Some("Downtown"));
    }

    #[test]
    fn test_validate_mappings() {
        assert!(validate_mappings(&base_mappings()).is_ok());

        let no_date = vec![ColumnMapping::new("Debit", ColumnRole::Debit)];
        assert!(validate_mappings(&no_date).is_err());

        let no_amount = vec![ColumnMapping::new("Date", ColumnRole::Date)];
        assert!(validate_mappings(&no_amount).is_err());

        let two_dates = vec![
            ColumnMapping::new("Date", ColumnRole::Date),
            ColumnMapping::new("Posted", ColumnRole::Date),
            ColumnMapping::new("Debit", ColumnRole::Debit),
        ];
        assert!(validate_mappings(&two_dates).is_err());
    }

    #[test]
    fn test_synthetic_ids_are_distinct() {
        let a = synthetic_id("imp-1", 0);
        let b = synthetic_id("imp-1", 1);
        assert_ne!(a, b);
        assert!(a.starts_with("imp-1-r0-"));
    }
}
