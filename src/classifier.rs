use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::mapper::{self, DATE_FORMATS};
use crate::models::{CellValue, ColumnMapping, ColumnRole, NormalizedTable};

/// Rows sampled per column when guessing roles.
pub const SAMPLE_ROWS: usize = 20;

/// Detections below this confidence are not auto-accepted; the user has to
/// confirm them.
pub const AUTO_ACCEPT_CONFIDENCE: f64 = 0.5;

/// A date-format guess. Heuristic, so the format travels with its confidence
/// and the caller decides whether to trust it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFormat {
    pub format: &'static str,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ColumnDetection {
    pub source_column: String,
    pub suggested_role: ColumnRole,
    pub confidence: f64,
    pub sample_values: Vec<String>,
    pub date_format: Option<&'static str>,
}

/// Advisory classification of every column. Never fails, never blocks:
/// ambiguity only lowers confidence.
pub fn classify_columns(table: &NormalizedTable) -> Vec<ColumnDetection> {
    let reference_shape = Regex::new(r"^[A-Za-z0-9./-]{4,24}$").unwrap();

    table
        .headers
        .iter()
        .enumerate()
        .map(|(col, header)| classify_column(table, col, header, &reference_shape))
        .collect()
}

fn classify_column(
    table: &NormalizedTable,
    col: usize,
    header: &str,
    reference_shape: &Regex,
) -> ColumnDetection {
    let samples: Vec<&CellValue> = table
        .rows
        .iter()
        .take(SAMPLE_ROWS)
        .filter_map(|row| row.cells.get(col).map(|(_, v)| v))
        .filter(|v| !v.is_empty())
        .collect();
    let display: Vec<String> = samples.iter().map(|v| v.to_display()).collect();
    let header_lower = header.to_lowercase();

    if samples.is_empty() {
        return detection(header, ColumnRole::Ignore, 0.0, display, None);
    }

    // Dates first: >80% of samples parseable as a date under any format.
    let date_hits = samples
        .iter()
        .filter(|v| match v {
            CellValue::Date(_) => true,
            CellValue::Text(s) => mapper::parse_date_str(s, None).is_some(),
            _ => false,
        })
        .count();
    let date_fraction = date_hits as f64 / samples.len() as f64;
    if date_fraction > 0.8 {
        let texts: Vec<&str> = samples
            .iter()
            .filter_map(|v| match v {
                CellValue::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        let format = detect_date_format(&texts);
        return detection(
            header,
            ColumnRole::Date,
            date_fraction,
            display,
            format.map(|f| f.format),
        );
    }

    let numeric_hits = display
        .iter()
        .filter(|s| mapper::parse_amount(s).is_some())
        .count();
    let all_numeric = numeric_hits == samples.len();
    let non_negative = display
        .iter()
        .filter_map(|s| mapper::parse_amount(s))
        .all(|v| v >= 0.0);

    if all_numeric {
        if header_matches(&header_lower, &["debit", "nợ", "withdrawal", "paid out", "dr"]) {
            let conf = if non_negative { 0.9 } else { 0.7 };
            return detection(header, ColumnRole::Debit, conf, display, None);
        }
        if header_matches(&header_lower, &["credit", "có", "deposit", "paid in", "cr"]) {
            let conf = if non_negative { 0.9 } else { 0.7 };
            return detection(header, ColumnRole::Credit, conf, display, None);
        }
        if header_matches(&header_lower, &["balance", "số dư", "bal"]) {
            return detection(header, ColumnRole::Balance, 0.85, display, None);
        }
        if header_matches(&header_lower, &["amount", "amt", "value", "số tiền"]) {
            return detection(header, ColumnRole::SignedAmount, 0.8, display, None);
        }
        // Mixed signs with no header hint still smells like a signed amount;
        // an unlabeled non-negative column could as easily be a balance, so
        // it lands below the auto-accept line.
        let conf = if non_negative { 0.4 } else { 0.6 };
        return detection(header, ColumnRole::SignedAmount, conf, display, None);
    }

    if header_matches(&header_lower, &["branch", "chi nhánh", "office"]) {
        return detection(header, ColumnRole::Branch, 0.8, display, None);
    }

    let reference_like = display.iter().all(|s| reference_shape.is_match(s));
    let distinct: HashSet<&str> = display.iter().map(|s| s.as_str()).collect();
    let distinct_ratio = distinct.len() as f64 / display.len() as f64;
    if header_matches(&header_lower, &["ref", "reference", "txn", "transaction id", "mã"]) {
        let conf = if reference_like && distinct_ratio > 0.9 { 0.9 } else { 0.6 };
        return detection(header, ColumnRole::Reference, conf, display, None);
    }
    if reference_like && distinct_ratio > 0.9 {
        return detection(header, ColumnRole::Reference, 0.75, display, None);
    }

    if header_matches(
        &header_lower,
        &[
            "description",
            "desc",
            "memo",
            "narration",
            "details",
            "diễn giải",
            "content",
            "payee",
            "remark",
        ],
    ) {
        return detection(header, ColumnRole::Description, 0.9, display, None);
    }
    let avg_len =
        display.iter().map(|s| s.chars().count()).sum::<usize>() as f64 / display.len() as f64;
    if avg_len > 12.0 {
        return detection(header, ColumnRole::Description, 0.5, display, None);
    }

    detection(header, ColumnRole::Ignore, 0.2, display, None)
}

fn detection(
    header: &str,
    role: ColumnRole,
    confidence: f64,
    sample_values: Vec<String>,
    date_format: Option<&'static str>,
) -> ColumnDetection {
    ColumnDetection {
        source_column: header.to_string(),
        suggested_role: role,
        confidence,
        sample_values,
        date_format,
    }
}

fn header_matches(header_lower: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| header_lower.contains(p))
}

/// Try each supported format against every sample; the first format that
/// parses all of them wins. The list is ordered so day-first wins ties.
/// With no unanimous format the best partial fit is returned with its hit
/// fraction as confidence.
pub fn detect_date_format(samples: &[&str]) -> Option<DetectedFormat> {
    if samples.is_empty() {
        return None;
    }
    let mut best: Option<DetectedFormat> = None;
    for &format in DATE_FORMATS {
        let hits = samples
            .iter()
            .filter(|s| mapper::parse_date_with_format(s, format).is_some())
            .count();
        if hits == samples.len() {
            return Some(DetectedFormat {
                format,
                confidence: 1.0,
            });
        }
        let confidence = hits as f64 / samples.len() as f64;
        if confidence > best.map(|b| b.confidence).unwrap_or(0.0) {
            best = Some(DetectedFormat { format, confidence });
        }
    }
    best.filter(|b| b.confidence > 0.0)
}

/// Build a mapping from detections: best column per role, auto-accepting only
/// confident suggestions. Advisory — the CLI lets the user override any of it.
pub fn auto_mappings(detections: &[ColumnDetection]) -> Vec<ColumnMapping> {
    let mut best: HashMap<&'static str, &ColumnDetection> = HashMap::new();
    for d in detections {
        if d.suggested_role == ColumnRole::Ignore || d.confidence < AUTO_ACCEPT_CONFIDENCE {
            continue;
        }
        let slot = best.entry(d.suggested_role.as_str()).or_insert(d);
        if d.confidence > slot.confidence {
            *slot = d;
        }
    }
    let mut mappings: Vec<ColumnMapping> = best
        .values()
        .map(|d| ColumnMapping {
            source_column: d.source_column.clone(),
            role: d.suggested_role,
            date_format: d.date_format.map(|f| f.to_string()),
            negative_debits: None,
        })
        .collect();
    mappings.sort_by(|a, b| a.source_column.cmp(&b.source_column));
    mappings
}
