use std::path::PathBuf;

use comfy_table::{Cell, Table};

use crate::classifier::classify_columns;
use crate::error::Result;
use crate::normalizer::{normalize_file, FileKind};

pub fn run(file: &str) -> Result<()> {
    let path = PathBuf::from(file);
    let bytes = std::fs::read(&path)?;
    let kind = FileKind::from_path(&path)?;
    let table_data = normalize_file(&bytes, kind)?;
    let detections = classify_columns(&table_data);

    let mut table = Table::new();
    table.set_header(vec!["Column", "Suggested role", "Confidence", "Date format", "Samples"]);
    for d in &detections {
        let samples = d
            .sample_values
            .iter()
            .take(3)
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(&d.source_column),
            Cell::new(d.suggested_role.as_str()),
            Cell::new(format!("{:.0}%", d.confidence * 100.0)),
            Cell::new(d.date_format.unwrap_or("")),
            Cell::new(samples),
        ]);
    }
    println!(
        "{} rows, {} columns\n{table}",
        table_data.rows.len(),
        table_data.headers.len()
    );
    println!("Suggestions only: confirm or override with --date-col/--debit-col/... on import.");
    Ok(())
}
