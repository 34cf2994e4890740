use std::collections::HashSet;
use std::path::Path;

use crate::error::{BankbookError, Result};
use crate::mapper;
use crate::models::{CellValue, NormalizedTable, RawRow};

// ---------------------------------------------------------------------------
// File kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Xlsx,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(Self::Csv),
            "xlsx" | "xlsm" | "xls" => Ok(Self::Xlsx),
            other => Err(BankbookError::FileFormat(format!(
                "unsupported file extension: .{other} (expected .csv or .xlsx)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// normalize_file
// ---------------------------------------------------------------------------

/// Convert raw statement bytes into a uniform grid of headers + rows.
/// Merged cells are unmerged, text columns forward-filled, date cells pinned
/// to calendar days, and duplicate/blank headers replaced with placeholders.
pub fn normalize_file(bytes: &[u8], kind: FileKind) -> Result<NormalizedTable> {
    let grid = match kind {
        FileKind::Csv => read_csv_grid(bytes)?,
        #[cfg(feature = "xlsx")]
        FileKind::Xlsx => read_xlsx_grid(bytes)?,
        #[cfg(not(feature = "xlsx"))]
        FileKind::Xlsx => {
            return Err(BankbookError::FileFormat(
                "this build has no XLSX support (xlsx feature disabled)".into(),
            ))
        }
    };
    build_table(grid)
}

fn read_csv_grid(bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut grid = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row: Vec<CellValue> = record
            .iter()
            .map(|field| {
                let field = field.trim();
                if field.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        grid.push(row);
    }
    Ok(grid)
}

#[cfg(feature = "xlsx")]
fn read_xlsx_grid(bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    use calamine::{Data, Reader, Xlsx};

    let mut workbook = Xlsx::new(std::io::Cursor::new(bytes.to_vec()))?;
    workbook.load_merged_regions()?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| BankbookError::FileFormat("workbook has no sheets".into()))?;
    let range = workbook.worksheet_range(&sheet_name)?;
    if range.is_empty() {
        return Err(BankbookError::FileFormat(format!(
            "sheet '{sheet_name}' has no cells"
        )));
    }

    let (off_row, off_col) = range.start().unwrap_or((0, 0));
    let height = range.height();
    let width = range.width();

    let mut grid: Vec<Vec<CellValue>> = Vec::with_capacity(height);
    for row in range.rows() {
        grid.push(row.iter().map(cell_from_data).collect());
    }

    // Unmerge: the top-left value of a merged region applies to every cell
    // of the region.
    let regions: Vec<_> = workbook
        .merged_regions()
        .iter()
        .filter(|(name, _, _)| name == &sheet_name)
        .map(|(_, _, dims)| (dims.start, dims.end))
        .collect();
    for ((r0, c0), (r1, c1)) in regions {
        let anchor_r = (r0 as usize).saturating_sub(off_row as usize);
        let anchor_c = (c0 as usize).saturating_sub(off_col as usize);
        if anchor_r >= height || anchor_c >= width {
            continue;
        }
        let value = grid[anchor_r][anchor_c].clone();
        for r in r0..=r1 {
            for c in c0..=c1 {
                let gr = (r as usize).saturating_sub(off_row as usize);
                let gc = (c as usize).saturating_sub(off_col as usize);
                if gr < height && gc < width {
                    grid[gr][gc] = value.clone();
                }
            }
        }
    }

    Ok(grid)
}

#[cfg(feature = "xlsx")]
fn cell_from_data(data: &calamine::Data) -> CellValue {
    use calamine::Data;
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(s.to_string())
            }
        }
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        // Date cells become calendar days here, before anything downstream
        // can reinterpret them through a timezone.
        Data::DateTime(dt) => match mapper::excel_serial_to_date(dt.as_f64()) {
            Some(date) => CellValue::Date(date),
            None => CellValue::Empty,
        },
        Data::DateTimeIso(s) => match chrono::NaiveDate::parse_from_str(&s[..s.len().min(10)], "%Y-%m-%d") {
            Ok(date) => CellValue::Date(date),
            Err(_) => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Empty,
    }
}

// ---------------------------------------------------------------------------
// Grid cleaning
// ---------------------------------------------------------------------------

fn build_table(grid: Vec<Vec<CellValue>>) -> Result<NormalizedTable> {
    // Empty rows are judged right after unmerge, before forward-fill.
    let mut grid: Vec<Vec<CellValue>> = grid
        .into_iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();
    if grid.is_empty() {
        return Err(BankbookError::FileFormat(
            "file has no data rows after cleaning".into(),
        ));
    }

    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, CellValue::Empty);
    }

    let header_idx = detect_header_row(&grid);
    forward_fill_text_columns(&mut grid, header_idx);

    let headers = unique_headers(&grid[header_idx], width);
    let rows: Vec<RawRow> = grid
        .into_iter()
        .skip(header_idx + 1)
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .map(|row| RawRow {
            cells: headers.iter().cloned().zip(row).collect(),
        })
        .collect();

    if rows.is_empty() {
        return Err(BankbookError::FileFormat(
            "no transaction rows found below the header".into(),
        ));
    }

    Ok(NormalizedTable { headers, rows })
}

/// The header is the first non-empty row unless a better candidate exists:
/// the row with the highest fraction of non-empty, non-numeric cells that is
/// immediately followed by rows of consistent column count.
fn detect_header_row(grid: &[Vec<CellValue>]) -> usize {
    let scan = grid.len().min(20);
    let mut best = 0;
    let mut best_score = header_score(grid, 0);
    for idx in 1..scan {
        let score = header_score(grid, idx);
        if score > best_score + 1e-9 {
            best = idx;
            best_score = score;
        }
    }
    best
}

fn header_score(grid: &[Vec<CellValue>], idx: usize) -> f64 {
    let row = &grid[idx];
    let width = row.len();
    if width == 0 {
        return 0.0;
    }
    let texty = row
        .iter()
        .filter(|c| match c {
            CellValue::Text(s) => mapper::parse_amount(s).is_none(),
            _ => false,
        })
        .count();
    let fraction = texty as f64 / width as f64;

    let populated = row.iter().filter(|c| !c.is_empty()).count();
    let mut consistent = 0usize;
    for next in grid.iter().skip(idx + 1).take(3) {
        let next_populated = next.iter().filter(|c| !c.is_empty()).count();
        if next_populated + 1 >= populated {
            consistent += 1;
        }
    }
    fraction * (1.0 + 0.1 * consistent as f64)
}

/// Forward-fill only text-typed columns; amounts must never inherit a value
/// from the row above.
fn forward_fill_text_columns(grid: &mut [Vec<CellValue>], header_idx: usize) {
    if grid.len() <= header_idx + 1 {
        return;
    }
    let width = grid[header_idx].len();
    for col in 0..width {
        let mut text_cells = 0usize;
        let mut non_empty = 0usize;
        for row in grid.iter().skip(header_idx + 1) {
            match &row[col] {
                CellValue::Text(s) if mapper::parse_amount(s).is_none() => {
                    text_cells += 1;
                    non_empty += 1;
                }
                CellValue::Empty => {}
                _ => non_empty += 1,
            }
        }
        if non_empty == 0 || text_cells * 2 <= non_empty {
            continue;
        }
        let mut last: Option<CellValue> = None;
        for row in grid.iter_mut().skip(header_idx + 1) {
            if row[col].is_empty() {
                if let Some(v) = &last {
                    row[col] = v.clone();
                }
            } else {
                last = Some(row[col].clone());
            }
        }
    }
}

fn unique_headers(header_row: &[CellValue], width: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(width);
    for (i, cell) in header_row.iter().enumerate() {
        let raw = cell.to_display().trim().to_string();
        let mut name = if raw.is_empty() || seen.contains(&raw) {
            format!("Column {}", i + 1)
        } else {
            raw
        };
        while seen.contains(&name) {
            name.push('_');
        }
        seen.insert(name.clone());
        headers.push(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn csv_table(content: &str) -> NormalizedTable {
        normalize_file(content.as_bytes(), FileKind::Csv).unwrap()
    }

    #[test]
    fn test_file_kind_from_path() {
        assert_eq!(FileKind::from_path(Path::new("a.csv")).unwrap(), FileKind::Csv);
        assert_eq!(FileKind::from_path(Path::new("a.XLSX")).unwrap(), FileKind::Xlsx);
        assert!(FileKind::from_path(Path::new("a.pdf")).is_err());
    }

    #[test]
    fn test_simple_csv() {
        let table = csv_table("Date,Description,Amount\n25/12/2024,COFFEE,100\n");
        assert_eq!(table.headers, vec!["Date", "Description", "Amount"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(
            table.rows[0].get("Description"),
            Some(&CellValue::Text("COFFEE".into()))
        );
    }

    #[test]
    fn test_header_detection_skips_preamble() {
        let content = "\
Account Name: Acme Checking,,
Statement Period: December 2024,,

Date,Description,Amount
25/12/2024,COFFEE,100.00
26/12/2024,SUPPLIES,50.00
";
        let table = csv_table(content);
        assert_eq!(table.headers, vec!["Date", "Description", "Amount"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_blank_and_duplicate_headers_collapse() {
        let table = csv_table("Date,,Amount,Amount\n25/12/2024,x,1.00,2.00\n");
        assert_eq!(
            table.headers,
            vec!["Date", "Column 2", "Amount", "Column 4"]
        );
    }

    #[test]
    fn test_empty_rows_dropped() {
        let table = csv_table("Date,Amount\n,,\n25/12/2024,100\n,,\n");
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_empty_file_is_fatal() {
        let err = normalize_file(b"", FileKind::Csv).unwrap_err();
        assert!(matches!(err, BankbookError::FileFormat(_)));
    }

    #[test]
    fn test_header_only_file_is_fatal() {
        let err = normalize_file(b"Date,Amount\n", FileKind::Csv).unwrap_err();
        assert!(matches!(err, BankbookError::FileFormat(_)));
    }

    #[test]
    fn test_forward_fill_text_columns_only() {
        // Branch repeats via merge-like blanks; Amount must stay untouched.
        let mut grid = vec![
            vec![
                CellValue::Text("Branch".into()),
                CellValue::Text("Amount".into()),
            ],
            vec![CellValue::Text("Downtown".into()), CellValue::Number(10.0)],
            vec![CellValue::Empty, CellValue::Empty],
        ];
        forward_fill_text_columns(&mut grid, 0);
        assert_eq!(grid[2][0], CellValue::Text("Downtown".into()));
        assert_eq!(grid[2][1], CellValue::Empty);
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let table = csv_table("Date,Description,Amount\n25/12/2024,COFFEE\n");
        assert_eq!(table.rows[0].cells.len(), 3);
        assert_eq!(table.rows[0].get("Amount"), Some(&CellValue::Empty));
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_cell_from_data_dates() {
        use calamine::Data;
        let cell = cell_from_data(&Data::DateTimeIso("2025-01-10T00:00:00".into()));
        assert_eq!(
            cell,
            CellValue::Date(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap())
        );
    }

    #[test]
    fn test_date_cells_render_timezone_free() {
        let d = CellValue::Date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap());
        assert_eq!(d.to_display(), "2024-12-25");
    }
}
