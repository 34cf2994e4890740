use comfy_table::{Cell, Table};
use rusqlite::{Connection, OptionalExtension};

use crate::cli::MappingArgs;
use crate::db::get_connection;
use crate::error::{BankbookError, Result};
use crate::mapper::MapOptions;
use crate::models::ColumnMapping;
use crate::settings::db_path;

pub fn save(name: &str, mapping: &MappingArgs) -> Result<()> {
    let mappings = mapping.to_mappings();
    if mappings.is_empty() {
        return Err(BankbookError::Other(
            "profile needs at least one column flag (e.g. --date-col)".into(),
        ));
    }
    let json = serde_json::to_string(&mappings)
        .map_err(|e| BankbookError::Other(format!("could not encode profile: {e}")))?;
    let conn = get_connection(&db_path())?;
    conn.execute(
        "INSERT INTO mapping_profiles (name, mappings, date_format, negative_debits) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(name) DO UPDATE SET mappings = excluded.mappings, \
         date_format = excluded.date_format, negative_debits = excluded.negative_debits",
        rusqlite::params![
            name,
            json,
            mapping.date_format,
            !mapping.debits_positive as i64
        ],
    )?;
    println!("Saved profile: {name}");
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let mut stmt =
        conn.prepare("SELECT name, mappings, date_format FROM mapping_profiles ORDER BY name")?;
    let rows: Vec<(String, String, Option<String>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["Name", "Columns", "Date format"]);
    for (name, json, date_format) in rows {
        let mappings: Vec<ColumnMapping> = serde_json::from_str(&json).unwrap_or_default();
        let columns = mappings
            .iter()
            .map(|m| format!("{}={}", m.role.as_str(), m.source_column))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(name),
            Cell::new(columns),
            Cell::new(date_format.unwrap_or_default()),
        ]);
    }
    println!("Mapping profiles\n{table}");
    Ok(())
}

/// Load a saved profile as (mappings, options) for the importer.
pub fn load(conn: &Connection, name: &str) -> Result<(Vec<ColumnMapping>, MapOptions)> {
    let row: Option<(String, Option<String>, i64)> = conn
        .query_row(
            "SELECT mappings, date_format, negative_debits FROM mapping_profiles WHERE name = ?1",
            [name],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((json, date_format, negative_debits)) = row else {
        return Err(BankbookError::UnknownProfile(name.to_string()));
    };
    let mappings: Vec<ColumnMapping> = serde_json::from_str(&json)
        .map_err(|e| BankbookError::Other(format!("corrupt profile '{name}': {e}")))?;
    Ok((
        mappings,
        MapOptions {
            date_format,
            negative_debits: negative_debits != 0,
        },
    ))
}
