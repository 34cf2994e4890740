use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::error::Result;
use crate::settings::db_path;

pub fn list() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let mut stmt = conn.prepare(
        "SELECT b.id, a.name, b.file_name, b.created_at, b.total_rows, b.successful_count, \
         b.failed_count, b.status FROM import_batches b \
         JOIN accounts a ON a.id = b.account_id ORDER BY b.created_at DESC",
    )?;
    let rows: Vec<(String, String, String, String, i64, i64, i64, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec![
        "Batch", "Account", "File", "Imported at", "Rows", "OK", "Errors", "Status",
    ]);
    for (id, account, file, created_at, total, ok, failed, status) in rows {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(account),
            Cell::new(file),
            Cell::new(created_at),
            Cell::new(total),
            Cell::new(ok),
            Cell::new(failed),
            Cell::new(status),
        ]);
    }
    println!("Import batches\n{table}");
    Ok(())
}
