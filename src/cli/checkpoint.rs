use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};
use rusqlite::OptionalExtension;

use crate::checkpoint::{create_or_update_checkpoint, delete_checkpoint, list_checkpoints, CheckpointInput};
use crate::db::get_connection;
use crate::error::{BankbookError, Result};
use crate::fmt::{money, signed_money};
use crate::settings::db_path;

pub fn set(account: &str, date: &str, balance: f64, notes: Option<&str>) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let account_id = account_id_by_name(&conn, account)?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| BankbookError::Other(format!("invalid date '{date}' (expected YYYY-MM-DD)")))?;

    let outcome = create_or_update_checkpoint(
        &conn,
        &CheckpointInput {
            account_id,
            date,
            declared_balance: balance,
            notes,
            batch_id: None,
        },
    )?;

    let cp = &outcome.checkpoint;
    if cp.is_reconciled {
        println!(
            "{} {} reconciled at {}",
            "OK".green(),
            cp.date_str(),
            money(cp.calculated_balance)
        );
    } else {
        println!(
            "{} {}: declared {} vs calculated {}, adjustment {} recorded",
            "MISMATCH".yellow(),
            cp.date_str(),
            money(cp.declared_balance),
            money(cp.calculated_balance),
            signed_money(cp.adjustment_amount)
        );
    }
    println!("{}", outcome.message);
    Ok(())
}

pub fn list(account: &str) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let account_id = account_id_by_name(&conn, account)?;
    let checkpoints = list_checkpoints(&conn, account_id)?;

    let mut table = Table::new();
    table.set_header(vec![
        "ID",
        "Date",
        "Declared",
        "Calculated",
        "Adjustment",
        "Reconciled",
        "Batch",
    ]);
    for cp in checkpoints {
        table.add_row(vec![
            Cell::new(cp.id),
            Cell::new(cp.date_str()),
            Cell::new(money(cp.declared_balance)),
            Cell::new(money(cp.calculated_balance)),
            Cell::new(signed_money(cp.adjustment_amount)),
            Cell::new(if cp.is_reconciled { "yes" } else { "no" }),
            Cell::new(cp.batch_id.unwrap_or_default()),
        ]);
    }
    println!("Checkpoints for {account}\n{table}");
    Ok(())
}

pub fn delete(id: i64) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let outcome = delete_checkpoint(&conn, id)?;
    println!(
        "Deleted checkpoint {id}; {} later checkpoint(s) recalculated",
        outcome.recalculated
    );
    Ok(())
}

fn account_id_by_name(conn: &rusqlite::Connection, name: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM accounts WHERE name = ?1", [name], |r| r.get(0))
        .optional()?
        .ok_or_else(|| BankbookError::UnknownAccount(name.to_string()))
}
