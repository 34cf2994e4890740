use crate::db::get_connection;
use crate::error::Result;
use crate::settings::db_path;

pub fn run() -> Result<()> {
    let path = db_path();
    let conn = get_connection(&path)?;

    let accounts: i64 = conn.query_row("SELECT count(*) FROM accounts", [], |r| r.get(0))?;
    let transactions: i64 =
        conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0))?;
    let adjustments: i64 = conn.query_row(
        "SELECT count(*) FROM transactions WHERE is_balance_adjustment = 1",
        [],
        |r| r.get(0),
    )?;
    let batches: i64 = conn.query_row("SELECT count(*) FROM import_batches", [], |r| r.get(0))?;
    let checkpoints: i64 = conn.query_row(
        "SELECT count(*) FROM balance_checkpoints",
        [],
        |r| r.get(0),
    )?;
    let unreconciled: i64 = conn.query_row(
        "SELECT count(*) FROM balance_checkpoints WHERE is_reconciled = 0",
        [],
        |r| r.get(0),
    )?;

    println!("Database: {}", path.display());
    println!("Accounts:      {accounts}");
    println!("Transactions:  {transactions} ({adjustments} adjustments)");
    println!("Batches:       {batches}");
    println!("Checkpoints:   {checkpoints} ({unreconciled} unreconciled)");
    Ok(())
}
