use crate::db::get_connection;
use crate::error::Result;
use crate::rollback::rollback_batch;
use crate::settings::db_path;

pub fn run(batch_id: &str) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let summary = rollback_batch(&conn, batch_id)?;
    println!(
        "Rolled back batch {batch_id}: {} transactions and {} checkpoint(s) deleted, \
         {} later checkpoint(s) recalculated",
        summary.transactions_deleted, summary.checkpoints_deleted, summary.recalculated
    );
    Ok(())
}
