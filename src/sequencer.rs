use rusqlite::Connection;

use crate::error::Result;

/// Accounts with more transactions than this skip dense renumbering; the
/// per-request latency of rewriting every row outweighs global ordering
/// precision. Sequences stay unique either way.
pub const RENUMBER_CUTOFF: i64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct RenumberOutcome {
    pub renumbered: bool,
    pub count: i64,
}

/// Recompute a dense 1..N sequence over all of an account's transactions,
/// ordered by (date, sequence, id). Called explicitly after batch mutations
/// instead of reacting to inserts from a trigger.
pub fn renumber_account(conn: &Connection, account_id: i64) -> Result<RenumberOutcome> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM transactions WHERE account_id = ?1",
        [account_id],
        |row| row.get(0),
    )?;
    if count > RENUMBER_CUTOFF {
        log::warn!(
            "account {account_id}: {count} transactions exceed the renumber cutoff ({RENUMBER_CUTOFF}); keeping sparse sequences"
        );
        return Ok(RenumberOutcome {
            renumbered: false,
            count,
        });
    }

    let tx = conn.unchecked_transaction()?;
    let ids: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM transactions WHERE account_id = ?1 ORDER BY date, sequence, id",
        )?;
        let rows = stmt.query_map([account_id], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };
    {
        let mut update = tx.prepare("UPDATE transactions SET sequence = ?1 WHERE id = ?2")?;
        for (i, id) in ids.iter().enumerate() {
            update.execute(rusqlite::params![i as i64 + 1, id])?;
        }
    }
    tx.commit()?;

    Ok(RenumberOutcome {
        renumbered: true,
        count,
    })
}
