use std::path::PathBuf;

use chrono::NaiveDate;
use colored::Colorize;

use crate::cli::{profiles, MappingArgs};
use crate::db::get_connection;
use crate::error::{BankbookError, Result};
use crate::fmt::{money, signed_money};
use crate::importer::{import_statement, ImportRequest};
use crate::settings::db_path;

#[allow(clippy::too_many_arguments)]
pub fn run(
    file: &str,
    account: &str,
    profile: Option<&str>,
    mapping: &MappingArgs,
    from_date: Option<&str>,
    to_date: Option<&str>,
    declared_balance: Option<f64>,
    notes: Option<&str>,
) -> Result<()> {
    let file_path = PathBuf::from(file);
    let conn = get_connection(&db_path())?;

    let (mappings, options) = match profile {
        Some(name) => profiles::load(&conn, name)?,
        None if !mapping.is_empty() => (mapping.to_mappings(), mapping.to_options()),
        // Empty mapping: the importer classifies columns itself.
        None => (Vec::new(), mapping.to_options()),
    };

    let period = match (from_date, to_date) {
        (Some(from), Some(to)) => Some((parse_cli_date(from)?, parse_cli_date(to)?)),
        (None, None) => None,
        _ => {
            return Err(BankbookError::Other(
                "--from and --to must be given together".into(),
            ))
        }
    };

    let outcome = import_statement(
        &conn,
        &ImportRequest {
            account_name: account,
            file_path: &file_path,
            mappings,
            options,
            period,
            declared_balance,
            checkpoint_notes: notes,
        },
    )?;

    if outcome.duplicate_file {
        println!(
            "This file has already been imported (duplicate checksum, batch {}).",
            outcome.batch_id
        );
        return Ok(());
    }

    println!(
        "Batch {}: {} imported, {} duplicates skipped, {} row errors ({} order)",
        outcome.batch_id,
        outcome.imported,
        outcome.duplicates,
        outcome.row_errors.len(),
        outcome.detected_order.as_str()
    );
    if outcome.out_of_range > 0 {
        println!("{} rows outside the statement period were dropped", outcome.out_of_range);
    }
    if !outcome.renumbered {
        println!("Note: account too large for dense renumbering; sequences stay sparse but unique");
    }
    for err in outcome.row_errors.iter().take(5) {
        println!("  row {}: {}", err.row + 1, err.message);
    }
    if outcome.row_errors.len() > 5 {
        println!("  ... full list stored in the batch error log");
    }

    if let Some(cp) = &outcome.checkpoint {
        if cp.checkpoint.is_reconciled {
            println!(
                "{} Checkpoint {} reconciled at {}",
                "OK".green(),
                cp.checkpoint.date_str(),
                money(cp.checkpoint.calculated_balance)
            );
        } else {
            println!(
                "{} Checkpoint {}: declared {} vs calculated {}, adjustment {}",
                "MISMATCH".yellow(),
                cp.checkpoint.date_str(),
                money(cp.checkpoint.declared_balance),
                money(cp.checkpoint.calculated_balance),
                signed_money(cp.checkpoint.adjustment_amount)
            );
        }
        if cp.recalculated > 0 {
            println!("{}", cp.message);
        }
    }
    Ok(())
}

fn parse_cli_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| BankbookError::Other(format!("invalid date '{raw}' (expected YYYY-MM-DD)")))
}
