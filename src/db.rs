use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    account_type TEXT NOT NULL,
    institution TEXT,
    currency TEXT NOT NULL DEFAULT 'USD',
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS import_batches (
    id TEXT PRIMARY KEY,
    account_id INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    checksum TEXT,
    total_rows INTEGER NOT NULL DEFAULT 0,
    successful_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'processing',
    error_log TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    rolled_back_at TEXT,
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    account_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    debit_amount REAL,
    credit_amount REAL,
    balance REAL,
    bank_reference TEXT,
    branch TEXT,
    sequence INTEGER NOT NULL,
    is_balance_adjustment INTEGER NOT NULL DEFAULT 0,
    checkpoint_id INTEGER,
    batch_id TEXT,
    source_file TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (batch_id) REFERENCES import_batches(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_account_date
    ON transactions(account_id, date, sequence);
CREATE INDEX IF NOT EXISTS idx_transactions_batch
    ON transactions(batch_id);

CREATE TABLE IF NOT EXISTS balance_checkpoints (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    declared_balance REAL NOT NULL,
    calculated_balance REAL NOT NULL,
    adjustment_amount REAL NOT NULL,
    is_reconciled INTEGER NOT NULL DEFAULT 0,
    batch_id TEXT,
    notes TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (account_id, date),
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS mapping_profiles (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    mappings TEXT NOT NULL,
    date_format TEXT,
    negative_debits INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
