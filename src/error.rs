use thiserror::Error;

#[derive(Error, Debug)]
pub enum BankbookError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "xlsx")]
    #[error("XLSX error: {0}")]
    Xlsx(#[from] calamine::XlsxError),

    /// Fatal import error: unreadable file, empty after cleaning, or an
    /// unusable column mapping. Aborts the whole import.
    #[error("File format error: {0}")]
    FileFormat(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Unknown mapping profile: {0}")]
    UnknownProfile(String),

    #[error("Import batch not found: {0}")]
    BatchNotFound(String),

    #[error("Batch already rolled back: {0}")]
    AlreadyRolledBack(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(i64),

    /// A chunk insert failed mid-batch. Chunks already written stay written;
    /// `inserted` is the accurate partial count.
    #[error("Storage failure after {inserted} rows: {source}")]
    Persistence {
        inserted: usize,
        source: rusqlite::Error,
    },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BankbookError>;
