pub mod accounts;
pub mod batches;
pub mod checkpoint;
pub mod import;
pub mod init;
pub mod inspect;
pub mod profiles;
pub mod rollback;
pub mod status;

use clap::{Args, Parser, Subcommand};

use crate::mapper::MapOptions;
use crate::models::{ColumnMapping, ColumnRole};

#[derive(Parser)]
#[command(
    name = "bankbook",
    about = "Statement-import and balance-checkpoint bookkeeping CLI for small businesses."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up bankbook: choose a data directory and initialize the database.
    Init {
        /// Path for bankbook data (default: ~/Documents/bankbook)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Preview a statement file: suggested column roles and confidences.
    Inspect {
        /// Path to CSV or XLSX file
        file: String,
    },
    /// Import a CSV/XLSX statement into an account.
    Import {
        /// Path to CSV or XLSX file to import
        file: String,
        /// Account name to import into
        #[arg(long)]
        account: String,
        /// Saved mapping profile name
        #[arg(long)]
        profile: Option<String>,
        #[command(flatten)]
        mapping: MappingArgs,
        /// Statement period start: YYYY-MM-DD
        #[arg(long = "from")]
        from_date: Option<String>,
        /// Statement period end: YYYY-MM-DD
        #[arg(long = "to")]
        to_date: Option<String>,
        /// Declared statement ending balance; creates a checkpoint
        #[arg(long = "declared-balance")]
        declared_balance: Option<f64>,
        /// Notes stored on the created checkpoint
        #[arg(long)]
        notes: Option<String>,
    },
    /// Manage saved column-mapping profiles.
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommands,
    },
    /// Manage balance checkpoints.
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// List import batches.
    Batches,
    /// Reverse a completed import batch.
    Rollback {
        /// Batch id (shown in `bankbook batches`)
        batch_id: String,
    },
    /// Show current database and summary statistics.
    Status,
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account name, e.g. 'Business Checking'
        name: String,
        /// Account type: checking, savings, credit_card
        #[arg(long = "type")]
        account_type: String,
        /// Institution name
        #[arg(long)]
        institution: Option<String>,
        /// ISO currency code
        #[arg(long, default_value = "USD")]
        currency: String,
    },
    /// List all accounts.
    List,
}

#[derive(Subcommand)]
pub enum ProfilesCommands {
    /// Save a mapping profile for reuse with `import --profile`.
    Save {
        /// Profile name
        name: String,
        #[command(flatten)]
        mapping: MappingArgs,
    },
    /// List saved profiles.
    List,
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// Declare an ending balance and reconcile it against history.
    Set {
        /// Account name
        #[arg(long)]
        account: String,
        /// Checkpoint date: YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Declared ending balance
        #[arg(long)]
        balance: f64,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// List checkpoints for an account.
    List {
        /// Account name
        #[arg(long)]
        account: String,
    },
    /// Delete a checkpoint and its adjustment transaction.
    Delete {
        /// Checkpoint id (shown in `bankbook checkpoint list`)
        id: i64,
    },
}

/// Column mapping flags shared by `import` and `profiles save`.
#[derive(Args, Debug, Clone)]
pub struct MappingArgs {
    /// Column holding the transaction date
    #[arg(long = "date-col")]
    pub date_col: Option<String>,
    /// Column holding the description
    #[arg(long = "desc-col")]
    pub desc_col: Option<String>,
    /// Column holding debit amounts
    #[arg(long = "debit-col")]
    pub debit_col: Option<String>,
    /// Column holding credit amounts
    #[arg(long = "credit-col")]
    pub credit_col: Option<String>,
    /// Single signed-amount column
    #[arg(long = "amount-col")]
    pub amount_col: Option<String>,
    /// Column holding the running balance
    #[arg(long = "balance-col")]
    pub balance_col: Option<String>,
    /// Column holding the bank reference
    #[arg(long = "ref-col")]
    pub ref_col: Option<String>,
    /// Column holding the branch
    #[arg(long = "branch-col")]
    pub branch_col: Option<String>,
    /// Date format, e.g. '%d/%m/%Y'
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
    /// Signed-amount columns encode debits as positive values
    #[arg(long = "debits-positive")]
    pub debits_positive: bool,
}

impl MappingArgs {
    pub fn is_empty(&self) -> bool {
        self.date_col.is_none()
            && self.desc_col.is_none()
            && self.debit_col.is_none()
            && self.credit_col.is_none()
            && self.amount_col.is_none()
            && self.balance_col.is_none()
            && self.ref_col.is_none()
            && self.branch_col.is_none()
    }

    pub fn to_mappings(&self) -> Vec<ColumnMapping> {
        let mut mappings = Vec::new();
        let pairs: [(&Option<String>, ColumnRole); 8] = [
            (&self.date_col, ColumnRole::Date),
            (&self.desc_col, ColumnRole::Description),
            (&self.debit_col, ColumnRole::Debit),
            (&self.credit_col, ColumnRole::Credit),
            (&self.amount_col, ColumnRole::SignedAmount),
            (&self.balance_col, ColumnRole::Balance),
            (&self.ref_col, ColumnRole::Reference),
            (&self.branch_col, ColumnRole::Branch),
        ];
        for (column, role) in pairs {
            if let Some(column) = column {
                let mut mapping = ColumnMapping::new(column, role);
                if role == ColumnRole::Date {
                    mapping.date_format = self.date_format.clone();
                }
                mappings.push(mapping);
            }
        }
        mappings
    }

    pub fn to_options(&self) -> MapOptions {
        MapOptions {
            date_format: self.date_format.clone(),
            negative_debits: !self.debits_positive,
        }
    }
}
