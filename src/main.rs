mod checkpoint;
mod classifier;
mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod mapper;
mod models;
mod normalizer;
mod resolver;
mod rollback;
mod sequencer;
mod settings;

use clap::Parser;

use cli::{AccountsCommands, CheckpointCommands, Cli, Commands, ProfilesCommands};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                name,
                account_type,
                institution,
                currency,
            } => cli::accounts::add(&name, &account_type, institution.as_deref(), &currency),
            AccountsCommands::List => cli::accounts::list(),
        },
        Commands::Inspect { file } => cli::inspect::run(&file),
        Commands::Import {
            file,
            account,
            profile,
            mapping,
            from_date,
            to_date,
            declared_balance,
            notes,
        } => cli::import::run(
            &file,
            &account,
            profile.as_deref(),
            &mapping,
            from_date.as_deref(),
            to_date.as_deref(),
            declared_balance,
            notes.as_deref(),
        ),
        Commands::Profiles { command } => match command {
            ProfilesCommands::Save { name, mapping } => cli::profiles::save(&name, &mapping),
            ProfilesCommands::List => cli::profiles::list(),
        },
        Commands::Checkpoint { command } => match command {
            CheckpointCommands::Set {
                account,
                date,
                balance,
                notes,
            } => cli::checkpoint::set(&account, &date, balance, notes.as_deref()),
            CheckpointCommands::List { account } => cli::checkpoint::list(&account),
            CheckpointCommands::Delete { id } => cli::checkpoint::delete(id),
        },
        Commands::Batches => cli::batches::list(),
        Commands::Rollback { batch_id } => cli::rollback::run(&batch_id),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
