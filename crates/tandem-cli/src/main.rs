//! tandem CLI - operator tooling for the sync queue and mapping store
//!
//! Works directly against the libSQL database the API service writes to.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, MappingCommands};
use crate::commands::cleanup::run_cleanup;
use crate::commands::clear::run_clear;
use crate::commands::common::resolve_db_path;
use crate::commands::drain::run_drain;
use crate::commands::failed::run_failed;
use crate::commands::mappings::{
    run_mappings_delete, run_mappings_import, run_mappings_list, run_mappings_show,
};
use crate::commands::retry::run_retry_failed;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tandem=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::Failed { limit, json } => run_failed(limit, json, &db_path).await?,
        Commands::Show { id } => run_show(&id, &db_path).await?,
        Commands::RetryFailed { max_retries } => run_retry_failed(max_retries, &db_path).await?,
        Commands::Cleanup { days } => run_cleanup(days, &db_path).await?,
        Commands::Clear { yes } => run_clear(yes, &db_path).await?,
        Commands::Mappings { command } => match command {
            MappingCommands::List => run_mappings_list(&db_path).await?,
            MappingCommands::Show { name } => run_mappings_show(&name, &db_path).await?,
            MappingCommands::Import { path } => run_mappings_import(&path, &db_path).await?,
            MappingCommands::Delete { name } => run_mappings_delete(&name, &db_path).await?,
        },
        Commands::Drain { limit } => run_drain(limit, &db_path).await?,
    }

    Ok(())
}
