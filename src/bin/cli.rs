use clap::Parser;
use log::warn;
use std::sync::Arc;
use transfer_watcher::api::{Cli, CliHandler, Commands};
use transfer_watcher::config::AppConfig;
use transfer_watcher::database::Database;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Less verbose than the watcher
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    // Generating a config must work without a database or a valid config
    if cli.command == Commands::GenerateConfig {
        println!("{}", AppConfig::generate_sample_config()?);
        return Ok(());
    }

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Ignoring invalid configuration ({}); using defaults", e);
        AppConfig::default()
    });
    let db_path = cli.database.clone().unwrap_or(config.database.path);

    let database = match Database::open_read_only(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("Failed to open database at '{}': {}", db_path, e);
            eprintln!("Make sure the watcher has been run at least once to create the database.");
            std::process::exit(1);
        }
    };

    let cli_handler = CliHandler::new(database);

    match cli_handler.execute_command(&cli.command).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
