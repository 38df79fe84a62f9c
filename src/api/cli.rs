use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;
use crate::database::{Database, DbError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Output formatting failed: {0}")]
    Format(#[from] serde_json::Error),
    #[error("CLI operation failed: {0}")]
    Operation(String),
}

#[derive(Parser, Debug)]
#[command(name = "transfer-watcher-cli")]
#[command(about = "Query transfers and balances recorded by the transfer watcher")]
#[command(version)]
pub struct Cli {
    /// Database path (defaults to the configured path)
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Balance of one address, or of every address when omitted
    Balance {
        address: Option<String>,
    },
    /// Transfers sent or received by an address, newest block first
    Transfers {
        address: String,
        /// Show at most this many rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Row count and latest recorded block
    Status,
    /// Print a sample config.toml
    GenerateConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    total_transfers: u64,
    latest_block: Option<u64>,
}

pub struct CliHandler {
    database: Arc<Database>,
}

impl CliHandler {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Run a command and return what should be printed
    pub async fn execute_command(&self, command: &Commands) -> Result<String, CliError> {
        match command {
            Commands::Balance { address: Some(address) } => {
                let balance = self.database.get_address_balance(address)?;
                Ok(serde_json::to_string_pretty(&balance)?)
            }
            Commands::Balance { address: None } => {
                let balances = self.database.get_all_balances()?;
                Ok(serde_json::to_string_pretty(&balances)?)
            }
            Commands::Transfers { address, limit } => {
                let mut transfers = self.database.get_transfers_by_address(address)?;
                if let Some(limit) = limit {
                    transfers.truncate(*limit);
                }
                Ok(serde_json::to_string_pretty(&transfers)?)
            }
            Commands::Status => {
                let status = StatusOutput {
                    total_transfers: self.database.get_transfer_count()?,
                    latest_block: self.database.get_latest_block_number()?,
                };
                Ok(serde_json::to_string_pretty(&status)?)
            }
            Commands::GenerateConfig => {
                AppConfig::generate_sample_config().map_err(|e| CliError::Operation(e.to_string()))
            }
        }
    }
}
