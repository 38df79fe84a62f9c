use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

use transfer_watcher::blockchain::{TransferDecoder, TransferWatcher, WsProvider};
use transfer_watcher::config::AppConfig;
use transfer_watcher::database::Database;
use transfer_watcher::logging::{init_logging, ErrorLogger};
use transfer_watcher::sink::{spawn_sink, DedupMode};
use transfer_watcher::WatcherError;

#[derive(Parser)]
#[command(name = "transfer-watcher")]
#[command(about = "Record ERC-20 Transfer events from a WebSocket node into SQLite")]
#[command(version)]
struct Args {
    /// WebSocket endpoint (overrides config)
    #[arg(long)]
    ws_url: Option<String>,

    /// Token contract address (overrides config)
    #[arg(long)]
    token: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::load_with(|config| {
        if let Some(ws_url) = args.ws_url {
            config.provider.endpoint = ws_url;
        }
        if let Some(token) = args.token {
            config.watcher.token_address = token;
        }
        if let Some(path) = args.database {
            config.database.path = path;
        }
    })?;

    init_logging(&config.logging);
    info!("Starting transfer watcher");

    if let Err(e) = run(config).await {
        ErrorLogger::log_error(&e, None);
        return Err(e.into());
    }

    Ok(())
}

async fn run(config: AppConfig) -> Result<(), WatcherError> {
    let database = Arc::new(Database::open_with_config(&config.database)?);
    info!("Database ready at {}", config.database.path);

    let (sink, sink_worker) = spawn_sink(
        database,
        DedupMode::from_flag(config.watcher.dedup_transfers),
        config.watcher.sink_queue_capacity,
    );

    let provider = Arc::new(WsProvider::from_config(&config.provider));
    let decoder = Arc::new(TransferDecoder::new(&config.watcher.token_address)?);
    let watcher = TransferWatcher::new(provider, decoder, sink, config.watcher.reconnect_policy());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
                // Keep the sender alive so the watcher runs until killed
                std::future::pending::<()>().await;
            }
        }
    });

    let result = watcher.run(shutdown_rx).await;

    // The watcher held the last sink handle; the worker drains the queue and exits
    match sink_worker.await {
        Ok(stats) => info!(
            "Sink drained: {} written, {} failed, {} skipped",
            stats.written, stats.failed, stats.skipped
        ),
        Err(e) => error!("Sink worker failed: {}", e),
    }

    result
}
