use clap::Parser;
use std::sync::Arc;
use transfer_watcher::api::ApiServer;
use transfer_watcher::config::AppConfig;
use transfer_watcher::database::Database;
use transfer_watcher::logging::init_logging;

#[derive(Parser)]
#[command(name = "transfer-watcher-server")]
#[command(about = "REST API over transfers recorded by the transfer watcher")]
#[command(version)]
struct Args {
    /// Database path (defaults to the configured path)
    #[arg(long)]
    database: Option<String>,

    /// Server port (defaults to the configured port)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::load()?;
    init_logging(&config.logging);

    let mut database_config = config.database.clone();
    if let Some(path) = args.database {
        database_config.path = path;
    }
    let port = args.port.unwrap_or(config.api.port);

    let database = Database::open_with_config(&database_config)
        .map_err(|e| format!("Failed to initialize database: {}", e))?;

    let server = ApiServer::new(Arc::new(database), config.api.host.clone(), port);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Received shutdown signal");
    };

    if let Err(e) = server.start(shutdown).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
