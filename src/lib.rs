pub mod blockchain;
pub mod database;
pub mod models;
pub mod api;
pub mod error;
pub mod logging;
pub mod retry;
pub mod config;
pub mod sink;

pub use blockchain::{ChainProvider, TransferDecoder, TransferWatcher, WsProvider};
pub use error::WatcherError;
pub use logging::{init_logging, ErrorLogger, LogContext, MetricsLogger};
pub use retry::ReconnectPolicy;
pub use config::{ApiConfig, AppConfig, DatabaseConfig, LoggingConfig, ProviderConfig, WatcherConfig};
pub use sink::{spawn_sink, DedupMode, SinkHandle, SinkStatsSnapshot, TransferStore};
