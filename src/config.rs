use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use crate::error::ConfigError;
use crate::retry::ReconnectPolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub watcher: WatcherConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Streaming provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// WebSocket JSON-RPC endpoint (ws:// or wss://)
    pub endpoint: String,
    /// Upper bound on connect + eth_subscribe handshake
    pub connect_timeout_seconds: u64,
}

/// Watcher and reconnect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// ERC-20 token contract to watch
    pub token_address: String,
    /// Fixed delay before each reconnect
    pub reconnect_delay_ms: u64,
    /// Stop after this many consecutive failed reconnects (unbounded when absent)
    pub max_reconnect_attempts: Option<u32>,
    /// Skip records whose (tx_hash, log_index) is already stored
    pub dedup_transfers: bool,
    /// Capacity of the queue in front of the sink worker
    pub sink_queue_capacity: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path
    pub path: String,
    /// Enable WAL mode so the API can read while the watcher writes
    pub enable_wal_mode: bool,
    /// Database busy timeout in milliseconds
    pub busy_timeout_ms: u32,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub host: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://ethereum-sepolia-rpc.publicnode.com".to_string(),
            connect_timeout_seconds: 10,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            token_address: "0x77c1693F22B49381984377B190a15922b89fb64C".to_string(),
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: None,
            dedup_transfers: false,
            sink_queue_capacity: 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data.db".to_string(),
            enable_wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl WatcherConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

impl AppConfig {
    /// Load configuration from file and environment variables
    /// Environment variables take precedence over file values
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|_| {})
    }

    /// Like [`AppConfig::load`], applying command-line overrides after the
    /// environment and before validation
    pub fn load_with(overrides: impl FnOnce(&mut Self)) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides()?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the TOML file named by `CONFIG_FILE` (default `config.toml`)
    pub fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if !Path::new(&config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ConfigError::FileNotFound(config_path.clone()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("WATCHER_WS_URL") {
            self.provider.endpoint = endpoint;
        }
        if let Ok(timeout) = env::var("PROVIDER_CONNECT_TIMEOUT_SECONDS") {
            self.provider.connect_timeout_seconds = parse_env("PROVIDER_CONNECT_TIMEOUT_SECONDS", timeout)?;
        }

        if let Ok(token_address) = env::var("TOKEN_ADDRESS") {
            self.watcher.token_address = token_address;
        }
        if let Ok(delay) = env::var("RECONNECT_DELAY_MS") {
            self.watcher.reconnect_delay_ms = parse_env("RECONNECT_DELAY_MS", delay)?;
        }
        if let Ok(attempts) = env::var("MAX_RECONNECT_ATTEMPTS") {
            self.watcher.max_reconnect_attempts = Some(parse_env("MAX_RECONNECT_ATTEMPTS", attempts)?);
        }
        if let Ok(dedup) = env::var("DEDUP_TRANSFERS") {
            self.watcher.dedup_transfers = parse_env("DEDUP_TRANSFERS", dedup)?;
        }

        if let Ok(path) = env::var("DATABASE_PATH") {
            self.database.path = path;
        }
        if let Ok(wal_mode) = env::var("DATABASE_WAL_MODE") {
            self.database.enable_wal_mode = parse_env("DATABASE_WAL_MODE", wal_mode)?;
        }

        if let Ok(port) = env::var("API_PORT") {
            self.api.port = parse_env("API_PORT", port)?;
        }
        if let Ok(host) = env::var("API_HOST") {
            self.api.host = host;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.provider.endpoint.starts_with("ws://") && !self.provider.endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidUrl(self.provider.endpoint.clone()));
        }

        if self.provider.connect_timeout_seconds == 0 || self.provider.connect_timeout_seconds > 300 {
            return Err(ConfigError::InvalidValue {
                key: "provider.connect_timeout_seconds".to_string(),
                value: self.provider.connect_timeout_seconds.to_string(),
            });
        }

        let token = &self.watcher.token_address;
        if !token.starts_with("0x") || token.len() != 42 || !token[2..].chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidValue {
                key: "watcher.token_address".to_string(),
                value: token.clone(),
            });
        }

        if self.watcher.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "watcher.max_reconnect_attempts".to_string(),
                value: "0".to_string(),
            });
        }

        if self.watcher.sink_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "watcher.sink_queue_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        if self.database.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "database.path".to_string(),
                value: self.database.path.clone(),
            });
        }

        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.port".to_string(),
                value: self.api.port.to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                value: self.logging.format.clone(),
            });
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Parsing(e.to_string()))
    }
}
