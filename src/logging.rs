use log::{info, warn, error, debug, LevelFilter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::LoggingConfig;
use crate::error::{ErrorSeverity, WatcherError};

/// Structured logging context for the watcher
#[derive(Debug, Clone)]
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, Value>,
}

impl LogContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.with_metadata("block_number", json!(block_number))
    }

    pub fn with_transaction_hash(self, tx_hash: &str) -> Self {
        self.with_metadata("transaction_hash", json!(tx_hash))
    }

    pub fn with_generation(self, generation: u64) -> Self {
        self.with_metadata("generation", json!(generation))
    }

    pub fn with_attempt(self, attempt: u32) -> Self {
        self.with_metadata("attempt", json!(attempt))
    }

    fn format_message(&self, level: &str, message: &str) -> String {
        let mut log_entry = json!({
            "timestamp": chrono::Utc::now().timestamp(),
            "level": level,
            "component": self.component,
            "operation": self.operation,
            "message": message,
        });

        for (key, value) in &self.metadata {
            log_entry[key] = value.clone();
        }

        log_entry.to_string()
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_message("INFO", message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.format_message("WARN", message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.format_message("ERROR", message));
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_message("DEBUG", message));
    }
}

/// Error logging utilities
pub struct ErrorLogger;

impl ErrorLogger {
    pub fn log_error(error: &WatcherError, context: Option<LogContext>) {
        let severity = error.severity();

        let log_context = context
            .unwrap_or_else(|| LogContext::new("error", "unknown"))
            .with_metadata("error_type", json!(format!("{:?}", error)))
            .with_metadata("severity", json!(format!("{:?}", severity)))
            .with_metadata("recoverable", json!(error.is_recoverable()));

        let message = format!("Error occurred: {}", error);

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => log_context.error(&message),
            ErrorSeverity::Medium => log_context.warn(&message),
            ErrorSeverity::Low => log_context.info(&message),
        }
    }
}

/// Watcher lifecycle and throughput events
pub struct MetricsLogger;

impl MetricsLogger {
    pub fn log_subscription_established(endpoint: &str, generation: u64, subscription_id: &str) {
        LogContext::new("supervisor", "subscribed")
            .with_generation(generation)
            .with_metadata("endpoint", json!(endpoint))
            .with_metadata("subscription_id", json!(subscription_id))
            .info("Subscribed to Transfer events");
    }

    pub fn log_reconnect_scheduled(attempt: u32, delay: Duration, reason: &str) {
        LogContext::new("supervisor", "reconnect_scheduled")
            .with_attempt(attempt)
            .with_metadata("delay_ms", json!(delay.as_millis() as u64))
            .with_metadata("reason", json!(reason))
            .warn(&format!("Reconnecting in {}ms: {}", delay.as_millis(), reason));
    }

    pub fn log_transfer_recorded(id: i64, tx_hash: &str, from: &str, to: &str, value: &str) {
        LogContext::new("sink", "transfer_recorded")
            .with_metadata("id", json!(id))
            .with_transaction_hash(tx_hash)
            .info(&format!("Logged Transfer: {} -> {}, value: {}", from, to, value));
    }

    pub fn log_write_failed(tx_hash: &str, block_number: u64, reason: &str) {
        LogContext::new("sink", "write_failed")
            .with_transaction_hash(tx_hash)
            .with_block_number(block_number)
            .with_metadata("reason", json!(reason))
            .error(&format!("Failed to persist transfer {}: {}", tx_hash, reason));
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize logging from config; `RUST_LOG` still overrides the level
pub fn init_logging(config: &LoggingConfig) {
    let pretty = config.format == "pretty";

    env_logger::Builder::new()
        .filter_level(parse_level(&config.level))
        .parse_default_env()
        .format(move |buf, record| {
            use std::io::Write;

            let args = record.args().to_string();
            match serde_json::from_str::<Value>(&args) {
                Ok(json_value) if pretty => writeln!(buf, "{}", serde_json::to_string_pretty(&json_value)?),
                Ok(json_value) => writeln!(buf, "{}", json_value),
                Err(_) => writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    args
                ),
            }
        })
        .init();

    info!("Structured logging initialized");
}
