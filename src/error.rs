use thiserror::Error;

/// Main error type for the transfer watcher
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reconnect limit reached after {attempts} attempts")]
    ReconnectLimit { attempts: u32 },

    #[error("Sink worker stopped")]
    SinkClosed,
}

/// Errors raised by the streaming provider connection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection closed by remote: {0}")]
    Closed(String),

    #[error("Subscription handshake timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("RPC method error: code={code}, message={message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Uncaught fault: {0}")]
    Fault(String),
}

/// Errors raised while decoding a Transfer log
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Expected {expected} topics, got {got}")]
    TopicCount { expected: usize, got: usize },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid data field: {0}")]
    InvalidData(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid quantity for {field}: {value}")]
    InvalidQuantity { field: &'static str, value: String },

    #[error("Log is not a Transfer from the watched token: {0}")]
    UnexpectedLog(String),
}

/// Database-related errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(#[from] rusqlite::Error),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Stops the watcher
    Critical,
    /// Loses data or a connection
    High,
    /// Degrades a single event
    Medium,
    /// Informational
    Low,
}

impl WatcherError {
    /// Get the severity level of an error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WatcherError::Config(_) => ErrorSeverity::Critical,
            WatcherError::ReconnectLimit { .. } => ErrorSeverity::Critical,
            WatcherError::SinkClosed => ErrorSeverity::Critical,
            WatcherError::Database(DatabaseError::Connection(_)) => ErrorSeverity::High,
            WatcherError::Database(DatabaseError::Overflow(_)) => ErrorSeverity::Medium,
            WatcherError::Database(_) => ErrorSeverity::High,

            WatcherError::Transport(TransportError::Fault(_)) => ErrorSeverity::High,
            WatcherError::Transport(_) => ErrorSeverity::Medium,

            WatcherError::Decode(_) => ErrorSeverity::Low,
        }
    }

    /// Whether the supervisor recovers from this error by reconnecting
    pub fn is_recoverable(&self) -> bool {
        match self {
            WatcherError::Transport(_) => true,
            WatcherError::Decode(_) => true,
            WatcherError::Database(DatabaseError::Lock(_)) => true,

            WatcherError::Config(_) => false,
            WatcherError::ReconnectLimit { .. } => false,
            WatcherError::SinkClosed => false,
            WatcherError::Database(_) => false,
        }
    }
}

impl From<crate::database::DbError> for DatabaseError {
    fn from(err: crate::database::DbError) -> Self {
        match err {
            crate::database::DbError::Connection(e) => DatabaseError::Connection(e),
            crate::database::DbError::Operation(msg) => DatabaseError::Query(msg),
            crate::database::DbError::Lock => DatabaseError::Lock("connection mutex poisoned".to_string()),
            crate::database::DbError::NotFound => DatabaseError::NotFound("Record not found".to_string()),
            crate::database::DbError::Overflow(msg) => DatabaseError::Overflow(msg),
        }
    }
}

impl From<crate::database::DbError> for WatcherError {
    fn from(err: crate::database::DbError) -> Self {
        WatcherError::Database(DatabaseError::from(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::Closed("connection closed".to_string())
            }
            WsError::Io(e) => TransportError::Connection(e.to_string()),
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}
