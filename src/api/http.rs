use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;

use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::database::{Database, DbError};
use crate::models::{AddressBalance, TransferRecord};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Server error: {0}")]
    Server(String),
}

/// Response structure for status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub total_transfers: u64,
    pub latest_block: Option<u64>,
    pub database_status: String,
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn database_error(context: &str, e: DbError) -> HandlerError {
    log::error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "database_error".to_string(),
            message: format!("{}: {}", context, e),
        }),
    )
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
}

/// Read-only HTTP API over the transfers table
pub struct ApiServer {
    database: Arc<Database>,
    pub host: String,
    pub port: u16,
}

impl ApiServer {
    pub fn new(database: Arc<Database>, host: impl Into<String>, port: u16) -> Self {
        Self {
            database,
            host: host.into(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        router(AppState {
            database: Arc::clone(&self.database),
        })
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<(), ApiError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApiError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

        log::info!("REST API running on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ApiError::Server(format!("Server error: {}", e)))?;

        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/transfers/:address", get(get_transfers))
        .route("/balances/:address", get(get_balance))
        .route("/balances", get(get_balances))
        .route("/status", get(get_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// GET /transfers/:address - Transfers involving the address, newest block first
pub async fn get_transfers(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TransferRecord>>, HandlerError> {
    state
        .database
        .get_transfers_by_address(&address)
        .map(Json)
        .map_err(|e| database_error("Failed to retrieve transfers", e))
}

/// GET /balances/:address - Balance summary for one address
pub async fn get_balance(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AddressBalance>, HandlerError> {
    state
        .database
        .get_address_balance(&address)
        .map(Json)
        .map_err(|e| database_error("Failed to compute balance", e))
}

/// GET /balances - Balance summary for every address seen, highest balance first
pub async fn get_balances(State(state): State<AppState>) -> Result<Json<Vec<AddressBalance>>, HandlerError> {
    state
        .database
        .get_all_balances()
        .map(Json)
        .map_err(|e| database_error("Failed to compute balances", e))
}

/// GET /status - Row count and health
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, HandlerError> {
    let total_transfers = state
        .database
        .get_transfer_count()
        .map_err(|e| database_error("Failed to retrieve status data", e))?;
    let latest_block = state
        .database
        .get_latest_block_number()
        .map_err(|e| database_error("Failed to retrieve status data", e))?;

    Ok(Json(StatusResponse {
        status: "healthy".to_string(),
        total_transfers,
        latest_block,
        database_status: "connected".to_string(),
    }))
}
