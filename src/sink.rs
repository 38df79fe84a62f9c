//! Persistence sink: a single worker task that appends transfers behind a bounded queue.
//!
//! The supervisor hands records over with [`SinkHandle::submit`] and moves on.
//! Writes run one at a time on the blocking pool; every failure is logged with
//! the record's tx hash and counted, and the worker keeps draining the queue.

use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::database::{Database, DbError};
use crate::error::WatcherError;
use crate::logging::{LogContext, MetricsLogger};
use crate::models::NewTransfer;

/// Storage operations the sink worker needs
pub trait TransferStore: Send + Sync + 'static {
    fn insert_transfer(&self, transfer: &NewTransfer) -> Result<i64, DbError>;

    /// Returns `None` when a row with the same (tx_hash, log_index) already exists
    fn insert_transfer_if_absent(&self, transfer: &NewTransfer) -> Result<Option<i64>, DbError>;
}

impl TransferStore for Database {
    fn insert_transfer(&self, transfer: &NewTransfer) -> Result<i64, DbError> {
        Database::insert_transfer(self, transfer)
    }

    fn insert_transfer_if_absent(&self, transfer: &NewTransfer) -> Result<Option<i64>, DbError> {
        Database::insert_transfer_if_absent(self, transfer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Every delivered log becomes a row, duplicates included
    Off,
    /// Skip records whose (tx_hash, log_index) is already stored
    TxHashAndLogIndex,
}

impl DedupMode {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            DedupMode::TxHashAndLogIndex
        } else {
            DedupMode::Off
        }
    }
}

#[derive(Debug, Default)]
struct SinkStats {
    written: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl SinkStats {
    fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStatsSnapshot {
    pub written: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Cloneable submission side of the sink queue
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<NewTransfer>,
    stats: Arc<SinkStats>,
}

impl SinkHandle {
    /// Queue a record for writing. Waits only while the queue is full.
    pub async fn submit(&self, transfer: NewTransfer) -> Result<(), WatcherError> {
        self.tx.send(transfer).await.map_err(|_| WatcherError::SinkClosed)
    }

    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Start the sink worker. The returned task finishes with the final counters
/// once every [`SinkHandle`] clone has been dropped and the queue is drained.
pub fn spawn_sink<S: TransferStore>(
    store: Arc<S>,
    mode: DedupMode,
    capacity: usize,
) -> (SinkHandle, JoinHandle<SinkStatsSnapshot>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(SinkStats::default());

    let worker = tokio::spawn(run_worker(store, mode, rx, Arc::clone(&stats)));

    (SinkHandle { tx, stats }, worker)
}

async fn run_worker<S: TransferStore>(
    store: Arc<S>,
    mode: DedupMode,
    mut rx: mpsc::Receiver<NewTransfer>,
    stats: Arc<SinkStats>,
) -> SinkStatsSnapshot {
    while let Some(transfer) = rx.recv().await {
        let tx_hash = transfer.tx_hash.clone();
        let block_number = transfer.block_number;

        let store = Arc::clone(&store);
        let outcome = tokio::task::spawn_blocking(move || {
            let result = match mode {
                DedupMode::Off => store.insert_transfer(&transfer).map(Some),
                DedupMode::TxHashAndLogIndex => store.insert_transfer_if_absent(&transfer),
            };
            (transfer, result)
        })
        .await;

        match outcome {
            Ok((transfer, Ok(Some(id)))) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
                MetricsLogger::log_transfer_recorded(
                    id,
                    &transfer.tx_hash,
                    &transfer.from_address,
                    &transfer.to_address,
                    &transfer.value,
                );
            }
            Ok((transfer, Ok(None))) => {
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                LogContext::new("sink", "dedup")
                    .with_transaction_hash(&transfer.tx_hash)
                    .with_metadata("log_index", json!(transfer.log_index))
                    .debug("Skipping already recorded transfer");
            }
            Ok((_, Err(e))) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                MetricsLogger::log_write_failed(&tx_hash, block_number, &e.to_string());
            }
            Err(join_error) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                MetricsLogger::log_write_failed(&tx_hash, block_number, &join_error.to_string());
            }
        }
    }

    stats.snapshot()
}
