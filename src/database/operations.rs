use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::database::schema::{initialize_schema, run_migrations};
use crate::models::{AddressBalance, BalanceAccumulator, CalculationError, NewTransfer, TransferRecord};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection failed: {0}")]
    Connection(#[from] rusqlite::Error),
    #[error("Database operation failed: {0}")]
    Operation(String),
    #[error("Failed to acquire database lock")]
    Lock,
    #[error("Transfer not found")]
    NotFound,
    #[error("Balance overflow: {0}")]
    Overflow(String),
}

impl From<CalculationError> for DbError {
    fn from(err: CalculationError) -> Self {
        match err {
            CalculationError::Overflow(msg) => DbError::Overflow(msg),
            CalculationError::InvalidAmount(value) => {
                DbError::Operation(format!("Stored value is not a decimal amount: {}", value))
            }
        }
    }
}

const TRANSFER_COLUMNS: &str =
    "id, tx_hash, from_address, to_address, value, block_number, log_index, token_address, timestamp";

fn map_transfer_row(row: &Row<'_>) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        id: row.get(0)?,
        tx_hash: row.get(1)?,
        from_address: row.get(2)?,
        to_address: row.get(3)?,
        value: row.get(4)?,
        block_number: row.get(5)?,
        log_index: row.get(6)?,
        token_address: row.get(7)?,
        timestamp: row.get(8)?,
    })
}

fn sink_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Handle to the transfer table. Rows are only ever inserted through this type.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file and initialize the schema
    pub fn new(db_path: &str) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(db_path)?)
    }

    /// Open a database file applying WAL mode and busy timeout from config
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self, DbError> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms as u64))?;
        if config.enable_wal_mode {
            let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            log::debug!("SQLite journal mode: {}", mode);
        }
        Self::from_connection(conn)
    }

    /// Open an existing database file for queries only. Fails if the file is
    /// missing; the schema is never created or migrated.
    pub fn open_read_only(db_path: &str) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database for testing
    pub fn new_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        initialize_schema(&conn)?;
        run_migrations(&conn)?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Lock)
    }

    /// Append a transfer and return its freshly assigned id
    pub fn insert_transfer(&self, transfer: &NewTransfer) -> Result<i64, DbError> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO transfers (tx_hash, from_address, to_address, value, block_number, log_index, token_address, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                transfer.tx_hash,
                transfer.from_address,
                transfer.to_address,
                transfer.value,
                transfer.block_number,
                transfer.log_index,
                transfer.token_address,
                sink_timestamp(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Append a transfer unless one with the same (tx_hash, log_index) exists.
    /// Returns `None` when the row was skipped.
    pub fn insert_transfer_if_absent(&self, transfer: &NewTransfer) -> Result<Option<i64>, DbError> {
        let conn = self.lock()?;

        let inserted = conn.execute(
            "INSERT INTO transfers (tx_hash, from_address, to_address, value, block_number, log_index, token_address, timestamp)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
             WHERE NOT EXISTS (SELECT 1 FROM transfers WHERE tx_hash = ?1 AND log_index IS ?6)",
            params![
                transfer.tx_hash,
                transfer.from_address,
                transfer.to_address,
                transfer.value,
                transfer.block_number,
                transfer.log_index,
                transfer.token_address,
                sink_timestamp(),
            ],
        )?;

        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    /// Get a transfer by id
    pub fn get_transfer(&self, id: i64) -> Result<TransferRecord, DbError> {
        let conn = self.lock()?;

        conn.query_row(
            &format!("SELECT {} FROM transfers WHERE id = ?1", TRANSFER_COLUMNS),
            params![id],
            map_transfer_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Transfers sent or received by `address` (case-insensitive), newest block first
    pub fn get_transfers_by_address(&self, address: &str) -> Result<Vec<TransferRecord>, DbError> {
        let conn = self.lock()?;
        let address = address.to_lowercase();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfers
             WHERE LOWER(from_address) = ?1 OR LOWER(to_address) = ?1
             ORDER BY block_number DESC, id DESC",
            TRANSFER_COLUMNS
        ))?;

        let rows = stmt.query_map(params![address], map_transfer_row)?;
        let mut transfers = Vec::new();
        for row in rows {
            transfers.push(row?);
        }

        Ok(transfers)
    }

    /// Most recently recorded transfers with pagination
    pub fn get_recent_transfers(&self, limit: u32, offset: u32) -> Result<Vec<TransferRecord>, DbError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfers ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            TRANSFER_COLUMNS
        ))?;

        let rows = stmt.query_map(params![limit, offset], map_transfer_row)?;
        let mut transfers = Vec::new();
        for row in rows {
            transfers.push(row?);
        }

        Ok(transfers)
    }

    /// Get transfer count
    pub fn get_transfer_count(&self) -> Result<u64, DbError> {
        let conn = self.lock()?;

        let count: u64 = conn.query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;

        Ok(count)
    }

    /// Highest block number recorded so far
    pub fn get_latest_block_number(&self) -> Result<Option<u64>, DbError> {
        let conn = self.lock()?;

        let block: Option<u64> = conn.query_row("SELECT MAX(block_number) FROM transfers", [], |row| row.get(0))?;

        Ok(block)
    }

    /// Balance summary for one address (case-insensitive match)
    pub fn get_address_balance(&self, address: &str) -> Result<AddressBalance, DbError> {
        let conn = self.lock()?;
        let needle = address.to_lowercase();

        let mut stmt = conn.prepare(
            "SELECT LOWER(from_address), LOWER(to_address), value FROM transfers
             WHERE LOWER(from_address) = ?1 OR LOWER(to_address) = ?1",
        )?;
        let rows = stmt.query_map(params![needle], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut acc = BalanceAccumulator::default();
        for row in rows {
            let (from, to, value) = row?;
            if to == needle {
                acc.add_inflow(&value)?;
            }
            if from == needle {
                acc.add_outflow(&value)?;
            }
            acc.total_transactions += 1;
        }

        Ok(acc.into_balance(address.to_string()))
    }

    /// Balance summary for every address with nonzero in or out, highest balance first.
    ///
    /// Addresses are grouped case-insensitively and reported in their first-seen spelling.
    pub fn get_all_balances(&self) -> Result<Vec<AddressBalance>, DbError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT from_address, to_address, value FROM transfers ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut totals: HashMap<String, (String, BalanceAccumulator)> = HashMap::new();
        for row in rows {
            let (from, to, value) = row?;
            let self_transfer = from.eq_ignore_ascii_case(&to);

            let (_, receiver) = totals
                .entry(to.to_lowercase())
                .or_insert_with(|| (to, BalanceAccumulator::default()));
            receiver.add_inflow(&value)?;
            receiver.total_transactions += 1;

            let (_, sender) = totals
                .entry(from.to_lowercase())
                .or_insert_with(|| (from, BalanceAccumulator::default()));
            sender.add_outflow(&value)?;
            if !self_transfer {
                sender.total_transactions += 1;
            }
        }

        let mut entries: Vec<(String, BalanceAccumulator)> = totals
            .into_values()
            .filter(|(_, acc)| !acc.total_in.is_zero() || !acc.total_out.is_zero())
            .collect();
        entries.sort_by(|(a_addr, a), (b_addr, b)| b.cmp_balance(a).then_with(|| a_addr.cmp(b_addr)));

        Ok(entries
            .into_iter()
            .map(|(address, acc)| acc.into_balance(address))
            .collect())
    }
}
