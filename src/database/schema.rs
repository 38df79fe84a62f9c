use rusqlite::{Connection, Result};

/// Initialize the database schema with required tables
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    // Append-only transfer log
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transfers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash TEXT,
            from_address TEXT,
            to_address TEXT,
            value TEXT,
            block_number INTEGER,
            token_address TEXT,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(LOWER(from_address))",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(LOWER(to_address))",
        [],
    )?;

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Run database migrations on top of the base schema
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // v2: log_index, the second half of the dedup key
    if !has_column(conn, "transfers", "log_index")? {
        conn.execute("ALTER TABLE transfers ADD COLUMN log_index INTEGER", [])?;
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_tx_log ON transfers(tx_hash, log_index)",
        [],
    )?;

    Ok(())
}
