// Stablescope — SQLite Backend
// Same table shape as the BigQuery public dataset, with timestamps stored as
// unix seconds and quantities as decimal text.

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use stablescope_core::atoms::traits::Warehouse;
use stablescope_core::rows::{Cell, Dialect, ParamValue, Query, Row};
use stablescope_core::{EngineError, EngineResult};
use std::sync::Arc;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS token_transfers (
        address TEXT NOT NULL,
        transaction_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL DEFAULT 0,
        from_address TEXT NOT NULL,
        to_address TEXT NOT NULL,
        quantity TEXT NOT NULL,
        block_number INTEGER NOT NULL,
        block_timestamp INTEGER NOT NULL,
        PRIMARY KEY (transaction_hash, log_index)
    );
    CREATE INDEX IF NOT EXISTS idx_transfers_token_time ON token_transfers(address, block_timestamp);
    CREATE INDEX IF NOT EXISTS idx_transfers_token_block ON token_transfers(address, block_number);
    CREATE INDEX IF NOT EXISTS idx_transfers_from ON token_transfers(address, from_address);
    CREATE INDEX IF NOT EXISTS idx_transfers_to ON token_transfers(address, to_address);
";

/// One row of `token_transfers`.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseTransfer {
    pub address: String,
    pub transaction_hash: String,
    pub log_index: u64,
    pub from_address: String,
    pub to_address: String,
    /// Minor units, decimal digits.
    pub quantity: String,
    pub block_number: u64,
    pub block_timestamp: i64,
}

pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWarehouse {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::init(conn)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteWarehouse { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Insert transfers in one transaction; rows already present are skipped.
    /// Returns how many were new.
    pub fn insert_transfers(&self, transfers: &[WarehouseTransfer]) -> EngineResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO token_transfers
                 (address, transaction_hash, log_index, from_address, to_address, quantity, block_number, block_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for t in transfers {
                inserted += stmt.execute(params![
                    t.address.to_ascii_lowercase(),
                    t.transaction_hash.to_ascii_lowercase(),
                    t.log_index as i64,
                    t.from_address.to_ascii_lowercase(),
                    t.to_address.to_ascii_lowercase(),
                    t.quantity,
                    t.block_number as i64,
                    t.block_timestamp,
                ])?;
            }
        }
        tx.commit()?;
        info!("[warehouse] Stored {} of {} transfers", inserted, transfers.len());
        Ok(inserted)
    }

    /// Highest stored block for a token, used to resume imports.
    pub fn latest_block(&self, token: &str) -> EngineResult<Option<u64>> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(block_number) FROM token_transfers WHERE address = ?1",
            params![token.to_ascii_lowercase()],
            |r| r.get(0),
        )?;
        Ok(max.map(|b| b as u64))
    }
}

fn to_cell(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Int(i),
        ValueRef::Real(f) => Cell::Float(f),
        ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Cell::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Run a query synchronously. Parameters the statement does not reference are
/// ignored, since templates share parameter sets across dialects.
fn run_query(conn: &Connection, query: &Query) -> EngineResult<Vec<Row>> {
    let mut stmt = conn
        .prepare(&query.sql)
        .map_err(|e| EngineError::warehouse(query.name, e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    for param in &query.params {
        let Some(index) = stmt.parameter_index(&format!("@{}", param.name))? else {
            continue;
        };
        match &param.value {
            ParamValue::Text(s) => stmt.raw_bind_parameter(index, s)?,
            ParamValue::Int(i) => stmt.raw_bind_parameter(index, i)?,
            ParamValue::Float(f) => stmt.raw_bind_parameter(index, f)?,
        }
    }

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(r) = rows.next()? {
        let mut row = Row::new();
        for (i, name) in columns.iter().enumerate() {
            row.insert(name, to_cell(r.get_ref(i)?));
        }
        out.push(row);
    }
    Ok(out)
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, query: &Query) -> EngineResult<Vec<Row>> {
        let conn = self.conn.clone();
        let owned = query.clone();
        let rows = tokio::task::spawn_blocking(move || run_query(&conn.lock(), &owned))
            .await
            .map_err(|e| EngineError::warehouse(query.name, format!("query task failed: {}", e)))??;
        debug!("[warehouse] {} returned {} rows", query.name, rows.len());
        Ok(rows)
    }
}
