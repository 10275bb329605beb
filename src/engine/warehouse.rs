// Stablescope — Warehouse Query Gateway
//
// Historical transfer analytics run as parameterized SQL against one of two
// backends holding the same `token_transfers` table shape:
// - bigquery: Google BigQuery public Ethereum dataset over the REST API
// - sqlite:   a local database (offline analysis, imports, tests)
//
// `import` fills the sqlite table from chain logs.
//
// Query templates live in `queries` and are written once against `Dialect`.

pub mod bigquery;
pub mod import;
pub mod queries;
pub mod sqlite;

pub use bigquery::BigQueryWarehouse;
pub use import::{import_range, ImportSummary};
pub use sqlite::{SqliteWarehouse, WarehouseTransfer};

use crate::config::{WarehouseBackend, WarehouseConfig};
use log::info;
use stablescope_core::atoms::traits::Warehouse;
use stablescope_core::EngineResult;
use std::sync::Arc;

/// Construct the configured backend.
pub fn open_warehouse(config: &WarehouseConfig) -> EngineResult<Arc<dyn Warehouse>> {
    let warehouse: Arc<dyn Warehouse> = match config.backend {
        WarehouseBackend::Bigquery => {
            info!("[warehouse] Using BigQuery table {}", config.table);
            Arc::new(BigQueryWarehouse::new(config)?)
        }
        WarehouseBackend::Sqlite => {
            info!("[warehouse] Using SQLite database {}", config.sqlite_path);
            Arc::new(SqliteWarehouse::open(&config.sqlite_path)?)
        }
    };
    Ok(warehouse)
}
