// Stablescope — Chain → SQLite import
// Fills the local `token_transfers` table from Transfer logs so the sqlite
// backend can serve every report offline. Resumable: re-importing a range
// skips rows already stored.

use super::sqlite::{SqliteWarehouse, WarehouseTransfer};
use crate::engine::chain::ChainReader;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use stablescope_core::atoms::constants::TRANSFER_TOPIC;
use stablescope_core::atoms::types::RawLog;
use stablescope_core::primitives::{hex_to_decimal, topic_to_address};
use stablescope_core::{EngineError, EngineResult};
use std::collections::HashMap;

/// Blocks scanned between commits.
const IMPORT_BATCH_BLOCKS: u64 = 500;
const BLOCK_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub scanned_logs: usize,
    pub inserted: usize,
    /// Inclusive block ranges the chain reader gave up on.
    pub skipped_ranges: Vec<(u64, u64)>,
}

impl WarehouseTransfer {
    pub fn from_log(log: &RawLog, block_timestamp: i64) -> EngineResult<Self> {
        if log.topics.len() < 3 {
            return Err(EngineError::decode(
                format!("log {}:{}", log.transaction_hash, log.log_index),
                "Transfer log without indexed from/to",
            ));
        }
        Ok(WarehouseTransfer {
            address: log.address.clone(),
            transaction_hash: log.transaction_hash.clone(),
            log_index: log.log_index,
            from_address: topic_to_address(&log.topics[1])?,
            to_address: topic_to_address(&log.topics[2])?,
            quantity: hex_to_decimal(&log.data)?,
            block_number: log.block_number,
            block_timestamp,
        })
    }
}

/// Import Transfer logs for `token` in `[from, to]`.
pub async fn import_range(
    reader: &ChainReader,
    warehouse: &SqliteWarehouse,
    token: &str,
    from: u64,
    to: u64,
) -> EngineResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut block_times: HashMap<u64, i64> = HashMap::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(IMPORT_BATCH_BLOCKS - 1).min(to);
        let scan = reader.get_logs_in_range(token, &[TRANSFER_TOPIC], start, end).await;
        summary.scanned_logs += scan.logs.len();
        summary.skipped_ranges.extend(scan.skipped);

        let mut missing: Vec<u64> = scan
            .logs
            .iter()
            .map(|l| l.block_number)
            .filter(|b| !block_times.contains_key(b))
            .collect();
        missing.dedup();
        let mut headers = stream::iter(missing)
            .map(|b| async move { (b, reader.get_block(b).await) })
            .buffer_unordered(BLOCK_FETCH_CONCURRENCY);
        while let Some((block, header)) = headers.next().await {
            block_times.insert(block, header?.timestamp);
        }

        let mut rows = Vec::with_capacity(scan.logs.len());
        for log in &scan.logs {
            let Some(ts) = block_times.get(&log.block_number) else { continue };
            match WarehouseTransfer::from_log(log, *ts) {
                Ok(row) => rows.push(row),
                Err(e) => warn!("[warehouse] Skipping log during import: {}", e),
            }
        }
        summary.inserted += warehouse.insert_transfers(&rows)?;
        info!("[warehouse] Imported blocks {}-{} ({} logs)", start, end, scan.logs.len());

        if end == to {
            break;
        }
        start = end + 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::chain::ChainReaderConfig;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use stablescope_core::atoms::traits::RpcTransport;
    use stablescope_core::primitives::parse_hex_u64;
    use std::sync::Arc;
    use std::time::Duration;

    const TOKEN: &str = "0x6c3ea9036406852006290770bedfcaba0e23a0e8";

    /// One 2.5 token transfer in every even block.
    struct EvenBlocks;

    #[async_trait]
    impl RpcTransport for EvenBlocks {
        async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
            match method {
                "eth_getLogs" => {
                    let from = parse_hex_u64(params[0]["fromBlock"].as_str().unwrap_or("0x0"))?;
                    let to = parse_hex_u64(params[0]["toBlock"].as_str().unwrap_or("0x0"))?;
                    let logs: Vec<Value> = (from..=to)
                        .filter(|b| b % 2 == 0)
                        .map(|b| {
                            json!({
                                "address": TOKEN,
                                "topics": [TRANSFER_TOPIC, format!("0x{:064x}", 0xa), format!("0x{:064x}", 0xb)],
                                "data": format!("0x{:064x}", 2_500_000),
                                "blockNumber": format!("0x{:x}", b),
                                "transactionHash": format!("0x{:064x}", b),
                                "logIndex": "0x0",
                            })
                        })
                        .collect();
                    Ok(Value::Array(logs))
                }
                "eth_getBlockByNumber" => {
                    let number = params[0].as_str().unwrap_or("0x0").to_string();
                    let n = parse_hex_u64(&number)?;
                    Ok(json!({ "number": number, "timestamp": format!("0x{:x}", 1_700_000_000 + n * 12) }))
                }
                _ => Err(EngineError::rpc(method, "unsupported")),
            }
        }
    }

    #[tokio::test]
    async fn import_is_idempotent() {
        let reader = ChainReader::new(
            Arc::new(EvenBlocks),
            ChainReaderConfig { max_block_range: 5, request_delay: Duration::ZERO, max_attempts: 1 },
        );
        let warehouse = SqliteWarehouse::open_in_memory().unwrap();

        let first = import_range(&reader, &warehouse, TOKEN, 100, 119).await.unwrap();
        assert_eq!(first.scanned_logs, 10);
        assert_eq!(first.inserted, 10);
        assert!(first.skipped_ranges.is_empty());
        assert_eq!(warehouse.latest_block(TOKEN).unwrap(), Some(118));

        let again = import_range(&reader, &warehouse, TOKEN, 110, 119).await.unwrap();
        assert_eq!(again.inserted, 0);
    }

    #[test]
    fn row_from_log_uses_minor_units() {
        let log = RawLog {
            address: TOKEN.into(),
            topics: vec![TRANSFER_TOPIC.into(), format!("0x{:064x}", 0xa), format!("0x{:064x}", 0xb)],
            data: format!("0x{:064x}", 1_500_000),
            block_number: 7,
            transaction_hash: "0xabc".into(),
            log_index: 3,
            removed: false,
        };
        let row = WarehouseTransfer::from_log(&log, 42).unwrap();
        assert_eq!(row.quantity, "1500000");
        assert_eq!(row.from_address, format!("0x{:040x}", 0xa));
        assert_eq!(row.block_timestamp, 42);
    }
}
