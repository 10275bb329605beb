// Stablescope — Chain Reader Operations
//
// Typed read operations over any `RpcTransport`. The provider caps
// eth_getLogs at a few blocks per call, so wide ranges are walked in
// sequential sub-ranges with a short pause between calls. A sub-range that
// keeps failing is logged and skipped; a scan never fails as a whole.

use super::abi::{self, Erc20Call};
use crate::config::ChainConfig;
use log::{debug, warn};
use serde_json::{json, Value};
use stablescope_core::atoms::traits::RpcTransport;
use stablescope_core::atoms::types::{BlockHeader, FeeEstimates, RawLog, TokenMetadata};
use stablescope_core::primitives::{format_decimal_digits, hex_encode, parse_address, parse_hex_u128, parse_hex_u64, wei_to_gwei};
use stablescope_core::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;

/// Priority fee used when the node does not support eth_maxPriorityFeePerGas (1.5 gwei).
const DEFAULT_PRIORITY_FEE_WEI: u128 = 1_500_000_000;

#[derive(Debug, Clone)]
pub struct ChainReaderConfig {
    pub max_block_range: u64,
    pub request_delay: Duration,
    pub max_attempts: u32,
}

impl From<&ChainConfig> for ChainReaderConfig {
    fn from(chain: &ChainConfig) -> Self {
        ChainReaderConfig {
            max_block_range: chain.max_block_range,
            request_delay: Duration::from_millis(chain.request_delay_ms),
            max_attempts: chain.max_attempts,
        }
    }
}

/// Result of a chunked log scan.
#[derive(Debug, Default)]
pub struct LogScan {
    pub logs: Vec<RawLog>,
    /// Inclusive sub-ranges given up on after all attempts.
    pub skipped: Vec<(u64, u64)>,
}

/// Split `[from, to]` into consecutive inclusive ranges of at most `width` blocks.
pub fn split_range(from: u64, to: u64, width: u64) -> Vec<(u64, u64)> {
    let width = width.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(width - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

fn as_str<'a>(method: &str, v: &'a Value) -> EngineResult<&'a str> {
    v.as_str()
        .ok_or_else(|| EngineError::rpc(method, format!("expected string result, got {}", v)))
}

/// Decode a log array, dropping (and logging) malformed or removed entries.
fn decode_logs(method: &str, v: &Value) -> EngineResult<Vec<RawLog>> {
    let items = v
        .as_array()
        .ok_or_else(|| EngineError::rpc(method, "expected an array of logs"))?;
    Ok(items
        .iter()
        .filter_map(|item| match RawLog::from_json(item) {
            Ok(log) if !log.removed => Some(log),
            Ok(_) => None,
            Err(e) => {
                warn!("[chain] Skipping malformed log from {}: {}", method, e);
                None
            }
        })
        .collect())
}

pub struct ChainReader {
    transport: Arc<dyn RpcTransport>,
    config: ChainReaderConfig,
}

impl ChainReader {
    pub fn new(transport: Arc<dyn RpcTransport>, config: ChainReaderConfig) -> Self {
        ChainReader { transport, config }
    }

    pub fn max_block_range(&self) -> u64 {
        self.config.max_block_range
    }

    // ── Blocks ─────────────────────────────────────────────────────────

    pub async fn current_block_number(&self) -> EngineResult<u64> {
        let result = self.transport.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(as_str("eth_blockNumber", &result)?)
    }

    pub async fn get_block(&self, number: u64) -> EngineResult<BlockHeader> {
        let result = self
            .transport
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?;
        BlockHeader::from_json(&result)
    }

    pub async fn latest_block(&self) -> EngineResult<BlockHeader> {
        let result = self.transport.call("eth_getBlockByNumber", json!(["latest", false])).await?;
        BlockHeader::from_json(&result)
    }

    // ── Logs ───────────────────────────────────────────────────────────

    async fn get_logs_once(&self, address: &str, topics: &[&str], from: u64, to: u64) -> EngineResult<Vec<RawLog>> {
        let filter = json!({
            "address": address,
            "topics": topics,
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
        });
        let result = self.transport.call("eth_getLogs", json!([filter])).await?;
        decode_logs("eth_getLogs", &result)
    }

    /// Logs for `address` in `[from, to]`, issued as `ceil(width / max_block_range)`
    /// sequential sub-queries.
    pub async fn get_logs_in_range(&self, address: &str, topics: &[&str], from: u64, to: u64) -> LogScan {
        let mut scan = LogScan::default();
        if from > to {
            return scan;
        }
        let ranges = split_range(from, to, self.config.max_block_range);
        let last = ranges.len().saturating_sub(1);
        for (i, (start, end)) in ranges.into_iter().enumerate() {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.get_logs_once(address, topics, start, end).await {
                    Ok(logs) => {
                        scan.logs.extend(logs);
                        break;
                    }
                    Err(e) if attempt < self.config.max_attempts => {
                        debug!("[chain] eth_getLogs {}-{} attempt {} failed: {}", start, end, attempt, e);
                        tokio::time::sleep(self.config.request_delay * attempt).await;
                    }
                    Err(e) => {
                        warn!("[chain] Skipping blocks {}-{} after {} attempts: {}", start, end, attempt, e);
                        scan.skipped.push((start, end));
                        break;
                    }
                }
            }
            if i < last && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
        }
        scan
    }

    // ── Contract reads ─────────────────────────────────────────────────

    pub async fn eth_call(&self, to: &str, data: &[u8]) -> EngineResult<String> {
        let result = self
            .transport
            .call("eth_call", json!([{ "to": to, "data": hex_encode(data) }, "latest"]))
            .await?;
        Ok(as_str("eth_call", &result)?.to_string())
    }

    /// Raw token balance in minor units.
    pub async fn balance_of(&self, token: &str, holder: &str) -> EngineResult<u128> {
        let holder = parse_address(holder)?;
        let raw = self.eth_call(token, &Erc20Call::BalanceOf(&holder).calldata()).await?;
        abi::decode_uint(&raw)
    }

    pub async fn total_supply(&self, token: &str) -> EngineResult<u128> {
        let raw = self.eth_call(token, &Erc20Call::TotalSupply.calldata()).await?;
        abi::decode_uint(&raw)
    }

    pub async fn token_metadata(&self, token: &str) -> EngineResult<TokenMetadata> {
        let (name_call, symbol_call, decimals_call) =
            (Erc20Call::Name.calldata(), Erc20Call::Symbol.calldata(), Erc20Call::Decimals.calldata());
        let (name, symbol, decimals, supply) = tokio::try_join!(
            self.eth_call(token, &name_call),
            self.eth_call(token, &symbol_call),
            self.eth_call(token, &decimals_call),
            self.total_supply(token),
        )?;
        let decimals = u8::try_from(abi::decode_uint(&decimals)?)
            .map_err(|_| EngineError::decode("decimals()", "does not fit in u8"))?;
        Ok(TokenMetadata {
            name: abi::decode_abi_string(&name)?,
            symbol: abi::decode_abi_string(&symbol)?,
            decimals,
            total_supply: format_decimal_digits(&supply.to_string(), decimals),
        })
    }

    // ── Fees ───────────────────────────────────────────────────────────

    /// Gas price plus EIP-1559 estimates: max fee = 2 × base fee + priority fee.
    pub async fn fee_estimates(&self) -> EngineResult<FeeEstimates> {
        let gas_price = self.transport.call("eth_gasPrice", json!([])).await?;
        let gas_price = parse_hex_u128(as_str("eth_gasPrice", &gas_price)?)?;

        let priority = match self.transport.call("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(v) => parse_hex_u128(as_str("eth_maxPriorityFeePerGas", &v)?)?,
            Err(e) => {
                debug!("[chain] eth_maxPriorityFeePerGas unavailable, using default: {}", e);
                DEFAULT_PRIORITY_FEE_WEI
            }
        };
        let base_fee = self.latest_block().await?.base_fee_per_gas.unwrap_or(gas_price);
        let max_fee = base_fee.saturating_mul(2).saturating_add(priority);

        Ok(FeeEstimates {
            gas_price: wei_to_gwei(gas_price),
            max_fee_per_gas: wei_to_gwei(max_fee),
            max_priority_fee_per_gas: wei_to_gwei(priority),
        })
    }

    // ── Filters ────────────────────────────────────────────────────────

    /// Install a log filter from the next block on; returns its id.
    pub async fn new_filter(&self, address: &str, topics: &[&str]) -> EngineResult<String> {
        let result = self
            .transport
            .call("eth_newFilter", json!([{ "address": address, "topics": topics }]))
            .await?;
        Ok(as_str("eth_newFilter", &result)?.to_string())
    }

    pub async fn filter_changes(&self, filter_id: &str) -> EngineResult<Vec<RawLog>> {
        let result = self.transport.call("eth_getFilterChanges", json!([filter_id])).await?;
        decode_logs("eth_getFilterChanges", &result)
    }

    pub async fn uninstall_filter(&self, filter_id: &str) -> EngineResult<bool> {
        let result = self.transport.call("eth_uninstallFilter", json!([filter_id])).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use stablescope_core::atoms::constants::TRANSFER_TOPIC;

    const TOKEN: &str = "0x6c3ea9036406852006290770bedfcaba0e23a0e8";

    /// Serves eth_getLogs from a fixed set of logs, one per block, and
    /// records every requested range.
    struct FakeLogs {
        blocks_with_logs: Vec<u64>,
        calls: Mutex<Vec<(u64, u64)>>,
        fail_range_starting_at: Option<u64>,
    }

    fn log_json(block: u64) -> Value {
        json!({
            "address": TOKEN,
            "topics": [TRANSFER_TOPIC, format!("0x{:064x}", 1), format!("0x{:064x}", 2)],
            "data": format!("0x{:064x}", 1_000_000),
            "blockNumber": format!("0x{:x}", block),
            "transactionHash": format!("0x{:064x}", block),
            "logIndex": "0x0",
        })
    }

    #[async_trait]
    impl RpcTransport for FakeLogs {
        async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
            match method {
                "eth_getLogs" => {
                    let filter = &params[0];
                    let from = parse_hex_u64(filter["fromBlock"].as_str().unwrap())?;
                    let to = parse_hex_u64(filter["toBlock"].as_str().unwrap())?;
                    self.calls.lock().push((from, to));
                    if to - from + 1 > 5 {
                        return Err(EngineError::rpc(method, "range too wide"));
                    }
                    if self.fail_range_starting_at == Some(from) {
                        return Err(EngineError::rpc(method, "upstream error"));
                    }
                    let logs: Vec<Value> = self
                        .blocks_with_logs
                        .iter()
                        .filter(|b| (from..=to).contains(*b))
                        .map(|b| log_json(*b))
                        .collect();
                    Ok(Value::Array(logs))
                }
                "eth_gasPrice" => Ok(json!("0x6fc23ac00")),
                "eth_maxPriorityFeePerGas" => Err(EngineError::rpc(method, "method not found")),
                "eth_getBlockByNumber" => Ok(json!({"number": "0x1", "timestamp": "0x0", "baseFeePerGas": "0x3b9aca00"})),
                _ => Err(EngineError::rpc(method, "unsupported")),
            }
        }
    }

    fn reader(fake: Arc<FakeLogs>) -> ChainReader {
        ChainReader::new(
            fake,
            ChainReaderConfig { max_block_range: 5, request_delay: Duration::ZERO, max_attempts: 2 },
        )
    }

    #[test]
    fn split_range_widths() {
        assert_eq!(split_range(1, 12, 5), vec![(1, 5), (6, 10), (11, 12)]);
        assert_eq!(split_range(7, 7, 5), vec![(7, 7)]);
        assert!(split_range(8, 7, 5).is_empty());
        for width in 1..=23u64 {
            let ranges = split_range(100, 100 + width - 1, 5);
            assert_eq!(ranges.len() as u64, width.div_ceil(5));
            assert!(ranges.iter().all(|(a, b)| b - a + 1 <= 5));
        }
    }

    #[tokio::test]
    async fn chunked_scan_matches_full_range() {
        let fake = Arc::new(FakeLogs {
            blocks_with_logs: vec![100, 103, 105, 111, 122],
            calls: Mutex::new(Vec::new()),
            fail_range_starting_at: None,
        });
        let scan = reader(fake.clone()).get_logs_in_range(TOKEN, &[TRANSFER_TOPIC], 100, 122).await;
        // 23 blocks → 5 calls of at most 5 blocks.
        assert_eq!(fake.calls.lock().len(), 5);
        let blocks: Vec<u64> = scan.logs.iter().map(|l| l.block_number).collect();
        assert_eq!(blocks, vec![100, 103, 105, 111, 122]);
        assert!(scan.skipped.is_empty());
    }

    #[tokio::test]
    async fn failing_subrange_is_skipped() {
        let fake = Arc::new(FakeLogs {
            blocks_with_logs: vec![100, 106, 111],
            calls: Mutex::new(Vec::new()),
            fail_range_starting_at: Some(105),
        });
        let scan = reader(fake.clone()).get_logs_in_range(TOKEN, &[TRANSFER_TOPIC], 100, 114).await;
        assert_eq!(scan.skipped, vec![(105, 109)]);
        let blocks: Vec<u64> = scan.logs.iter().map(|l| l.block_number).collect();
        assert_eq!(blocks, vec![100, 111]);
        // 3 ranges, the failing one attempted twice.
        assert_eq!(fake.calls.lock().len(), 4);
    }

    #[tokio::test]
    async fn fee_estimates_fall_back_on_priority() {
        let fake = Arc::new(FakeLogs { blocks_with_logs: vec![], calls: Mutex::new(Vec::new()), fail_range_starting_at: None });
        let fees = reader(fake).fee_estimates().await.unwrap();
        assert_eq!(fees.gas_price, "30");
        assert_eq!(fees.max_priority_fee_per_gas, "1.5");
        assert_eq!(fees.max_fee_per_gas, "3.5");
    }

    /// Answers the ERC-20 view calls by selector.
    struct Erc20Node;

    fn abi_string(text: &str) -> String {
        let hex: String = text.bytes().map(|b| format!("{:02x}", b)).collect();
        format!("0x{:064x}{:064x}{:0<64}", 32, text.len(), hex)
    }

    #[async_trait]
    impl RpcTransport for Erc20Node {
        async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
            assert_eq!(method, "eth_call");
            assert_eq!(params[0]["to"], TOKEN);
            assert_eq!(params[1], "latest");
            let data = params[0]["data"].as_str().unwrap_or_default();
            match &data[..10] {
                "0x06fdde03" => Ok(json!(abi_string("PayPal USD"))),
                // bytes32-style symbol
                "0x95d89b41" => Ok(json!(format!("0x{:0<64}", "5059555344"))),
                "0x313ce567" => Ok(json!(format!("0x{:064x}", 6))),
                "0x18160ddd" => Ok(json!(format!("0x{:064x}", 1_234_500_000u64))),
                other => Err(EngineError::rpc(method, format!("unknown selector {}", other))),
            }
        }
    }

    #[tokio::test]
    async fn token_metadata_decodes_every_field() {
        let reader = ChainReader::new(
            Arc::new(Erc20Node),
            ChainReaderConfig { max_block_range: 5, request_delay: Duration::ZERO, max_attempts: 1 },
        );
        let meta = reader.token_metadata(TOKEN).await.unwrap();
        assert_eq!(meta.name, "PayPal USD");
        assert_eq!(meta.symbol, "PYUSD");
        assert_eq!(meta.decimals, 6);
        assert_eq!(meta.total_supply, "1234.500000");
    }

    #[tokio::test]
    async fn token_metadata_fails_when_a_call_fails() {
        let fake = Arc::new(FakeLogs { blocks_with_logs: vec![], calls: Mutex::new(Vec::new()), fail_range_starting_at: None });
        assert!(reader(fake).token_metadata(TOKEN).await.is_err());
    }
}
