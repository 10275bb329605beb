// ── Stablescope Atoms: Domain Types ────────────────────────────────────────
// Chain-facing value types shared by the chain reader, the live feed and the
// HTTP layer. Decoding from RPC JSON is fail-fast: a malformed field is a
// `Decode` error, never a silently defaulted value.

use crate::atoms::error::{EngineError, EngineResult};
use crate::primitives::{format_units, parse_hex_u64, topic_to_address};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Transfer event ─────────────────────────────────────────────────────────

/// A decoded ERC-20 Transfer, as served by `/transfers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Fixed-point amount with exactly `decimals` fractional digits.
    pub value: String,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub log_index: u64,
}

impl Transfer {
    /// Decode a Transfer log. `timestamp` is the unix time of the log's block.
    pub fn from_log(log: &RawLog, decimals: u8, timestamp: i64) -> EngineResult<Self> {
        if log.topics.len() < 3 {
            return Err(EngineError::decode(
                format!("log {}:{}", log.transaction_hash, log.log_index),
                format!("expected 3 topics, got {}", log.topics.len()),
            ));
        }
        let timestamp = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or_else(|| EngineError::decode("block.timestamp", format!("out of range: {}", timestamp)))?;
        Ok(Transfer {
            hash: log.transaction_hash.clone(),
            from: topic_to_address(&log.topics[1])?,
            to: topic_to_address(&log.topics[2])?,
            value: format_units(&log.data, decimals)?,
            timestamp,
            block_number: log.block_number,
            log_index: log.log_index,
        })
    }
}

/// Identity used when merging feed batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// One entry per transaction; a multi-transfer transaction keeps its latest log.
    #[default]
    TxHash,
    /// One entry per log.
    TxHashAndLogIndex,
}

impl DedupKey {
    pub fn key_for(&self, transfer: &Transfer) -> String {
        match self {
            DedupKey::TxHash => transfer.hash.to_ascii_lowercase(),
            DedupKey::TxHashAndLogIndex => format!("{}:{}", transfer.hash.to_ascii_lowercase(), transfer.log_index),
        }
    }
}

// ── Raw RPC shapes ─────────────────────────────────────────────────────────

/// A log entry as returned by eth_getLogs / eth_getFilterChanges.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub removed: bool,
}

fn str_field<'a>(v: &'a Value, context: &str, field: &str) -> EngineResult<&'a str> {
    v.get(field)
        .and_then(|f| f.as_str())
        .ok_or_else(|| EngineError::decode(context, format!("missing string field '{}'", field)))
}

impl RawLog {
    pub fn from_json(v: &Value) -> EngineResult<Self> {
        let topics = v
            .get("topics")
            .and_then(|t| t.as_array())
            .ok_or_else(|| EngineError::decode("log", "missing 'topics'"))?
            .iter()
            .map(|t| t.as_str().map(String::from).ok_or_else(|| EngineError::decode("log", "non-string topic")))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(RawLog {
            address: str_field(v, "log", "address")?.to_ascii_lowercase(),
            topics,
            data: str_field(v, "log", "data")?.to_string(),
            // Pending logs carry a null blockNumber and are rejected here.
            block_number: parse_hex_u64(str_field(v, "log", "blockNumber")?)?,
            transaction_hash: str_field(v, "log", "transactionHash")?.to_ascii_lowercase(),
            log_index: parse_hex_u64(str_field(v, "log", "logIndex")?)?,
            removed: v.get("removed").and_then(|r| r.as_bool()).unwrap_or(false),
        })
    }
}

/// The subset of a block header the engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: i64,
    pub base_fee_per_gas: Option<u128>,
}

impl BlockHeader {
    pub fn from_json(v: &Value) -> EngineResult<Self> {
        if v.is_null() {
            return Err(EngineError::decode("block", "block not found"));
        }
        let base_fee_per_gas = match v.get("baseFeePerGas").and_then(|b| b.as_str()) {
            Some(hex) => Some(crate::primitives::parse_hex_u128(hex)?),
            None => None,
        };
        Ok(BlockHeader {
            number: parse_hex_u64(str_field(v, "block", "number")?)?,
            timestamp: parse_hex_u64(str_field(v, "block", "timestamp")?)? as i64,
            base_fee_per_gas,
        })
    }
}

// ── Token & gas views ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Fixed-point total supply.
    pub total_supply: String,
}

/// Fee estimates in gwei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimates {
    pub gas_price: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
}

// ── Feed state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    Uninitialized,
    FilterActive,
    PollingFallback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_log() -> Value {
        json!({
            "address": "0x6c3ea9036406852006290770BEdFcAbA0e23A0e8",
            "topics": [
                crate::atoms::constants::TRANSFER_TOPIC,
                "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "0x000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
            ],
            "data": "0x00000000000000000000000000000000000000000000000000000000000f4240",
            "blockNumber": "0x10",
            "transactionHash": "0xABC",
            "logIndex": "0x2"
        })
    }

    #[test]
    fn decode_transfer_log() {
        let log = RawLog::from_json(&sample_log()).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.transaction_hash, "0xabc");
        let t = Transfer::from_log(&log, 6, 1_700_000_000).unwrap();
        assert_eq!(t.from, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(t.to, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(t.value, "1.000000");
        assert_eq!(t.log_index, 2);
    }

    #[test]
    fn pending_log_rejected() {
        let mut v = sample_log();
        v["blockNumber"] = Value::Null;
        assert!(matches!(RawLog::from_json(&v), Err(EngineError::Decode { .. })));
    }

    #[test]
    fn transfer_serializes_camel_case() {
        let log = RawLog::from_json(&sample_log()).unwrap();
        let t = Transfer::from_log(&log, 6, 0).unwrap();
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["blockNumber"], 16);
        assert_eq!(v["timestamp"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn dedup_keys() {
        let log = RawLog::from_json(&sample_log()).unwrap();
        let t = Transfer::from_log(&log, 6, 0).unwrap();
        assert_eq!(DedupKey::TxHash.key_for(&t), "0xabc");
        assert_eq!(DedupKey::TxHashAndLogIndex.key_for(&t), "0xabc:2");
    }

    #[test]
    fn block_header_decodes() {
        let b = BlockHeader::from_json(&json!({"number": "0x5", "timestamp": "0x64", "baseFeePerGas": "0x3b9aca00"})).unwrap();
        assert_eq!(b.number, 5);
        assert_eq!(b.timestamp, 100);
        assert_eq!(b.base_fee_per_gas, Some(1_000_000_000));
        assert!(BlockHeader::from_json(&Value::Null).is_err());
    }
}
