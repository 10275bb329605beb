// Stablescope — end-to-end tests through the HTTP router.
// A scripted chain and an in-memory SQLite warehouse stand in for the node and
// BigQuery; the clock is pinned so report windows are reproducible.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use stablescope::config::StablescopeConfig;
use stablescope::engine::providers::{AnyGenerator, DisabledGenerator};
use stablescope::engine::server::route;
use stablescope::engine::warehouse::{SqliteWarehouse, WarehouseTransfer};
use stablescope::AppState;
use stablescope_core::atoms::constants::{TRANSFER_TOPIC, ZERO_ADDRESS};
use stablescope_core::atoms::traits::RpcTransport;
use stablescope_core::primitives::parse_hex_u64;
use stablescope_core::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "0x6c3ea9036406852006290770bedfcaba0e23a0e8";
const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b2";
const CAROL: &str = "0x00000000000000000000000000000000000000c3";
const HEAD: u64 = 1_000;
const UNIT: u64 = 1_000_000;

/// 2024-06-15T12:00:00Z
fn fixed_now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_718_452_800, 0).unwrap()
}

fn now_secs() -> i64 {
    fixed_now().timestamp()
}

// ── Scripted chain ─────────────────────────────────────────────────────────

/// Seven 1.5-token transfers: two in block 998, two in 999, three in 1000.
/// Every eth_getLogs range is recorded.
struct ScriptedChain {
    log_ranges: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedChain {
    fn new() -> Arc<Self> {
        Arc::new(ScriptedChain { log_ranges: Mutex::new(Vec::new()) })
    }

    fn logs() -> Vec<(u64, u64)> {
        vec![(998, 0), (998, 1), (999, 0), (999, 1), (1000, 0), (1000, 1), (1000, 2)]
    }
}

fn topic(addr: &str) -> String {
    format!("0x{:0>64}", addr.trim_start_matches("0x"))
}

fn uint_word(value: u64) -> String {
    format!("0x{:064x}", value)
}

#[async_trait]
impl RpcTransport for ScriptedChain {
    async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
        match method {
            "eth_blockNumber" => Ok(json!(format!("0x{:x}", HEAD))),
            "eth_getLogs" => {
                let from = parse_hex_u64(params[0]["fromBlock"].as_str().unwrap_or("0x0"))?;
                let to = parse_hex_u64(params[0]["toBlock"].as_str().unwrap_or("0x0"))?;
                self.log_ranges.lock().push((from, to));
                if to - from + 1 > 5 {
                    return Err(EngineError::rpc(method, "block range too wide"));
                }
                let logs: Vec<Value> = Self::logs()
                    .into_iter()
                    .filter(|(block, _)| (from..=to).contains(block))
                    .map(|(block, index)| {
                        json!({
                            "address": TOKEN,
                            "topics": [TRANSFER_TOPIC, topic(ALICE), topic(BOB)],
                            "data": uint_word(1_500_000),
                            "blockNumber": format!("0x{:x}", block),
                            "transactionHash": format!("0x{:060x}{:04x}", block, index),
                            "logIndex": format!("0x{:x}", index),
                        })
                    })
                    .collect();
                Ok(Value::Array(logs))
            }
            "eth_getBlockByNumber" => {
                let number = params[0].as_str().unwrap_or("0x0");
                let n = if number == "latest" { HEAD } else { parse_hex_u64(number)? };
                Ok(json!({
                    "number": format!("0x{:x}", n),
                    "timestamp": format!("0x{:x}", now_secs() as u64 - (HEAD - n) * 12),
                    "baseFeePerGas": "0x3b9aca00",
                }))
            }
            "eth_newFilter" => Ok(json!("0x1")),
            "eth_call" => {
                let data = params[0]["data"].as_str().unwrap_or_default();
                if data.starts_with("0x70a08231") {
                    Ok(json!(uint_word(850 * UNIT)))
                } else if data.starts_with("0x18160ddd") {
                    Ok(json!(uint_word(1_000 * UNIT)))
                } else {
                    Err(EngineError::rpc(method, "execution reverted"))
                }
            }
            _ => Err(EngineError::rpc(method, "unsupported")),
        }
    }
}

/// A healthy node that takes a while to answer.
struct SlowChain {
    inner: Arc<ScriptedChain>,
}

#[async_trait]
impl RpcTransport for SlowChain {
    async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.call(method, params).await
    }
}

// ── Fixtures ───────────────────────────────────────────────────────────────

fn row(hash: u64, from: &str, to: &str, tokens: u64, block: u64, age_secs: i64) -> WarehouseTransfer {
    WarehouseTransfer {
        address: TOKEN.into(),
        transaction_hash: format!("0x{:064x}", hash),
        log_index: 0,
        from_address: from.into(),
        to_address: to.into(),
        quantity: (tokens * UNIT).to_string(),
        block_number: block,
        block_timestamp: now_secs() - age_secs,
    }
}

/// Alice is minted 1000, sends 100 to Bob and 50 to Carol in the last day;
/// Bob paid Carol 10 ten days ago.
fn seeded_warehouse() -> SqliteWarehouse {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    warehouse
        .insert_transfers(&[
            row(1, ZERO_ADDRESS, ALICE, 1_000, 10, 3 * 86_400),
            row(2, BOB, CAROL, 10, 5, 10 * 86_400),
            row(3, ALICE, BOB, 100, 20, 2 * 3_600),
            row(4, ALICE, CAROL, 50, 21, 3_600),
        ])
        .unwrap();
    warehouse
}

fn state_with(chain: Arc<dyn RpcTransport>) -> AppState {
    let mut config = StablescopeConfig::default();
    config.chain.request_delay_ms = 0;
    AppState::new(
        config,
        chain,
        Arc::new(seeded_warehouse()),
        AnyGenerator::new(Arc::new(DisabledGenerator)),
    )
    .with_clock(fixed_now)
}

// ── Live feed ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn transfers_newest_first_with_exact_decimals() {
    let state = state_with(ScriptedChain::new());
    let resp = route(&state, "GET", "/transfers?count=5").await;
    assert_eq!(resp.status, 200);

    let items = resp.body.as_array().unwrap();
    assert_eq!(items.len(), 5);
    let blocks: Vec<u64> = items.iter().map(|t| t["blockNumber"].as_u64().unwrap()).collect();
    assert_eq!(blocks, vec![1000, 1000, 1000, 999, 999]);
    for t in items {
        assert_eq!(t["value"], "1.500000");
        assert_eq!(t["from"], ALICE);
    }

    let health = route(&state, "GET", "/health").await;
    assert_eq!(health.body["feed"]["mode"], "filter_active");
    assert_eq!(health.body["feed"]["watermark"], HEAD);
    assert_eq!(health.body["feed"]["size"], 7);
}

#[tokio::test]
async fn transfers_during_startup_wait_for_the_feed() {
    let state = state_with(Arc::new(SlowChain { inner: ScriptedChain::new() }));
    state.feed.spawn();
    tokio::time::sleep(Duration::from_millis(2)).await;

    let resp = route(&state, "GET", "/transfers?count=3").await;
    assert_eq!(resp.status, 200, "{}", resp.body);
    let blocks: Vec<u64> = resp.body.as_array().unwrap().iter().map(|t| t["blockNumber"].as_u64().unwrap()).collect();
    assert_eq!(blocks, vec![1000, 1000, 1000]);
    state.feed.shutdown().await;
}

#[tokio::test]
async fn wide_log_ranges_are_chunked() {
    let chain = ScriptedChain::new();
    let state = state_with(chain.clone());
    let scan = state.reader.get_logs_in_range(TOKEN, &[TRANSFER_TOPIC], 978, 1000).await;

    assert_eq!(scan.logs.len(), 7);
    assert!(scan.skipped.is_empty());
    let ranges = chain.log_ranges.lock().clone();
    assert_eq!(ranges.len(), 5);
    assert!(ranges.iter().all(|(a, b)| b - a + 1 <= 5));
    assert_eq!(ranges.first(), Some(&(978, 982)));
    assert_eq!(ranges.last(), Some(&(998, 1000)));
}

// ── Warehouse reports ──────────────────────────────────────────────────────

#[tokio::test]
async fn holders_include_others_remainder() {
    let state = state_with(ScriptedChain::new());
    let resp = route(&state, "GET", "/holders?limit=2").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["totalHolders"], 3);

    let holders = resp.body["holders"].as_array().unwrap();
    assert_eq!(holders.len(), 3);
    assert_eq!(holders[0]["address"], ALICE);
    assert_eq!(holders[0]["balance"], 850.0);
    assert_eq!(holders[0]["percentage"], 85.0);
    assert_eq!(holders[1]["address"], BOB);
    assert_eq!(holders[2]["address"], "Others");
    assert_eq!(holders[2]["percentage"], 6.0);
}

#[tokio::test]
async fn supply_and_volume_reports() {
    let state = state_with(ScriptedChain::new());

    let supply = route(&state, "GET", "/token-supply").await;
    assert_eq!(supply.status, 200);
    assert_eq!(supply.body["current_supply"], 1000.0);
    assert_eq!(supply.body["total_burned"], 0.0);
    assert_eq!(supply.body["supply_history"][0]["date"], "Jun 12, 2024");

    let volume = route(&state, "GET", "/api/transaction-volume?period=7d").await;
    assert_eq!(volume.status, 200);
    assert_eq!(volume.body["summary"]["volume_24h"], 150.0);
    assert!(volume.body["data"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn address_info_combines_chain_and_warehouse() {
    let state = state_with(ScriptedChain::new());
    let target = format!("/address-info?address={}", ALICE);
    let resp = route(&state, "GET", &target).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["balance"], 850.0);
    assert_eq!(resp.body["stats"]["total_transactions"], 3);
    assert_eq!(resp.body["stats"]["send_transactions"], 2);
    assert_eq!(resp.body["stats"]["total_sent"], 150.0);
    assert_eq!(resp.body["stats"]["first_transaction_date"], "2024-06-12T12:00:00Z");
    assert!(!resp.body["ai_insights"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn mev_and_predictions_render() {
    let state = state_with(ScriptedChain::new());
    let mev = route(&state, "GET", "/mev").await;
    assert_eq!(mev.status, 200, "{}", mev.body);

    let predictions = route(&state, "GET", "/predictions").await;
    assert_eq!(predictions.status, 200, "{}", predictions.body);
    assert!(predictions.body["predictions"].is_array());
}

// ── Request validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let state = state_with(ScriptedChain::new());
    assert_eq!(route(&state, "GET", "/does-not-exist").await.status, 404);
    assert_eq!(route(&state, "DELETE", "/transfers").await.status, 405);
    assert_eq!(route(&state, "GET", "/transfers?count=many").await.status, 400);
    assert_eq!(route(&state, "GET", "/holders?limit=-1").await.status, 400);
    assert_eq!(route(&state, "GET", "/address-info?address=bob").await.status, 400);
}
