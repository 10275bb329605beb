// Stablescope — /address-info
// The address is validated before any downstream call. Balance comes from the
// chain, history from the warehouse, commentary from the insight generator.

use super::{fetch_one, ApiResponse};
use crate::engine::state::AppState;
use crate::engine::warehouse::queries::{self, AddressFlowsRow, AddressSummaryRow};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use stablescope_core::atoms::constants::ZERO_ADDRESS;
use stablescope_core::insights::WalletStats;
use stablescope_core::primitives::{minor_to_tokens, normalize_address, round2};
use stablescope_core::EngineResult;

#[derive(Debug, Serialize)]
struct AddressReport {
    address: String,
    balance: f64,
    stats: WalletStats,
    ai_insights: Vec<String>,
}

pub(crate) fn wallet_stats(summary: &AddressSummaryRow, flows: &AddressFlowsRow, decimals: u8) -> WalletStats {
    let tokens = |minor: f64| round2(minor_to_tokens(minor, decimals));
    WalletStats {
        total_transactions: summary.total_transactions,
        first_transaction_date: summary.first_seen.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        send_transactions: flows.send_count,
        receive_transactions: flows.receive_count,
        total_sent: tokens(flows.total_sent),
        total_received: tokens(flows.total_received),
        max_sent: tokens(flows.max_sent),
        max_received: tokens(flows.max_received),
        avg_sent: tokens(flows.avg_sent),
        avg_received: tokens(flows.avg_received),
    }
}

async fn build(state: &AppState, address: &str, holder: &str) -> EngineResult<AddressReport> {
    let token = state.config.token.address_lower();
    let decimals = state.config.token.decimals;
    let d = state.warehouse.dialect();

    let (raw_balance, summary, flows) = tokio::try_join!(
        state.reader.balance_of(&state.config.token.address, holder),
        fetch_one(state, queries::address_summary(&d, &token, holder), queries::decode_address_summary),
        fetch_one(state, queries::address_flows(&d, &token, holder), queries::decode_address_flows),
    )?;

    let balance = minor_to_tokens(raw_balance as f64, decimals);
    let stats = wallet_stats(&summary, &flows, decimals);
    let ai_insights = state.insights.wallet_insights(holder, balance, &stats, state.now()).await;

    Ok(AddressReport { address: address.to_string(), balance, stats, ai_insights })
}

pub async fn address_info(state: &AppState, address: Option<&str>) -> ApiResponse {
    let Some(holder) = address.and_then(|a| normalize_address(a).ok()) else {
        return ApiResponse::error(400, "Invalid Ethereum address");
    };
    let address = address.map(str::trim).unwrap_or_default();
    info!("[reports] Address lookup {}", holder);
    match build(state, address, &holder).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => {
            error!("[reports] Address lookup failed for {}: {}", holder, e);
            ApiResponse::json(500, fallback())
        }
    }
}

fn fallback() -> serde_json::Value {
    json!({
        "address": ZERO_ADDRESS,
        "balance": 0.0,
        "stats": WalletStats::default(),
        "ai_insights": ["Unable to fetch data for this address."],
        "error": "Failed to retrieve address information",
    })
}
