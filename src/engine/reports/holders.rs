// Stablescope — /holders
//
// Balances are reconstructed from the transfer table. The concentration
// denominator is the warehouse-derived circulating supply, replaced by the
// on-chain totalSupply when the two disagree by more than 10%.

use super::{fetch, fetch_one, ApiResponse};
use crate::engine::state::AppState;
use crate::engine::warehouse::queries;
use log::{error, warn};
use serde::Serialize;
use serde_json::json;
use stablescope_core::atoms::constants::{SUPPLY_DEVIATION_TOLERANCE, ZERO_ADDRESS};
use stablescope_core::metrics::{holder_distribution, reconcile_supply, HolderShare};
use stablescope_core::primitives::minor_to_tokens;
use stablescope_core::EngineResult;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldersReport {
    holders: Vec<HolderShare>,
    total_holders: i64,
}

async fn build(state: &AppState, limit: usize) -> EngineResult<HoldersReport> {
    let token = state.config.token.address_lower();
    let decimals = state.config.token.decimals;
    let d = state.warehouse.dialect();

    let (top, count, totals) = tokio::try_join!(
        fetch(state, queries::top_holders(&d, &token, limit as i64), queries::decode_holder),
        fetch_one(state, queries::holder_count(&d, &token), queries::decode_holder_count),
        fetch_one(state, queries::supply_totals(&d, &token, ZERO_ADDRESS), queries::decode_supply_totals),
    )?;

    // Burns are not transfers to a holder, so minted minus burned is the circulating figure.
    let derived = minor_to_tokens(totals.circulating(), decimals);
    let on_chain = match state.reader.total_supply(&state.config.token.address).await {
        Ok(raw) => Some(minor_to_tokens(raw as f64, decimals)),
        Err(e) => {
            warn!("[reports] On-chain totalSupply unavailable, using warehouse supply: {}", e);
            None
        }
    };
    let supply = reconcile_supply(derived, on_chain, SUPPLY_DEVIATION_TOLERANCE);

    let balances: Vec<(String, f64)> = top
        .into_iter()
        .map(|h| (h.address, minor_to_tokens(h.balance, decimals)))
        .collect();
    Ok(HoldersReport { holders: holder_distribution(&balances, supply), total_holders: count })
}

pub async fn top_holders(state: &AppState, limit: usize) -> ApiResponse {
    match build(state, limit.clamp(1, MAX_LIMIT)).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => {
            error!("[reports] Holders report falling back to sample data: {}", e);
            ApiResponse::json(500, fallback())
        }
    }
}

fn fallback() -> serde_json::Value {
    json!({
        "holders": [
            { "address": "0x688e...ac82", "balance": 180621920.5, "percentage": 28.64 },
            { "address": "0x2fb0...41a4", "balance": 144359776.77, "percentage": 22.89 },
            { "address": "0x9ceb...0328", "balance": 79922093.41, "percentage": 12.67 },
            { "address": "0x5c5d...85a0", "balance": 35642535.0, "percentage": 5.65 },
            { "address": "0x7e4b...477a", "balance": 20121862.32, "percentage": 3.19 },
            { "address": "Others", "balance": 169988157.11, "percentage": 26.96 },
        ],
        "totalHolders": 24201,
        "error": "Failed to fetch holder data",
    })
}
