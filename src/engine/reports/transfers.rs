// Stablescope — Live chain views: /transfers, /token-info, /gas-stats, /health

use super::ApiResponse;
use crate::engine::state::AppState;
use log::{error, info};
use serde_json::json;
use stablescope_core::atoms::constants::FEED_MAX_CAPACITY;
use stablescope_core::atoms::types::FeedMode;

/// The `count` most recent transfers from the feed snapshot. A feed that has
/// not initialized yet is initialized inline, or waited for when its first
/// refresh is already running.
pub async fn recent_transfers(state: &AppState, count: usize) -> ApiResponse {
    let count = count.clamp(1, FEED_MAX_CAPACITY);
    if state.feed.mode() == FeedMode::Uninitialized && state.feed.snapshot().is_empty() {
        info!("[feed] Snapshot empty, initializing before serving /transfers");
        if !state.feed.ensure_initialized().await {
            error!("[http] Transfer feed could not initialize");
            return ApiResponse::error(500, "Failed to fetch transfers");
        }
    }
    ApiResponse::ok(state.feed.latest(count))
}

pub async fn token_info(state: &AppState) -> ApiResponse {
    match state.reader.token_metadata(&state.config.token.address).await {
        Ok(meta) => ApiResponse::ok(meta),
        Err(e) => {
            error!("[chain] Token metadata failed: {}", e);
            ApiResponse::error(500, "Failed to fetch token info")
        }
    }
}

pub async fn gas_stats(state: &AppState) -> ApiResponse {
    match state.reader.fee_estimates().await {
        Ok(fees) => ApiResponse::ok(fees),
        Err(e) => {
            error!("[chain] Fee estimates failed: {}", e);
            ApiResponse::error(500, "Failed to fetch gas stats")
        }
    }
}

pub fn health(state: &AppState) -> ApiResponse {
    let status = state.feed.status();
    ApiResponse::ok(json!({
        "ok": true,
        "feed": {
            "mode": status.mode,
            "watermark": status.last_processed_block,
            "size": status.size,
        },
    }))
}
