// Stablescope — /predictions

use super::{fetch, fetch_one, ApiResponse};
use crate::engine::state::AppState;
use crate::engine::warehouse::queries::{self, HourlyRow};
use chrono::{DateTime, SecondsFormat, Utc};
use log::error;
use serde::Serialize;
use stablescope_core::atoms::constants::{WALLET_PATTERN_MIN_TRANSFERS, WHALE_THRESHOLD_TOKENS};
use stablescope_core::insights::MarketPrediction;
use stablescope_core::metrics::{hourly_averages, market_trends, MarketSnapshot};
use stablescope_core::primitives::{minor_to_tokens, round2};
use stablescope_core::EngineResult;

const LOOKBACK_SECS: i64 = 7 * 86_400;
const PATTERN_WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionReport {
    timestamp: String,
    predictions: Vec<MarketPrediction>,
    /// Most recent hourly bucket; null when the week had no activity.
    market_data: Option<MarketSnapshot>,
}

fn rfc3339(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Hourly rows (newest first) as snapshots in whole tokens. Wallet pattern
/// counts cover the trailing day and are attached to every bucket.
pub(crate) fn snapshots(rows: &[HourlyRow], accumulation: i64, distribution: i64, decimals: u8) -> Vec<MarketSnapshot> {
    let tokens = |minor: f64| round2(minor_to_tokens(minor, decimals));
    rows.iter()
        .map(|r| MarketSnapshot {
            timestamp: rfc3339(r.hour),
            transaction_count: r.transaction_count,
            volume: tokens(r.volume),
            unique_senders: r.unique_senders,
            unique_receivers: r.unique_receivers,
            max_transfer: tokens(r.max_transfer),
            whale_transactions: r.whale_transactions,
            whale_volume: tokens(r.whale_volume),
            accumulation_wallets: accumulation,
            distribution_wallets: distribution,
        })
        .collect()
}

fn quiet_snapshot(now: DateTime<Utc>, accumulation: i64, distribution: i64) -> MarketSnapshot {
    MarketSnapshot {
        timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        transaction_count: 0,
        volume: 0.0,
        unique_senders: 0,
        unique_receivers: 0,
        max_transfer: 0.0,
        whale_transactions: 0,
        whale_volume: 0.0,
        accumulation_wallets: accumulation,
        distribution_wallets: distribution,
    }
}

async fn build(state: &AppState) -> EngineResult<PredictionReport> {
    let token = state.config.token.address_lower();
    let decimals = state.config.token.decimals;
    let d = state.warehouse.dialect();
    let now = state.now();
    let whale_min = (WHALE_THRESHOLD_TOKENS as i64).saturating_mul(10i64.saturating_pow(u32::from(decimals)));

    let (hourly, (accumulation, distribution)) = tokio::try_join!(
        fetch(
            state,
            queries::hourly_activity(&d, &token, now.timestamp() - LOOKBACK_SECS, whale_min),
            queries::decode_hourly,
        ),
        fetch_one(
            state,
            queries::wallet_patterns(
                &d,
                &token,
                now.timestamp() - PATTERN_WINDOW_SECS,
                i64::from(WALLET_PATTERN_MIN_TRANSFERS),
            ),
            queries::decode_wallet_patterns,
        ),
    )?;

    let series = snapshots(&hourly, accumulation, distribution, decimals);
    let current = series
        .first()
        .cloned()
        .unwrap_or_else(|| quiet_snapshot(now, accumulation, distribution));
    let predictions = state
        .insights
        .predictions(&current, &market_trends(&series), &hourly_averages(&series))
        .await;

    Ok(PredictionReport {
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        predictions,
        market_data: series.into_iter().next(),
    })
}

pub async fn market_predictions(state: &AppState) -> ApiResponse {
    match build(state).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => {
            error!("[reports] Market predictions failed: {}", e);
            ApiResponse::failure("Failed to generate market predictions", &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_convert_units() {
        let rows = vec![HourlyRow {
            hour: 1_717_200_000,
            transaction_count: 3,
            volume: 150_000_000_000.0,
            unique_senders: 2,
            unique_receivers: 3,
            max_transfer: 120_000_000_000.0,
            whale_transactions: 1,
            whale_volume: 120_000_000_000.0,
        }];
        let s = snapshots(&rows, 4, 1, 6);
        assert_eq!(s[0].timestamp, "2024-06-01T00:00:00Z");
        assert_eq!(s[0].volume, 150_000.0);
        assert_eq!(s[0].whale_volume, 120_000.0);
        assert_eq!(s[0].accumulation_wallets, 4);
        let v = serde_json::to_value(&s[0]).unwrap();
        assert_eq!(v["transactionCount"], 3);
    }
}
