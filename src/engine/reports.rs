// Stablescope — Report Builders
//
// One builder per API view. Each returns an `ApiResponse` and never an
// error: upstream failures are logged here and turned into the view's
// fallback body (status 500), so the HTTP layer only serializes.
//
// - transfers:  live feed snapshot, token metadata, gas, health
// - holders:    top holders and concentration
// - supply:     mint/burn totals, cumulative history, period averages
// - volume:     daily volume series and window comparisons
// - mev:        block classification, risk score and commentary
// - market:     hourly activity and predictions
// - address:    single-wallet lookup with commentary

pub mod address;
pub mod holders;
pub mod market;
pub mod mev;
pub mod supply;
pub mod transfers;
pub mod volume;

use crate::engine::state::AppState;
use chrono::{Datelike, NaiveDate};
use log::error;
use serde::Serialize;
use serde_json::{json, Value};
use stablescope_core::rows::{decode_rows, decode_single, Query, Row};
use stablescope_core::{EngineError, EngineResult};

// ── Response ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn json(status: u16, body: Value) -> Self {
        ApiResponse { status, body }
    }

    pub fn ok(body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => ApiResponse::json(200, value),
            Err(e) => {
                error!("[http] Response serialization failed: {}", e);
                ApiResponse::error(500, "Failed to serialize response")
            }
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        ApiResponse::json(status, json!({ "error": message.into() }))
    }

    /// `{error, details}`; 400 for caller mistakes, 500 otherwise.
    pub fn failure(message: &str, err: &EngineError) -> Self {
        let status = if err.is_client_error() { 400 } else { 500 };
        ApiResponse::json(status, json!({ "error": message, "details": err.to_string() }))
    }
}

// ── Warehouse access ───────────────────────────────────────────────────────

/// Run one template under the warehouse timeout and decode every row.
pub(crate) async fn fetch<T>(
    state: &AppState,
    query: Query,
    decode: impl Fn(&Row) -> EngineResult<T>,
) -> EngineResult<Vec<T>> {
    let rows = tokio::time::timeout(state.warehouse_timeout(), state.warehouse.query(&query))
        .await
        .map_err(|_| EngineError::Timeout(format!("warehouse query {}", query.name)))??;
    decode_rows(query.name, &rows, decode)
}

/// Like `fetch` for single-row aggregates.
pub(crate) async fn fetch_one<T>(
    state: &AppState,
    query: Query,
    decode: impl Fn(&Row) -> EngineResult<T>,
) -> EngineResult<T> {
    let rows = tokio::time::timeout(state.warehouse_timeout(), state.warehouse.query(&query))
        .await
        .map_err(|_| EngineError::Timeout(format!("warehouse query {}", query.name)))??;
    decode_single(query.name, &rows, decode)
}

// ── Labels ─────────────────────────────────────────────────────────────────

/// "Jan 5"
pub(crate) fn short_day_label(day: NaiveDate) -> String {
    format!("{} {}", day.format("%b"), day.day())
}

/// "Jan 5, 2024"
pub(crate) fn long_day_label(day: NaiveDate) -> String {
    format!("{} {}, {}", day.format("%b"), day.day(), day.year())
}

/// "2024-03" → "Mar 2024"; anything unparseable is returned unchanged.
pub(crate) fn month_label(period: &str) -> String {
    NaiveDate::parse_from_str(&format!("{}-01", period), "%Y-%m-%d")
        .map(|d| d.format("%b %Y").to_string())
        .unwrap_or_else(|_| period.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(short_day_label(day), "Jan 5");
        assert_eq!(long_day_label(day), "Jan 5, 2024");
        assert_eq!(month_label("2024-03"), "Mar 2024");
        assert_eq!(month_label("2024"), "2024");
    }

    #[test]
    fn failure_carries_details() {
        let r = ApiResponse::failure("Failed to analyze MEV activities", &EngineError::Timeout("q".into()));
        assert_eq!(r.status, 500);
        assert_eq!(r.body["error"], "Failed to analyze MEV activities");
        assert_eq!(r.body["details"], "Timed out: q");
        let r = ApiResponse::failure("Failed to fetch address info", &EngineError::Validation("x".into()));
        assert_eq!(r.status, 400);
    }
}
