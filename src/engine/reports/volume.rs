// Stablescope — /transaction-volume

use super::{fetch, fetch_one, short_day_label, ApiResponse};
use crate::engine::state::AppState;
use crate::engine::warehouse::queries;
use log::error;
use serde::Serialize;
use serde_json::json;
use stablescope_core::metrics::{volume_summary, VolumeSummary, VolumeWindows};
use stablescope_core::primitives::{minor_to_tokens, round2};
use stablescope_core::EngineResult;

/// Chart span. Unknown values fall back to three months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumePeriod {
    Day,
    Week,
    Month,
    #[default]
    ThreeMonths,
}

impl VolumePeriod {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("24h") => VolumePeriod::Day,
            Some("7d") => VolumePeriod::Week,
            Some("30d") => VolumePeriod::Month,
            _ => VolumePeriod::ThreeMonths,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            VolumePeriod::Day => 1,
            VolumePeriod::Week => 7,
            VolumePeriod::Month => 30,
            VolumePeriod::ThreeMonths => 90,
        }
    }
}

#[derive(Debug, Serialize)]
struct VolumePoint {
    date: String,
    volume: f64,
}

#[derive(Debug, Serialize)]
struct VolumeReport {
    data: Vec<VolumePoint>,
    summary: VolumeSummary,
}

async fn build(state: &AppState, period: VolumePeriod) -> EngineResult<VolumeReport> {
    let token = state.config.token.address_lower();
    let decimals = state.config.token.decimals;
    let d = state.warehouse.dialect();
    let now = state.now().timestamp();
    let since = now - period.days() * 86_400;

    let (daily, windows) = tokio::try_join!(
        fetch(state, queries::daily_volume(&d, &token, since), queries::decode_daily_volume),
        fetch_one(state, queries::volume_windows(&d, &token, now), queries::decode_volume_windows),
    )?;

    let tokens = |minor: f64| minor_to_tokens(minor, decimals);
    let data = daily
        .into_iter()
        .map(|r| VolumePoint { date: short_day_label(r.day), volume: round2(tokens(r.amount)) })
        .collect();
    let summary = volume_summary(&VolumeWindows {
        last_24h: tokens(windows.last_24h),
        prev_24h: tokens(windows.prev_24h),
        last_7d: tokens(windows.last_7d),
        prev_7d: tokens(windows.prev_7d),
        last_30d: tokens(windows.last_30d),
        prev_30d: tokens(windows.prev_30d),
    });
    Ok(VolumeReport { data, summary })
}

pub async fn transaction_volume(state: &AppState, period: VolumePeriod) -> ApiResponse {
    match build(state, period).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => {
            error!("[reports] Volume report falling back to sample data: {}", e);
            ApiResponse::json(500, fallback())
        }
    }
}

fn fallback() -> serde_json::Value {
    let points = [
        ("Jan 1", 400000.0),
        ("Jan 5", 600000.0),
        ("Jan 10", 800000.0),
        ("Jan 15", 1000000.0),
        ("Jan 20", 1200000.0),
        ("Jan 25", 1800000.0),
        ("Feb 1", 2400000.0),
        ("Feb 5", 2600000.0),
        ("Feb 10", 3200000.0),
        ("Feb 15", 3800000.0),
        ("Feb 20", 4200000.0),
        ("Feb 25", 4600000.0),
        ("Mar 1", 5000000.0),
    ];
    json!({
        "data": points.iter().map(|(date, volume)| json!({ "date": date, "volume": volume })).collect::<Vec<_>>(),
        "summary": {
            "volume_24h": 5432100.0,
            "percent_change_24h": 5.2,
            "volume_7d": 23487562.0,
            "percent_change_7d": 12.8,
            "volume_30d": 78123456.0,
            "percent_change_30d": 21.4,
        },
        "error": "Failed to fetch transaction volume",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parsing() {
        assert_eq!(VolumePeriod::parse(Some("24h")).days(), 1);
        assert_eq!(VolumePeriod::parse(Some("7d")).days(), 7);
        assert_eq!(VolumePeriod::parse(Some("30d")).days(), 30);
        assert_eq!(VolumePeriod::parse(Some("3months")).days(), 90);
        assert_eq!(VolumePeriod::parse(Some("forever")), VolumePeriod::ThreeMonths);
        assert_eq!(VolumePeriod::parse(None), VolumePeriod::ThreeMonths);
    }

    #[test]
    fn fallback_matches_success_shape() {
        let body = fallback();
        assert_eq!(body["data"].as_array().unwrap().len(), 13);
        assert_eq!(body["summary"]["percent_change_30d"], 21.4);
    }
}
