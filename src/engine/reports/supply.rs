// Stablescope — /token-supply

use super::{fetch, fetch_one, long_day_label, month_label, ApiResponse};
use crate::engine::state::AppState;
use crate::engine::warehouse::queries;
use log::error;
use serde::Serialize;
use serde_json::json;
use stablescope_core::atoms::constants::ZERO_ADDRESS;
use stablescope_core::metrics::{cumulative_supply, monthly_averages, yearly_averages, DailyChange, PeriodAverage};
use stablescope_core::primitives::{minor_to_tokens, round2};
use stablescope_core::EngineResult;

const MONTHS_SHOWN: usize = 12;

#[derive(Debug, Clone, Serialize)]
struct HistoryPoint {
    date: String,
    change: f64,
    total: f64,
}

#[derive(Debug, Clone, Serialize)]
struct PeriodRow {
    period: String,
    avg_daily_change: f64,
    total_change: f64,
}

impl PeriodRow {
    fn from_average(avg: &PeriodAverage, decimals: u8, label: impl Fn(&str) -> String) -> Self {
        PeriodRow {
            period: label(&avg.period),
            avg_daily_change: round2(minor_to_tokens(avg.avg_daily_change, decimals)),
            total_change: round2(minor_to_tokens(avg.total_change, decimals)),
        }
    }
}

#[derive(Debug, Serialize)]
struct SupplyReport {
    current_supply: f64,
    total_minted: f64,
    total_burned: f64,
    supply_history: Vec<HistoryPoint>,
    monthly_avg: Vec<PeriodRow>,
    yearly_avg: Vec<PeriodRow>,
    current_month_avg: Option<PeriodRow>,
    current_year_avg: Option<PeriodRow>,
}

async fn build(state: &AppState) -> EngineResult<SupplyReport> {
    let token = state.config.token.address_lower();
    let decimals = state.config.token.decimals;
    let d = state.warehouse.dialect();

    let (totals, daily) = tokio::try_join!(
        fetch_one(state, queries::supply_totals(&d, &token, ZERO_ADDRESS), queries::decode_supply_totals),
        fetch(state, queries::daily_supply_changes(&d, &token, ZERO_ADDRESS), queries::decode_supply_change),
    )?;

    let changes: Vec<DailyChange> = daily.into_iter().map(|r| DailyChange { date: r.day, change: r.amount }).collect();
    let tokens = |minor: f64| round2(minor_to_tokens(minor, decimals));

    let supply_history = cumulative_supply(&changes)
        .into_iter()
        .map(|p| HistoryPoint {
            date: long_day_label(p.date),
            change: tokens(p.daily_change),
            total: tokens(p.total_supply),
        })
        .collect();
    let monthly_avg: Vec<PeriodRow> = monthly_averages(&changes, MONTHS_SHOWN)
        .iter()
        .map(|a| PeriodRow::from_average(a, decimals, month_label))
        .collect();
    let yearly_avg: Vec<PeriodRow> = yearly_averages(&changes)
        .iter()
        .map(|a| PeriodRow::from_average(a, decimals, |p: &str| p.to_string()))
        .collect();

    Ok(SupplyReport {
        current_supply: tokens(totals.circulating()),
        total_minted: tokens(totals.minted),
        total_burned: tokens(totals.burned),
        supply_history,
        current_month_avg: monthly_avg.first().cloned(),
        current_year_avg: yearly_avg.first().cloned(),
        monthly_avg,
        yearly_avg,
    })
}

pub async fn token_supply(state: &AppState) -> ApiResponse {
    match build(state).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => {
            error!("[reports] Supply report falling back to sample data: {}", e);
            ApiResponse::json(500, fallback())
        }
    }
}

fn fallback() -> serde_json::Value {
    let monthly = json!([
        { "period": "Mar 2024", "avg_daily_change": 75000.0, "total_change": 1500000.0 },
        { "period": "Feb 2024", "avg_daily_change": 89285.71, "total_change": 2500000.0 },
        { "period": "Jan 2024", "avg_daily_change": 38709.68, "total_change": 1200000.0 },
        { "period": "Dec 2023", "avg_daily_change": 16129.03, "total_change": 500000.0 },
        { "period": "Nov 2023", "avg_daily_change": 10000.0, "total_change": 300000.0 },
    ]);
    let yearly = json!([
        { "period": "2024", "avg_daily_change": 67032.97, "total_change": 6100000.0 },
        { "period": "2023", "avg_daily_change": 13114.75, "total_change": 800000.0 },
    ]);
    json!({
        "current_supply": 6000000.0,
        "total_minted": 6300000.0,
        "total_burned": 300000.0,
        "supply_history": [
            { "date": "Nov 1, 2023", "change": 100000.0, "total": 100000.0 },
            { "date": "Nov 15, 2023", "change": 200000.0, "total": 300000.0 },
            { "date": "Dec 1, 2023", "change": 150000.0, "total": 450000.0 },
            { "date": "Dec 15, 2023", "change": 350000.0, "total": 800000.0 },
            { "date": "Jan 1, 2024", "change": 500000.0, "total": 1300000.0 },
            { "date": "Jan 15, 2024", "change": 700000.0, "total": 2000000.0 },
            { "date": "Feb 1, 2024", "change": 1000000.0, "total": 3000000.0 },
            { "date": "Feb 15, 2024", "change": 1500000.0, "total": 4500000.0 },
            { "date": "Mar 1, 2024", "change": 1000000.0, "total": 5500000.0 },
            { "date": "Mar 15, 2024", "change": 500000.0, "total": 6000000.0 },
        ],
        "current_month_avg": monthly[0].clone(),
        "current_year_avg": yearly[0].clone(),
        "monthly_avg": monthly,
        "yearly_avg": yearly,
        "error": "Failed to fetch token supply data",
    })
}
