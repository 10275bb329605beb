// Stablescope — /mev
//
// Block-level MEV heuristics over the transfer table: daily classification
// counts for the configured history, the last 24 hours summed into the risk
// window, and the most recent blocks classified one by one.

use super::{fetch, ApiResponse};
use crate::engine::state::AppState;
use crate::engine::warehouse::queries::{self, BlockTransferRow, MevDayRow};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, error};
use serde::Serialize;
use stablescope_core::atoms::constants::{MEV_RECENT_ACTIVITY_LIMIT, MOVING_AVERAGE_WINDOW};
use stablescope_core::insights::MevSummary;
use stablescope_core::metrics::{
    classify_block, half_over_half_trend, moving_average, mev_risk_score, BlockTransfer, MevThresholds, MevType,
    MevWindowStats,
};
use stablescope_core::primitives::{minor_to_tokens, round2};
use stablescope_core::EngineResult;
use std::collections::BTreeMap;

const DAY_SECS: i64 = 86_400;
const WEEK_DAYS: i64 = 7;
const MOVING_AVERAGE_DAYS: i64 = 30;

// ── Payload ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayActivity {
    pub date: String,
    pub sandwich_blocks: i64,
    pub frontrun_blocks: i64,
    pub total_blocks: i64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTrend {
    pub month: String,
    pub total_blocks: i64,
    pub total_transactions: i64,
    pub sandwich_blocks: i64,
    pub frontrun_blocks: i64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityTransfer {
    pub transaction_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockActivity {
    pub block_number: u64,
    pub timestamp: String,
    pub transaction_count: usize,
    pub transactions: Vec<ActivityTransfer>,
    pub mev_type: MevType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingAveragePoint {
    pub date: String,
    pub avg_sandwich_count: f64,
    pub avg_frontrun_count: f64,
    pub avg_volume: f64,
}

#[derive(Debug, Serialize)]
struct MevReport {
    risk_score: f64,
    insights: Vec<String>,
    last_week_activity: Vec<DayActivity>,
    monthly_trends: Vec<MonthTrend>,
    recent_activities: Vec<BlockActivity>,
    moving_averages: Vec<MovingAveragePoint>,
}

// ── Derivation ─────────────────────────────────────────────────────────────

fn empty_day(day: NaiveDate) -> MevDayRow {
    MevDayRow { day, total_blocks: 0, sandwich_blocks: 0, frontrun_blocks: 0, transactions: 0, volume: 0.0 }
}

/// One row per calendar day in `[from, to]`, zero-filled where the warehouse has none.
pub(crate) fn dense_days(rows: &[MevDayRow], from: NaiveDate, to: NaiveDate) -> Vec<MevDayRow> {
    let by_day: BTreeMap<NaiveDate, &MevDayRow> = rows.iter().map(|r| (r.day, r)).collect();
    from.iter_days()
        .take_while(|d| *d <= to)
        .map(|d| by_day.get(&d).map(|r| (*r).clone()).unwrap_or_else(|| empty_day(d)))
        .collect()
}

pub(crate) fn window_stats(rows: &[MevDayRow]) -> MevWindowStats {
    rows.iter().fold(MevWindowStats::default(), |acc, r| MevWindowStats {
        total_blocks: acc.total_blocks + r.total_blocks.max(0) as u64,
        sandwich_blocks: acc.sandwich_blocks + r.sandwich_blocks.max(0) as u64,
        frontrun_blocks: acc.frontrun_blocks + r.frontrun_blocks.max(0) as u64,
    })
}

fn anomaly_ratio(r: &MevDayRow) -> f64 {
    window_stats(std::slice::from_ref(r)).anomaly_ratio()
}

/// Calendar-month totals, oldest first.
pub(crate) fn monthly_trends(rows: &[MevDayRow], decimals: u8) -> Vec<MonthTrend> {
    let mut months: BTreeMap<String, MonthTrend> = BTreeMap::new();
    for r in rows {
        let key = r.day.format("%Y-%m").to_string();
        let entry = months.entry(key.clone()).or_insert_with(|| MonthTrend {
            month: key,
            total_blocks: 0,
            total_transactions: 0,
            sandwich_blocks: 0,
            frontrun_blocks: 0,
            volume: 0.0,
        });
        entry.total_blocks += r.total_blocks;
        entry.total_transactions += r.transactions;
        entry.sandwich_blocks += r.sandwich_blocks;
        entry.frontrun_blocks += r.frontrun_blocks;
        entry.volume += r.volume;
    }
    months
        .into_values()
        .map(|mut m| {
            m.volume = round2(minor_to_tokens(m.volume, decimals));
            m
        })
        .collect()
}

/// 7-day trailing averages over a zero-filled daily series.
pub(crate) fn moving_averages(days: &[MevDayRow], decimals: u8) -> Vec<MovingAveragePoint> {
    let series = |f: fn(&MevDayRow) -> f64| moving_average(&days.iter().map(f).collect::<Vec<_>>(), MOVING_AVERAGE_WINDOW);
    let sandwich = series(|r| r.sandwich_blocks as f64);
    let frontrun = series(|r| r.frontrun_blocks as f64);
    let volume = series(|r| r.volume);
    days.iter()
        .enumerate()
        .filter_map(|(i, r)| {
            Some(MovingAveragePoint {
                date: r.day.to_string(),
                avg_sandwich_count: round2(sandwich[i]?),
                avg_frontrun_count: round2(frontrun[i]?),
                avg_volume: round2(minor_to_tokens(volume[i]?, decimals)),
            })
        })
        .collect()
}

/// Group transfer rows (newest block first) into classified blocks.
pub(crate) fn recent_activities(rows: Vec<BlockTransferRow>, thresholds: &MevThresholds, decimals: u8) -> Vec<BlockActivity> {
    let mut blocks: Vec<(u64, i64, Vec<BlockTransferRow>)> = Vec::new();
    for row in rows {
        match blocks.last_mut() {
            Some((number, _, txs)) if *number == row.block_number => txs.push(row),
            _ => blocks.push((row.block_number, row.block_time, vec![row])),
        }
    }
    blocks
        .into_iter()
        .take(MEV_RECENT_ACTIVITY_LIMIT)
        .map(|(block_number, block_time, txs)| {
            let shape: Vec<BlockTransfer> = txs
                .iter()
                .map(|t| BlockTransfer { from: t.from.clone(), to: t.to.clone(), amount: t.amount })
                .collect();
            BlockActivity {
                block_number,
                timestamp: DateTime::<Utc>::from_timestamp(block_time, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                transaction_count: txs.len(),
                mev_type: classify_block(&shape, thresholds),
                transactions: txs
                    .into_iter()
                    .map(|t| ActivityTransfer {
                        transaction_hash: t.transaction_hash,
                        from_address: t.from,
                        to_address: t.to,
                        amount: round2(minor_to_tokens(t.amount, decimals)),
                    })
                    .collect(),
            }
        })
        .collect()
}

// ── Report ─────────────────────────────────────────────────────────────────

async fn build(state: &AppState) -> EngineResult<MevReport> {
    let token = state.config.token.address_lower();
    let decimals = state.config.token.decimals;
    let mev = &state.config.mev;
    let thresholds = mev.thresholds();
    let d = state.warehouse.dialect();
    let now = state.now();
    let day_ago = now.timestamp() - DAY_SECS;

    let (history, last_day, recent) = tokio::try_join!(
        fetch(
            state,
            queries::mev_daily_activity(
                &d,
                &token,
                now.timestamp() - mev.history_days * DAY_SECS,
                mev.sandwich_min_transfers,
                mev.frontrun_tolerance,
            ),
            queries::decode_mev_day,
        ),
        fetch(
            state,
            queries::mev_daily_activity(&d, &token, day_ago, mev.sandwich_min_transfers, mev.frontrun_tolerance),
            queries::decode_mev_day,
        ),
        fetch(
            state,
            queries::recent_block_transfers(&d, &token, day_ago, MEV_RECENT_ACTIVITY_LIMIT as i64),
            queries::decode_block_transfer,
        ),
    )?;

    let today = now.date_naive();
    let week = dense_days(&history, today - Duration::days(WEEK_DAYS - 1), today);
    let month = dense_days(&history, today - Duration::days(MOVING_AVERAGE_DAYS - 1), today);

    let weekly_ratios: Vec<f64> = week.iter().map(anomaly_ratio).collect();
    let last_24h = window_stats(&last_day);
    let averages = moving_averages(&month, decimals);
    let latest = averages.last();

    let mut summary = MevSummary {
        last_24h,
        last_week: window_stats(&week),
        anomaly_trend_pct: half_over_half_trend(&weekly_ratios),
        latest_avg_sandwich: latest.map(|p| p.avg_sandwich_count),
        latest_avg_frontrun: latest.map(|p| p.avg_frontrun_count),
        risk_score: 0.0,
    };
    summary.risk_score = mev_risk_score(&last_24h, &weekly_ratios);
    debug!(
        "[reports] MEV 24h blocks={} sandwich={} frontrun={} score={}",
        last_24h.total_blocks, last_24h.sandwich_blocks, last_24h.frontrun_blocks, summary.risk_score
    );

    let insights = state.insights.mev_insights(&summary).await;

    Ok(MevReport {
        risk_score: summary.risk_score,
        insights,
        last_week_activity: history
            .iter()
            .filter(|r| r.day > today - Duration::days(WEEK_DAYS))
            .map(|r| DayActivity {
                date: r.day.to_string(),
                sandwich_blocks: r.sandwich_blocks,
                frontrun_blocks: r.frontrun_blocks,
                total_blocks: r.total_blocks,
                volume: round2(minor_to_tokens(r.volume, decimals)),
            })
            .collect(),
        monthly_trends: monthly_trends(&history, decimals),
        recent_activities: recent_activities(recent, &thresholds, decimals),
        moving_averages: averages,
    })
}

pub async fn mev_analysis(state: &AppState) -> ApiResponse {
    match build(state).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => {
            error!("[reports] MEV analysis failed: {}", e);
            ApiResponse::failure("Failed to analyze MEV activities", &e)
        }
    }
}
