// Stablescope — Metrics Derivation
//
// Pure functions over already-fetched numbers. Amounts enter in whatever unit
// the caller sums in (usually minor units) and are only rounded at the
// presentation boundary, after summation. Missing denominators yield zero.

use crate::atoms::constants::{MEV_BASELINE_SCORE, MEV_FRONTRUN_TOLERANCE, MEV_SANDWICH_MIN_TRANSFERS};
use crate::primitives::{round2, round_to};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Basic series math ──────────────────────────────────────────────────────

/// Percentage change from `previous` to `current`; 0 when there is no positive baseline.
pub fn pct_change(current: f64, previous: f64) -> f64 {
    if previous <= 0.0 || !previous.is_finite() || !current.is_finite() {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}

/// Trailing moving average. Index `i` has a value only once `window` points exist.
pub fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                None
            } else {
                let slice = &values[i + 1 - window..=i];
                Some(slice.iter().sum::<f64>() / window as f64)
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn ratio(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        part / whole
    }
}

// ── Holder concentration ───────────────────────────────────────────────────

pub const OTHERS_LABEL: &str = "Others";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderShare {
    pub address: String,
    /// Whole tokens, two decimals.
    pub balance: f64,
    pub percentage: f64,
}

/// Top holders as supply percentages plus a synthesized "Others" entry
/// carrying the remainder, so the full set sums to 100 (within per-entry
/// rounding). A supply smaller than the listed balances, e.g. a stale
/// figure, is raised to their sum; a supply of zero leaves every listed
/// share at 0 and "Others" at 100.
pub fn holder_distribution(holders: &[(String, f64)], total_supply: f64) -> Vec<HolderShare> {
    let listed_balance: f64 = holders.iter().map(|(_, b)| b.max(0.0)).sum();
    let denominator = if total_supply > 0.0 { total_supply.max(listed_balance) } else { total_supply };
    let mut shares: Vec<HolderShare> = holders
        .iter()
        .map(|(address, balance)| HolderShare {
            address: address.clone(),
            balance: round2(*balance),
            percentage: round2(ratio(*balance, denominator) * 100.0).clamp(0.0, 100.0),
        })
        .collect();
    let listed: f64 = shares.iter().map(|s| s.percentage).sum();
    let others_pct = round2(100.0 - listed).clamp(0.0, 100.0);
    let others_balance = if denominator > 0.0 { round2(denominator - listed_balance) } else { 0.0 };
    shares.push(HolderShare {
        address: OTHERS_LABEL.into(),
        balance: others_balance,
        percentage: others_pct,
    });
    shares
}

/// Pick the supply denominator: the warehouse-derived figure unless the
/// on-chain figure deviates from it by more than `tolerance`.
pub fn reconcile_supply(derived: f64, on_chain: Option<f64>, tolerance: f64) -> f64 {
    match on_chain {
        Some(chain) if chain > 0.0 && (derived <= 0.0 || ((derived - chain) / chain).abs() > tolerance) => chain,
        _ => derived,
    }
}

// ── Supply series ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DailyChange {
    pub date: NaiveDate,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyPoint {
    pub date: NaiveDate,
    pub total_supply: f64,
    pub daily_change: f64,
}

/// Running total of daily net issuance, oldest first.
pub fn cumulative_supply(changes: &[DailyChange]) -> Vec<SupplyPoint> {
    let mut sorted = changes.to_vec();
    sorted.sort_by_key(|c| c.date);
    let mut total = 0.0;
    sorted
        .into_iter()
        .map(|c| {
            total += c.change;
            SupplyPoint { date: c.date, total_supply: total, daily_change: c.change }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAverage {
    /// "2024-03" for months, "2024" for years.
    pub period: String,
    /// Mean over the days that had any issuance.
    pub avg_daily_change: f64,
    pub total_change: f64,
    pub active_days: usize,
}

fn period_averages(changes: &[DailyChange], key: impl Fn(&NaiveDate) -> String, limit: usize) -> Vec<PeriodAverage> {
    let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for c in changes {
        buckets.entry(key(&c.date)).or_default().push(c.change);
    }
    buckets
        .into_iter()
        .rev()
        .take(limit)
        .map(|(period, values)| PeriodAverage {
            period,
            avg_daily_change: mean(&values),
            total_change: values.iter().sum(),
            active_days: values.len(),
        })
        .collect()
}

/// Newest month first.
pub fn monthly_averages(changes: &[DailyChange], limit: usize) -> Vec<PeriodAverage> {
    period_averages(changes, |d| format!("{:04}-{:02}", d.year(), d.month()), limit)
}

/// Newest year first.
pub fn yearly_averages(changes: &[DailyChange]) -> Vec<PeriodAverage> {
    period_averages(changes, |d| format!("{:04}", d.year()), usize::MAX)
}

// ── Volume summary ─────────────────────────────────────────────────────────

/// Volumes of the trailing windows and the windows just before them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeWindows {
    pub last_24h: f64,
    pub prev_24h: f64,
    pub last_7d: f64,
    pub prev_7d: f64,
    pub last_30d: f64,
    pub prev_30d: f64,
}

/// Flat window summary: rounded volumes and percent changes to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub volume_24h: f64,
    pub percent_change_24h: f64,
    pub volume_7d: f64,
    pub percent_change_7d: f64,
    pub volume_30d: f64,
    pub percent_change_30d: f64,
}

fn window_change(current: f64, previous: f64) -> f64 {
    round_to(pct_change(current, previous), 1)
}

pub fn volume_summary(w: &VolumeWindows) -> VolumeSummary {
    VolumeSummary {
        volume_24h: round2(w.last_24h),
        percent_change_24h: window_change(w.last_24h, w.prev_24h),
        volume_7d: round2(w.last_7d),
        percent_change_7d: window_change(w.last_7d, w.prev_7d),
        volume_30d: round2(w.last_30d),
        percent_change_30d: window_change(w.last_30d, w.prev_30d),
    }
}

// ── MEV heuristics ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MevThresholds {
    /// A block with at least this many token transfers is sandwich-like.
    pub sandwich_min_transfers: u32,
    /// Opposite-direction pairs whose amounts differ by less than this fraction are frontrun-like.
    pub frontrun_tolerance: f64,
}

impl Default for MevThresholds {
    fn default() -> Self {
        MevThresholds {
            sandwich_min_transfers: MEV_SANDWICH_MIN_TRANSFERS,
            frontrun_tolerance: MEV_FRONTRUN_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockTransfer {
    pub from: String,
    pub to: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MevType {
    Sandwich,
    Frontrun,
    Normal,
}

pub fn is_sandwich_block(transfers: &[BlockTransfer], t: &MevThresholds) -> bool {
    transfers.len() as u64 >= t.sandwich_min_transfers as u64
}

/// True when some transfer A→B is mirrored by B→A with an amount within tolerance.
pub fn is_frontrun_block(transfers: &[BlockTransfer], t: &MevThresholds) -> bool {
    transfers.iter().enumerate().any(|(i, a)| {
        a.amount > 0.0
            && a.from != a.to
            && transfers.iter().enumerate().any(|(j, b)| {
                i != j && b.from == a.to && b.to == a.from && ((b.amount - a.amount).abs() / a.amount) < t.frontrun_tolerance
            })
    })
}

/// Sandwich takes precedence over frontrun.
pub fn classify_block(transfers: &[BlockTransfer], t: &MevThresholds) -> MevType {
    if is_sandwich_block(transfers, t) {
        MevType::Sandwich
    } else if is_frontrun_block(transfers, t) {
        MevType::Frontrun
    } else {
        MevType::Normal
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MevWindowStats {
    pub total_blocks: u64,
    pub sandwich_blocks: u64,
    pub frontrun_blocks: u64,
}

impl MevWindowStats {
    pub fn sandwich_ratio(&self) -> f64 {
        ratio(self.sandwich_blocks as f64, self.total_blocks as f64)
    }

    pub fn frontrun_ratio(&self) -> f64 {
        ratio(self.frontrun_blocks as f64, self.total_blocks as f64)
    }

    pub fn anomaly_ratio(&self) -> f64 {
        ratio((self.sandwich_blocks + self.frontrun_blocks) as f64, self.total_blocks as f64)
    }
}

/// Percentage change of the mean of the second half of `series` against the first half.
pub fn half_over_half_trend(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let (first, second) = series.split_at(series.len() / 2);
    pct_change(mean(second), mean(first))
}

/// Heuristic MEV risk in [0, 100].
///
/// Starts at the baseline and moves by fixed increments:
///   sandwich ratio (24h)  ≥ 25% +30, ≥ 10% +15, < 2% −20
///   frontrun ratio (24h)  ≥ 10% +20, ≥ 5% +10,  < 1% −20
///   anomaly trend (daily) > +25% +15, < −25% −15
pub fn mev_risk_score(last_24h: &MevWindowStats, daily_anomaly_ratios: &[f64]) -> f64 {
    let mut score = MEV_BASELINE_SCORE;

    let sandwich = last_24h.sandwich_ratio();
    score += if sandwich >= 0.25 {
        30.0
    } else if sandwich >= 0.10 {
        15.0
    } else if sandwich < 0.02 {
        -20.0
    } else {
        0.0
    };

    let frontrun = last_24h.frontrun_ratio();
    score += if frontrun >= 0.10 {
        20.0
    } else if frontrun >= 0.05 {
        10.0
    } else if frontrun < 0.01 {
        -20.0
    } else {
        0.0
    };

    let trend = half_over_half_trend(daily_anomaly_ratios);
    if trend > 25.0 {
        score += 15.0;
    } else if trend < -25.0 {
        score -= 15.0;
    }

    score.clamp(0.0, 100.0)
}

// ── Market activity ────────────────────────────────────────────────────────

/// One hourly bucket of market activity, newest first in every series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub timestamp: String,
    pub transaction_count: i64,
    pub volume: f64,
    pub unique_senders: i64,
    pub unique_receivers: i64,
    pub max_transfer: f64,
    pub whale_transactions: i64,
    pub whale_volume: f64,
    pub accumulation_wallets: i64,
    pub distribution_wallets: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyAverages {
    pub avg_tx_count: f64,
    pub avg_volume: f64,
    pub avg_whale_tx: f64,
}

pub fn hourly_averages(series: &[MarketSnapshot]) -> HourlyAverages {
    let n = series.len().max(1) as f64;
    HourlyAverages {
        avg_tx_count: (series.iter().map(|s| s.transaction_count as f64).sum::<f64>() / n).round(),
        avg_volume: (series.iter().map(|s| s.volume).sum::<f64>() / n).round(),
        avg_whale_tx: (series.iter().map(|s| s.whale_transactions as f64).sum::<f64>() / n).round(),
    }
}

pub const INSUFFICIENT_DATA: &str = "Insufficient data";

pub fn trend_description(current: f64, previous: f64) -> &'static str {
    let change = pct_change(current, previous);
    if change > 20.0 {
        "Sharp increase"
    } else if change > 5.0 {
        "Moderate increase"
    } else if change < -20.0 {
        "Sharp decrease"
    } else if change < -5.0 {
        "Moderate decrease"
    } else {
        "Stable"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketTrends {
    pub volume: String,
    pub whale_activity: String,
    pub network_activity: String,
}

/// Compares the two most recent buckets.
pub fn market_trends(series: &[MarketSnapshot]) -> MarketTrends {
    match series {
        [current, previous, ..] => MarketTrends {
            volume: trend_description(current.volume, previous.volume).into(),
            whale_activity: trend_description(current.whale_transactions as f64, previous.whale_transactions as f64).into(),
            network_activity: trend_description(
                (current.unique_senders + current.unique_receivers) as f64,
                (previous.unique_senders + previous.unique_receivers) as f64,
            )
            .into(),
        },
        _ => MarketTrends {
            volume: INSUFFICIENT_DATA.into(),
            whale_activity: INSUFFICIENT_DATA.into(),
            network_activity: INSUFFICIENT_DATA.into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt(from: &str, to: &str, amount: f64) -> BlockTransfer {
        BlockTransfer { from: from.into(), to: to.into(), amount }
    }

    #[test]
    fn pct_change_basics() {
        assert_eq!(pct_change(150.0, 100.0), 50.0);
        assert_eq!(pct_change(50.0, 100.0), -50.0);
        assert_eq!(pct_change(10.0, 0.0), 0.0);
        assert_eq!(pct_change(10.0, -5.0), 0.0);
    }

    #[test]
    fn moving_average_needs_full_window() {
        let values: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        let ma = moving_average(&values, 7);
        assert!(ma[..6].iter().all(|v| v.is_none()));
        assert_eq!(ma[6], Some(4.0));
        assert_eq!(ma[7], Some(5.0));
        assert!(moving_average(&values[..3], 7).iter().all(|v| v.is_none()));
    }

    #[test]
    fn holder_others_fills_remainder() {
        let holders = vec![("a".to_string(), 40.0), ("b".to_string(), 30.0), ("c".to_string(), 20.0)];
        let shares = holder_distribution(&holders, 100.0);
        assert_eq!(shares.len(), 4);
        let others = shares.last().unwrap();
        assert_eq!(others.address, OTHERS_LABEL);
        assert_eq!(others.percentage, 10.0);
        assert_eq!(others.balance, 10.0);
        let total: f64 = shares.iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn holder_shares_never_exceed_100_with_stale_supply() {
        let holders = vec![("a".to_string(), 80.0), ("b".to_string(), 40.0)];
        let shares = holder_distribution(&holders, 100.0);
        let total: f64 = shares.iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 0.05, "sum {}", total);
        assert_eq!(shares[0].percentage, 66.67);
        assert_eq!(shares[1].percentage, 33.33);
        assert_eq!(shares[2].percentage, 0.0);
        assert_eq!(shares[2].balance, 0.0);
    }

    #[test]
    fn holder_zero_supply() {
        let shares = holder_distribution(&[("a".to_string(), 5.0)], 0.0);
        assert_eq!(shares[0].percentage, 0.0);
        assert_eq!(shares[1].percentage, 100.0);
    }

    #[test]
    fn supply_reconciliation() {
        assert_eq!(reconcile_supply(100.0, Some(105.0), 0.10), 100.0);
        assert_eq!(reconcile_supply(100.0, Some(150.0), 0.10), 150.0);
        assert_eq!(reconcile_supply(100.0, None, 0.10), 100.0);
        assert_eq!(reconcile_supply(0.0, Some(50.0), 0.10), 50.0);
    }

    #[test]
    fn cumulative_and_period_averages() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let changes = vec![
            DailyChange { date: d(2024, 2, 1), change: 30.0 },
            DailyChange { date: d(2024, 1, 1), change: 10.0 },
            DailyChange { date: d(2024, 1, 2), change: 20.0 },
            DailyChange { date: d(2023, 12, 31), change: -5.0 },
        ];
        let series = cumulative_supply(&changes);
        assert_eq!(series.first().unwrap().total_supply, -5.0);
        assert_eq!(series.last().unwrap().total_supply, 55.0);

        let months = monthly_averages(&changes, 12);
        assert_eq!(months[0].period, "2024-02");
        assert_eq!(months[1].period, "2024-01");
        assert_eq!(months[1].avg_daily_change, 15.0);
        assert_eq!(months[1].total_change, 30.0);
        assert_eq!(monthly_averages(&changes, 1).len(), 1);

        let years = yearly_averages(&changes);
        assert_eq!(years[0].period, "2024");
        assert_eq!(years[0].avg_daily_change, 20.0);
        assert_eq!(years[1].total_change, -5.0);
    }

    #[test]
    fn volume_summary_rounds_change() {
        let s = volume_summary(&VolumeWindows {
            last_24h: 150.0,
            prev_24h: 100.0,
            last_7d: 10.0,
            prev_7d: 30.0,
            last_30d: 5.0,
            prev_30d: 0.0,
        });
        assert_eq!(s.percent_change_24h, 50.0);
        assert_eq!(s.percent_change_7d, -66.7);
        assert_eq!(s.percent_change_30d, 0.0);
        let v = serde_json::to_value(s).unwrap();
        assert_eq!(v["volume_24h"], 150.0);
    }

    #[test]
    fn block_classification() {
        let t = MevThresholds::default();
        let busy = vec![bt("a", "b", 1.0), bt("c", "d", 2.0), bt("e", "f", 3.0)];
        assert_eq!(classify_block(&busy, &t), MevType::Sandwich);

        let mirrored = vec![bt("a", "b", 100.0), bt("b", "a", 95.0)];
        assert_eq!(classify_block(&mirrored, &t), MevType::Frontrun);

        let far = vec![bt("a", "b", 100.0), bt("b", "a", 50.0)];
        assert_eq!(classify_block(&far, &t), MevType::Normal);

        let same_direction = vec![bt("a", "b", 100.0), bt("a", "b", 100.0)];
        assert_eq!(classify_block(&same_direction, &t), MevType::Normal);

        let strict = MevThresholds { sandwich_min_transfers: 5, frontrun_tolerance: 0.01 };
        assert_eq!(classify_block(&busy, &strict), MevType::Normal);
        assert_eq!(classify_block(&mirrored, &strict), MevType::Normal);
    }

    #[test]
    fn risk_score_clamps_high() {
        let stats = MevWindowStats { total_blocks: 10, sandwich_blocks: 5, frontrun_blocks: 3 };
        let rising = [0.1, 0.1, 0.5, 0.5];
        assert_eq!(mev_risk_score(&stats, &rising), 100.0);
    }

    #[test]
    fn risk_score_clamps_low() {
        let quiet = MevWindowStats { total_blocks: 1000, sandwich_blocks: 0, frontrun_blocks: 0 };
        let falling = [0.5, 0.5, 0.1, 0.1];
        assert_eq!(mev_risk_score(&quiet, &falling), 0.0);
    }

    #[test]
    fn risk_score_baseline_and_empty() {
        // 5% sandwich, 2% frontrun, flat trend: no adjustments.
        let mid = MevWindowStats { total_blocks: 100, sandwich_blocks: 5, frontrun_blocks: 2 };
        assert_eq!(mev_risk_score(&mid, &[0.1, 0.1]), 50.0);
        // No blocks at all reads as quiet.
        assert_eq!(mev_risk_score(&MevWindowStats::default(), &[]), 10.0);
    }

    #[test]
    fn trends_need_two_points() {
        let snap = |volume: f64, whales: i64, senders: i64| MarketSnapshot {
            timestamp: String::new(),
            transaction_count: 1,
            volume,
            unique_senders: senders,
            unique_receivers: 0,
            max_transfer: 0.0,
            whale_transactions: whales,
            whale_volume: 0.0,
            accumulation_wallets: 0,
            distribution_wallets: 0,
        };
        let t = market_trends(&[snap(130.0, 1, 10)]);
        assert_eq!(t.volume, INSUFFICIENT_DATA);
        let t = market_trends(&[snap(130.0, 9, 10), snap(100.0, 10, 10)]);
        assert_eq!(t.volume, "Sharp increase");
        assert_eq!(t.whale_activity, "Moderate decrease");
        assert_eq!(t.network_activity, "Stable");
        assert_eq!(trend_description(106.0, 100.0), "Moderate increase");
        assert_eq!(trend_description(70.0, 100.0), "Sharp decrease");

        let avg = hourly_averages(&[snap(10.0, 1, 1), snap(21.0, 2, 1)]);
        assert_eq!(avg.avg_volume, 16.0);
        assert_eq!(avg.avg_whale_tx, 2.0);
    }
}
