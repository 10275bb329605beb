// Stablescope — Insight Rules
//
// Everything about commentary that does not need the network: prompt
// builders, parsing of free-text replies, validation of structured
// prediction replies, and the deterministic rule-based fallbacks used when
// the text endpoint fails or returns nothing usable.
//
// Prompts only ever contain aggregated numbers, never raw transfer lists.

use crate::atoms::constants::{INSIGHT_MAX_LINES, INSIGHT_SENTENCE_MAX_LEN, INSIGHT_SENTENCE_MIN_LEN};
use crate::metrics::{HourlyAverages, MarketSnapshot, MarketTrends, MevWindowStats};
use crate::primitives::round2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Free-text parsing ──────────────────────────────────────────────────────

const BULLET_MARKERS: [char; 3] = ['-', '*', '•'];

fn strip_bullet(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let first = chars.next()?;
    if !BULLET_MARKERS.contains(&first) {
        return None;
    }
    let rest = chars.as_str();
    // "**bold**" is emphasis, not a bullet.
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}

/// Bullet lines with their marker stripped; failing that, sentences of a
/// sensible length. Empty when neither yields anything.
pub fn parse_insight_lines(text: &str) -> Vec<String> {
    let bullets: Vec<String> = text
        .lines()
        .filter_map(|l| strip_bullet(l.trim()))
        .map(String::from)
        .take(INSIGHT_MAX_LINES)
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }
    text.split(['.', '!', '?'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| (INSIGHT_SENTENCE_MIN_LEN..=INSIGHT_SENTENCE_MAX_LEN).contains(&s.len()))
        .take(INSIGHT_MAX_LINES)
        .collect()
}

// ── Wallet insights ────────────────────────────────────────────────────────

/// Per-address activity, amounts in whole tokens rounded to two decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub total_transactions: i64,
    pub first_transaction_date: Option<DateTime<Utc>>,
    pub send_transactions: i64,
    pub receive_transactions: i64,
    pub total_sent: f64,
    pub total_received: f64,
    pub max_sent: f64,
    pub max_received: f64,
    pub avg_sent: f64,
    pub avg_received: f64,
}

pub fn no_history_insight(symbol: &str) -> String {
    format!("This wallet has no {} transaction history.", symbol)
}

pub fn typical_wallet_insight(symbol: &str) -> String {
    format!("This wallet shows typical {} transaction patterns.", symbol)
}

pub fn wallet_prompt(address: &str, symbol: &str, balance: f64, stats: &WalletStats) -> String {
    let first = stats
        .first_transaction_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "Unknown".into());
    format!(
        "Analyze this {sym} wallet and give 3-5 short insights.\n\n\
         Wallet: {address}\n\
         Current {sym} Balance: ${balance:.2}\n\
         Total Transactions: {total}\n\
         First Transaction: {first}\n\
         Send Transactions: {sends}\n\
         Receive Transactions: {receives}\n\
         Total Sent: ${total_sent:.2}\n\
         Total Received: ${total_received:.2}\n\
         Max Sent: ${max_sent:.2}\n\
         Max Received: ${max_received:.2}\n\
         Average Sent: ${avg_sent:.2}\n\
         Average Received: ${avg_received:.2}\n\n\
         Focus on transaction patterns, wallet behavior and likely use. \
         Put each insight on its own line starting with a dash (-).",
        sym = symbol,
        total = stats.total_transactions,
        sends = stats.send_transactions,
        receives = stats.receive_transactions,
        total_sent = stats.total_sent,
        total_received = stats.total_received,
        max_sent = stats.max_sent,
        max_received = stats.max_received,
        avg_sent = stats.avg_sent,
        avg_received = stats.avg_received,
    )
}

/// Rule-based wallet commentary. `now` is injected so the output is reproducible.
pub fn wallet_fallback_insights(symbol: &str, balance: f64, stats: &WalletStats, now: DateTime<Utc>) -> Vec<String> {
    if stats.total_transactions == 0 {
        return vec![no_history_insight(symbol)];
    }
    let mut out = Vec::new();

    if balance > 0.0 {
        if stats.send_transactions == 0 && stats.receive_transactions > 0 {
            out.push(format!(
                "This looks like a holding wallet: it has received {} but never sent any out.",
                symbol
            ));
        } else if stats.send_transactions > 0 && stats.total_received > 0.0 {
            let flow = stats.total_sent / stats.total_received;
            if flow < 0.2 {
                out.push(format!(
                    "This wallet mostly accumulates {}, passing on only a small share of what it receives.",
                    symbol
                ));
            } else if flow > 0.8 && flow < 1.2 {
                out.push(format!(
                    "Inflows and outflows are balanced: this wallet sends out about as much {} as it receives.",
                    symbol
                ));
            } else if flow > 3.0 {
                out.push(format!(
                    "This wallet appears to distribute {}, sending out far more than it has received.",
                    symbol
                ));
            }
        }
    }

    if let Some(first) = stats.first_transaction_date {
        let days = ((now - first).num_seconds() as f64 / 86_400.0).ceil();
        if days > 0.0 {
            let per_day = stats.total_transactions as f64 / days;
            if per_day > 5.0 {
                out.push(format!(
                    "A highly active wallet, averaging {:.1} {} transfers per day.",
                    per_day, symbol
                ));
            } else if per_day < 0.1 {
                out.push(format!(
                    "Activity is infrequent, with long gaps between {} transfers.",
                    symbol
                ));
            }
        }
    }

    if out.is_empty() {
        out.push(typical_wallet_insight(symbol));
    }
    out
}

// ── MEV insights ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MevSummary {
    pub last_24h: MevWindowStats,
    pub last_week: MevWindowStats,
    /// Half-over-half change of the daily anomaly ratio, in percent.
    pub anomaly_trend_pct: f64,
    pub latest_avg_sandwich: Option<f64>,
    pub latest_avg_frontrun: Option<f64>,
    pub risk_score: f64,
}

pub fn mev_prompt(symbol: &str, s: &MevSummary) -> String {
    let avg = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".into());
    format!(
        "You are reviewing MEV-style activity around {sym} token transfers.\n\n\
         Last 24h: {b24} blocks with {sym} transfers, {s24} sandwich-like, {f24} frontrun-like.\n\
         Last 7 days: {bw} blocks, {sw} sandwich-like, {fw} frontrun-like.\n\
         Anomaly trend (second half vs first half of the week): {trend:+.1}%\n\
         7-day average sandwich-like blocks per day: {avg_s}\n\
         7-day average frontrun-like blocks per day: {avg_f}\n\
         Heuristic risk score: {risk:.0}/100\n\n\
         Give 3-5 concise observations for a {sym} holder. \
         Put each on its own line starting with a dash (-).",
        sym = symbol,
        b24 = s.last_24h.total_blocks,
        s24 = s.last_24h.sandwich_blocks,
        f24 = s.last_24h.frontrun_blocks,
        bw = s.last_week.total_blocks,
        sw = s.last_week.sandwich_blocks,
        fw = s.last_week.frontrun_blocks,
        trend = s.anomaly_trend_pct,
        avg_s = avg(s.latest_avg_sandwich),
        avg_f = avg(s.latest_avg_frontrun),
        risk = s.risk_score,
    )
}

pub fn mev_fallback_insights(symbol: &str, s: &MevSummary) -> Vec<String> {
    let mut out = vec![format!(
        "In the last 24 hours {} of {} blocks carrying {} transfers looked sandwich-like and {} frontrun-like.",
        s.last_24h.sandwich_blocks, s.last_24h.total_blocks, symbol, s.last_24h.frontrun_blocks
    )];
    if s.last_24h.sandwich_ratio() >= 0.10 {
        out.push(format!(
            "Sandwich-like blocks are elevated at {:.1}% of recent blocks.",
            s.last_24h.sandwich_ratio() * 100.0
        ));
    }
    if s.last_24h.frontrun_ratio() >= 0.05 {
        out.push(format!(
            "Mirrored transfers of similar size appear in {:.1}% of recent blocks.",
            s.last_24h.frontrun_ratio() * 100.0
        ));
    }
    if s.anomaly_trend_pct > 25.0 {
        out.push(format!("Anomalous block activity rose {:.1}% over the past week.", s.anomaly_trend_pct));
    } else if s.anomaly_trend_pct < -25.0 {
        out.push(format!("Anomalous block activity fell {:.1}% over the past week.", -s.anomaly_trend_pct));
    }
    out.push(
        if s.risk_score >= 70.0 {
            "Overall MEV risk is high; large transfers benefit from private transaction routing."
        } else if s.risk_score <= 30.0 {
            "Overall MEV risk is low."
        } else {
            "Overall MEV risk is moderate."
        }
        .to_string(),
    );
    out
}

// ── Market predictions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionType {
    Accumulation,
    Distribution,
    WhaleMovement,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPrediction {
    #[serde(rename = "type")]
    pub kind: PredictionType,
    pub probability: f64,
    pub reasoning: String,
    pub suggested_action: String,
    pub timeframe: String,
    pub confidence: Level,
    pub potential_impact: Level,
}

pub fn prediction_prompt(symbol: &str, current: &MarketSnapshot, trends: &MarketTrends, averages: &HourlyAverages) -> String {
    format!(
        "Analyze this {sym} market data and predict likely movements.\n\n\
         Current hour:\n\
         - Transaction Volume: ${volume:.2}\n\
         - Unique Active Wallets: {wallets}\n\
         - Whale Transactions: {whales}\n\
         - Whale Volume: ${whale_volume:.2}\n\
         - Accumulation Wallets: {acc}\n\
         - Distribution Wallets: {dist}\n\n\
         Recent trends:\n\
         - Volume: {vt}\n\
         - Whale Activity: {wt}\n\
         - Network Activity: {nt}\n\n\
         Hourly averages:\n\
         - Transactions: {avg_tx}\n\
         - Volume: ${avg_vol}\n\
         - Whale Transactions: {avg_whale}\n\n\
         Reply with only a JSON array of 3 objects shaped like\n\
         {{\"type\": \"ACCUMULATION|DISTRIBUTION|WHALE_MOVEMENT|NORMAL\", \"probability\": 0.0-1.0, \
         \"reasoning\": \"...\", \"suggestedAction\": \"...\", \"timeframe\": \"...\", \
         \"confidence\": \"HIGH|MEDIUM|LOW\", \"potentialImpact\": \"HIGH|MEDIUM|LOW\"}}",
        sym = symbol,
        volume = current.volume,
        wallets = current.unique_senders + current.unique_receivers,
        whales = current.whale_transactions,
        whale_volume = current.whale_volume,
        acc = current.accumulation_wallets,
        dist = current.distribution_wallets,
        vt = trends.volume,
        wt = trends.whale_activity,
        nt = trends.network_activity,
        avg_tx = averages.avg_tx_count,
        avg_vol = averages.avg_volume,
        avg_whale = averages.avg_whale_tx,
    )
}

/// Strip a markdown code fence the model may wrap its JSON in.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn non_empty_str(v: &Value, field: &str) -> Option<String> {
    v.get(field)
        .and_then(|f| f.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn validate_prediction(v: &Value) -> Option<MarketPrediction> {
    let kind: PredictionType = serde_json::from_value(v.get("type")?.clone()).ok()?;
    let probability = v.get("probability")?.as_f64()?;
    if !(0.0..=1.0).contains(&probability) {
        return None;
    }
    Some(MarketPrediction {
        kind,
        probability: round2(probability),
        reasoning: non_empty_str(v, "reasoning")?,
        suggested_action: non_empty_str(v, "suggestedAction")?,
        timeframe: non_empty_str(v, "timeframe")?,
        confidence: serde_json::from_value(v.get("confidence")?.clone()).ok()?,
        potential_impact: serde_json::from_value(v.get("potentialImpact")?.clone()).ok()?,
    })
}

/// Valid predictions from a model reply; malformed entries are dropped.
/// Returns an empty list when the reply is not a JSON array at all.
pub fn parse_predictions(text: &str) -> Vec<MarketPrediction> {
    match serde_json::from_str::<Vec<Value>>(strip_code_fence(text)) {
        Ok(items) => items.iter().filter_map(validate_prediction).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn fallback_predictions(current: &MarketSnapshot) -> Vec<MarketPrediction> {
    let mut out = Vec::new();
    if current.whale_transactions > 0 {
        out.push(MarketPrediction {
            kind: PredictionType::WhaleMovement,
            probability: 0.7,
            reasoning: format!(
                "{} whale transfers in the latest hour moving ${:.2}",
                current.whale_transactions, current.whale_volume
            ),
            suggested_action: "Watch large wallet movements closely".into(),
            timeframe: "Next 24 hours".into(),
            confidence: Level::Medium,
            potential_impact: Level::High,
        });
    }
    if current.accumulation_wallets > current.distribution_wallets {
        out.push(MarketPrediction {
            kind: PredictionType::Accumulation,
            probability: 0.65,
            reasoning: format!("{} wallets are accumulating", current.accumulation_wallets),
            suggested_action: "Expect continued inflows to large holders".into(),
            timeframe: "2-3 days".into(),
            confidence: Level::Medium,
            potential_impact: Level::Medium,
        });
    } else if current.distribution_wallets > current.accumulation_wallets {
        out.push(MarketPrediction {
            kind: PredictionType::Distribution,
            probability: 0.65,
            reasoning: format!("{} wallets are distributing", current.distribution_wallets),
            suggested_action: "Watch for redemption or selling pressure".into(),
            timeframe: "2-3 days".into(),
            confidence: Level::Medium,
            potential_impact: Level::Medium,
        });
    }
    if out.len() < 2 {
        out.push(MarketPrediction {
            kind: PredictionType::Normal,
            probability: 0.8,
            reasoning: "Market metrics are within normal ranges".into(),
            suggested_action: "Keep regular monitoring".into(),
            timeframe: "24 hours".into(),
            confidence: Level::High,
            potential_impact: Level::Low,
        });
    }
    out
}
