// Stablescope — Insight Generator
// Asks the text provider for commentary and falls back to the rule-based
// version whenever the call fails, times out, or yields nothing usable.

use crate::engine::providers::AnyGenerator;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use stablescope_core::insights::{
    fallback_predictions, mev_fallback_insights, mev_prompt, no_history_insight, parse_insight_lines,
    parse_predictions, prediction_prompt, wallet_fallback_insights, wallet_prompt, MarketPrediction, MevSummary,
    WalletStats,
};
use stablescope_core::metrics::{HourlyAverages, MarketSnapshot, MarketTrends};
use std::time::Duration;

pub struct InsightGenerator {
    generator: AnyGenerator,
    timeout: Duration,
    symbol: String,
}

impl InsightGenerator {
    pub fn new(generator: AnyGenerator, timeout: Duration, symbol: impl Into<String>) -> Self {
        InsightGenerator { generator, timeout, symbol: symbol.into() }
    }

    async fn ask(&self, topic: &str, prompt: &str) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.generator.generate(prompt)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                debug!("[ai] {} commentary unavailable: {}", topic, e);
                None
            }
            Err(_) => {
                warn!("[ai] {} commentary timed out after {}s", topic, self.timeout.as_secs());
                None
            }
        }
    }

    /// 1–5 lines about one wallet. A wallet without history never reaches the provider.
    pub async fn wallet_insights(&self, address: &str, balance: f64, stats: &WalletStats, now: DateTime<Utc>) -> Vec<String> {
        if stats.total_transactions == 0 {
            return vec![no_history_insight(&self.symbol)];
        }
        let prompt = wallet_prompt(address, &self.symbol, balance, stats);
        let lines = self
            .ask("wallet", &prompt)
            .await
            .map(|text| parse_insight_lines(&text))
            .unwrap_or_default();
        if lines.is_empty() {
            wallet_fallback_insights(&self.symbol, balance, stats, now)
        } else {
            lines
        }
    }

    pub async fn mev_insights(&self, summary: &MevSummary) -> Vec<String> {
        let prompt = mev_prompt(&self.symbol, summary);
        let lines = self
            .ask("mev", &prompt)
            .await
            .map(|text| parse_insight_lines(&text))
            .unwrap_or_default();
        if lines.is_empty() {
            mev_fallback_insights(&self.symbol, summary)
        } else {
            lines
        }
    }

    pub async fn predictions(
        &self,
        current: &MarketSnapshot,
        trends: &MarketTrends,
        averages: &HourlyAverages,
    ) -> Vec<MarketPrediction> {
        let prompt = prediction_prompt(&self.symbol, current, trends, averages);
        let parsed = self
            .ask("prediction", &prompt)
            .await
            .map(|text| parse_predictions(&text))
            .unwrap_or_default();
        if parsed.is_empty() {
            fallback_predictions(current)
        } else {
            parsed
        }
    }
}
