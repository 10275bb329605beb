// ── Stablescope Engine: Outbound HTTP Resilience ──────────────────────────
//
// The BigQuery and Gemini clients share one request loop:
//
//   • Transient statuses (429, 500, 502, 503, 504) and transport errors retry
//     with doubling, capped, jittered delays
//   • A numeric `Retry-After` can lengthen a delay (up to 60s), never shorten it
//   • 401/403 end the loop at once
//   • A breaker per client opens after N straight failures and rejects calls
//     until its cooldown has elapsed

use log::warn;
use parking_lot::Mutex;
use stablescope_core::{EngineError, EngineResult};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::{Duration, Instant};

pub const MAX_RETRIES: u32 = 3;

/// Longest error-body excerpt carried into an error message.
const ERROR_BODY_EXCERPT: usize = 200;
const RETRY_AFTER_CAP_SECS: u64 = 60;
const MIN_JITTERED_DELAY_MS: u64 = 100;

pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Integer-seconds form only; HTTP-date values are ignored.
pub fn retry_after_secs(header_value: &str) -> Option<u64> {
    header_value.trim().parse().ok()
}

// ── Backoff ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_retries: MAX_RETRIES, initial_delay: Duration::from_secs(1), max_delay: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry `attempt` (0-based).
    pub fn backoff(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let doubled = self.initial_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let capped = doubled.min(self.max_delay);
        match retry_after {
            Some(secs) => capped.max(Duration::from_secs(secs.min(RETRY_AFTER_CAP_SECS))),
            None => capped,
        }
    }

    async fn pause(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let base = self.backoff(attempt, retry_after);
        let delay = if base.is_zero() { base } else { jittered(base, random_u64()) };
        tokio::time::sleep(delay).await;
        delay
    }
}

/// Spread `base` over ±25% using `sample`, never below 100ms.
fn jittered(base: Duration, sample: u64) -> Duration {
    let base_ms = base.as_millis() as u64;
    let spread = base_ms / 4;
    let ms = if spread == 0 { base_ms } else { base_ms - spread + sample % (2 * spread + 1) };
    Duration::from_millis(ms.max(MIN_JITTERED_DELAY_MS))
}

fn random_u64() -> u64 {
    RandomState::new().build_hasher().finish()
}

// ── Circuit Breaker ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { failures: u32, until: Instant },
}

/// Opens after `threshold` consecutive failures. Once the cooldown passes,
/// calls are let through again; the next failure re-opens it immediately.
pub struct CircuitBreaker {
    name: &'static str,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker { name, threshold: threshold.max(1), cooldown, state: Mutex::new(BreakerState::Closed { failures: 0 }) }
    }

    pub fn allow(&self) -> EngineResult<()> {
        match *self.state.lock() {
            BreakerState::Open { failures, until } if Instant::now() < until => Err(EngineError::provider(
                self.name,
                format!(
                    "circuit open after {} consecutive failures, retry in {}s",
                    failures,
                    until.saturating_duration_since(Instant::now()).as_secs()
                ),
            )),
            _ => Ok(()),
        }
    }

    pub fn on_success(&self) {
        *self.state.lock() = BreakerState::Closed { failures: 0 };
    }

    pub fn on_failure(&self) {
        let mut state = self.state.lock();
        let failures = match *state {
            BreakerState::Closed { failures } | BreakerState::Open { failures, .. } => failures + 1,
        };
        *state = if failures >= self.threshold {
            warn!("[{}] Circuit open after {} consecutive failures for {}s", self.name, failures, self.cooldown.as_secs());
            BreakerState::Open { failures, until: Instant::now() + self.cooldown }
        } else {
            BreakerState::Closed { failures }
        };
    }
}

// ── Request loop ───────────────────────────────────────────────────────────

fn excerpt(text: &str) -> String {
    text.chars().take(ERROR_BODY_EXCERPT).collect()
}

/// Send a request with retries and circuit breaking. `build` is called once
/// per attempt. Errors are `EngineError::Provider` tagged with `label`; URLs
/// are stripped from transport errors so query-string secrets never leak.
pub async fn send_with_retry<F>(
    label: &str,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    build: F,
) -> EngineResult<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    breaker.allow()?;

    let mut last_error = String::new();
    let mut retry_after: Option<u64> = None;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.pause(attempt - 1, retry_after.take()).await;
            warn!("[{}] Retry {}/{} after {}ms", label, attempt, policy.max_retries, delay.as_millis());
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                breaker.on_failure();
                last_error = if e.is_timeout() {
                    "request timed out".into()
                } else {
                    format!("HTTP request failed: {}", e.without_url())
                };
                continue;
            }
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            breaker.on_success();
            return Ok(response);
        }

        retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(retry_after_secs);
        let body_text = response.text().await.unwrap_or_default();
        last_error = format!("API error {}: {}", status, excerpt(&body_text));
        breaker.on_failure();

        if status == 401 || status == 403 {
            return Err(EngineError::provider(label, format!("authentication failed ({})", status)));
        }
        if !is_transient_status(status) {
            break;
        }
    }
    Err(EngineError::provider(label, last_error))
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        assert!([429, 500, 502, 503, 504].into_iter().all(is_transient_status));
        assert!(![200, 400, 401, 403, 404].into_iter().any(is_transient_status));
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(retry_after_secs(" 30 "), Some(30));
        assert_eq!(retry_after_secs("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn backoff_doubles_caps_and_honours_retry_after() {
        let p = RetryPolicy::default();
        let ms = |d: Duration| d.as_millis() as u64;
        assert_eq!(ms(p.backoff(0, None)), 1_000);
        assert_eq!(ms(p.backoff(2, None)), 4_000);
        assert_eq!(ms(p.backoff(40, None)), 30_000);
        assert_eq!(ms(p.backoff(0, Some(5))), 5_000);
        assert_eq!(ms(p.backoff(3, Some(1))), 8_000);
        assert_eq!(ms(p.backoff(0, Some(3_600))), 60_000);
        let idle = RetryPolicy { max_retries: 0, initial_delay: Duration::ZERO, max_delay: Duration::ZERO };
        assert!(idle.backoff(3, None).is_zero());
    }

    #[test]
    fn jitter_bounds() {
        let base = Duration::from_millis(1_000);
        assert_eq!(jittered(base, 0), Duration::from_millis(750));
        assert_eq!(jittered(base, 500), Duration::from_millis(1_250));
        assert_eq!(jittered(Duration::from_millis(20), 7), Duration::from_millis(100));
    }

    #[test]
    fn breaker_opens_and_resets() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        cb.on_failure();
        cb.on_failure();
        assert!(cb.allow().is_ok());
        cb.on_failure();
        assert!(cb.allow().is_err());
        cb.on_success();
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn breaker_lets_calls_through_after_cooldown() {
        let cb = CircuitBreaker::new("test", 1, Duration::ZERO);
        cb.on_failure();
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn excerpt_is_char_safe() {
        let text = "é".repeat(500);
        assert_eq!(excerpt(&text).chars().count(), ERROR_BODY_EXCERPT);
    }
}
