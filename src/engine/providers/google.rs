// Stablescope — Google Gemini Provider
// Single-shot generateContent; thought parts from thinking models are dropped.

use crate::config::AiConfig;
use crate::engine::http::{send_with_retry, CircuitBreaker, RetryPolicy};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use stablescope_core::atoms::traits::TextGenerator;
use stablescope_core::{EngineError, EngineResult};
use std::time::Duration;

const LABEL: &str = "gemini";

pub struct GoogleGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl GoogleGenerator {
    pub fn new(config: &AiConfig) -> EngineResult<Self> {
        Ok(GoogleGenerator {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            // Insights sit on the request path, so keep retries short.
            retry: RetryPolicy { max_retries: 1, ..RetryPolicy::default() },
            breaker: CircuitBreaker::new(LABEL, 5, Duration::from_secs(60)),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

pub(crate) fn request_body(prompt: &str, temperature: f64) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "temperature": temperature },
    })
}

/// Concatenate the non-thought text parts of the first candidate.
pub(crate) fn extract_text(response: &Value) -> EngineResult<String> {
    let candidate = response
        .pointer("/candidates/0")
        .ok_or_else(|| EngineError::provider(LABEL, "response has no candidates"))?;

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.get("thought").and_then(|t| t.as_bool()).unwrap_or(false))
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.get("finishReason").and_then(|r| r.as_str()).unwrap_or("unknown");
        return Err(EngineError::provider(LABEL, format!("empty response (finishReason={})", reason)));
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GoogleGenerator {
    fn name(&self) -> &str {
        LABEL
    }

    async fn generate(&self, prompt: &str) -> EngineResult<String> {
        let url = self.url();
        let body = request_body(prompt, self.temperature);
        info!("[ai] Gemini request model={}", self.model);

        // Key goes in a header, never the URL, so it cannot appear in logged errors.
        let resp = send_with_retry(LABEL, &self.retry, &self.breaker, || {
            self.client.post(&url).header("x-goog-api-key", &self.api_key).json(&body)
        })
        .await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::provider(LABEL, format!("invalid JSON: {}", e.without_url())))?;

        extract_text(&value).inspect_err(|e| warn!("[ai] {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_shape() {
        let body = request_body("Summarize", 0.4);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Summarize");
        assert_eq!(body["generationConfig"]["temperature"], 0.4);
    }

    #[test]
    fn thought_parts_are_skipped() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "planning...", "thought": true },
                    { "text": "- Volume is up.\n" },
                    { "text": "- Risk is low." }
                ]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(extract_text(&response).unwrap(), "- Volume is up.\n- Risk is low.");
    }

    #[test]
    fn blocked_response_is_error() {
        let response = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        let err = extract_text(&response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(extract_text(&json!({})).is_err());
    }

    #[test]
    fn url_carries_model_not_key() {
        let config = AiConfig { api_key: "secret".into(), ..AiConfig::default() };
        let g = GoogleGenerator::new(&config).unwrap();
        assert_eq!(
            g.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(!g.url().contains("secret"));
    }
}
