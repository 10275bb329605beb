// Stablescope — Text Generation Providers
// `AnyGenerator` wraps `Arc<dyn TextGenerator>` so callers never match on the
// backend. With no API key configured every insight is rule-based.

pub mod google;

pub use google::GoogleGenerator;

use crate::config::AiConfig;
use async_trait::async_trait;
use log::info;
use stablescope_core::atoms::traits::TextGenerator;
use stablescope_core::{EngineError, EngineResult};
use std::sync::Arc;

/// Always fails, so every caller takes its fallback path.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> EngineResult<String> {
        Err(EngineError::provider("disabled", "no AI API key configured"))
    }
}

#[derive(Clone)]
pub struct AnyGenerator(Arc<dyn TextGenerator>);

impl AnyGenerator {
    pub fn from_config(config: &AiConfig) -> EngineResult<Self> {
        let generator: Arc<dyn TextGenerator> = if config.api_key.trim().is_empty() {
            info!("[ai] No API key configured, using rule-based insights");
            Arc::new(DisabledGenerator)
        } else {
            info!("[ai] Using Gemini model {}", config.model);
            Arc::new(GoogleGenerator::new(config)?)
        };
        Ok(AnyGenerator(generator))
    }

    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        AnyGenerator(generator)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub async fn generate(&self, prompt: &str) -> EngineResult<String> {
        self.0.generate(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_key_disables_generation() {
        let generator = AnyGenerator::from_config(&AiConfig::default()).unwrap();
        assert_eq!(generator.name(), "disabled");
        assert!(generator.generate("hi").await.is_err());
    }

    #[test]
    fn key_selects_gemini() {
        let config = AiConfig { api_key: "k".into(), ..AiConfig::default() };
        assert_eq!(AnyGenerator::from_config(&config).unwrap().name(), "gemini");
    }
}
