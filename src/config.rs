// Stablescope — Configuration
//
// One TOML file, every field defaulted so an empty file (or no file) is a
// working local setup. Secrets and deployment-specific endpoints can also come
// from the environment, which wins over the file:
//
//   STABLESCOPE_RPC_URL          chain.rpc_url
//   GEMINI_API_KEY               ai.api_key
//   STABLESCOPE_WAREHOUSE_TOKEN  warehouse.access_token
//   GOOGLE_CLOUD_PROJECT         warehouse.project_id
//   STABLESCOPE_SQLITE_PATH      warehouse.sqlite_path (and selects the sqlite backend)

use serde::{Deserialize, Serialize};
use stablescope_core::atoms::constants::*;
use stablescope_core::atoms::types::DedupKey;
use stablescope_core::metrics::MevThresholds;
use stablescope_core::primitives::is_valid_address;
use stablescope_core::{EngineError, EngineResult};
use std::path::Path;

// ── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Loopback by default. Any other address exposes an unauthenticated API.
    #[serde(default = "default_bind")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-peer budget for each one-minute window; 0 turns limiting off.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_bind() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }
fn default_rate_limit() -> u32 { 120 }

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind(),
            port: default_port(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_address")]
    pub address: String,
    #[serde(default = "default_token_symbol")]
    pub symbol: String,
    #[serde(default = "default_token_decimals")]
    pub decimals: u8,
}

fn default_token_address() -> String { DEFAULT_TOKEN_ADDRESS.into() }
fn default_token_symbol() -> String { DEFAULT_TOKEN_SYMBOL.into() }
fn default_token_decimals() -> u8 { DEFAULT_TOKEN_DECIMALS }

impl Default for TokenConfig {
    fn default() -> Self {
        TokenConfig {
            address: default_token_address(),
            symbol: default_token_symbol(),
            decimals: default_token_decimals(),
        }
    }
}

impl TokenConfig {
    /// Lowercase contract address, the form warehouse rows use.
    pub fn address_lower(&self) -> String {
        self.address.to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Widest eth_getLogs span the provider accepts.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
    /// The HTTP client is rebuilt once it is older than this.
    #[serde(default = "default_connection_max_age")]
    pub connection_max_age_secs: u64,
}

fn default_rpc_url() -> String { "http://127.0.0.1:8545".into() }
fn default_max_block_range() -> u64 { MAX_LOG_BLOCK_RANGE }
fn default_request_delay_ms() -> u64 { LOG_REQUEST_DELAY_MS }
fn default_max_attempts() -> u32 { LOG_RANGE_MAX_ATTEMPTS }
fn default_rpc_timeout() -> u64 { RPC_TIMEOUT_SECS }
fn default_connection_max_age() -> u64 { RPC_CONNECTION_MAX_AGE_SECS }

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            rpc_url: default_rpc_url(),
            max_block_range: default_max_block_range(),
            request_delay_ms: default_request_delay_ms(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_rpc_timeout(),
            connection_max_age_secs: default_connection_max_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_filter_interval")]
    pub filter_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_backfill_batches")]
    pub backfill_batches: u32,
    #[serde(default)]
    pub dedup: DedupKey,
}

fn default_capacity() -> usize { FEED_DEFAULT_CAPACITY }
fn default_filter_interval() -> u64 { FEED_FILTER_INTERVAL_SECS }
fn default_poll_interval() -> u64 { FEED_POLL_INTERVAL_SECS }
fn default_refresh_timeout() -> u64 { FEED_REFRESH_TIMEOUT_SECS }
fn default_backfill_batches() -> u32 { FEED_BACKFILL_BATCHES }

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            capacity: default_capacity(),
            filter_interval_secs: default_filter_interval(),
            poll_interval_secs: default_poll_interval(),
            refresh_timeout_secs: default_refresh_timeout(),
            backfill_batches: default_backfill_batches(),
            dedup: DedupKey::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseBackend {
    Bigquery,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_backend")]
    pub backend: WarehouseBackend,
    /// Google Cloud project billed for BigQuery jobs.
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_table")]
    pub table: String,
    /// OAuth2 bearer token for the BigQuery REST API.
    #[serde(default, skip_serializing)]
    pub access_token: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_warehouse_timeout")]
    pub timeout_secs: u64,
}

fn default_backend() -> WarehouseBackend { WarehouseBackend::Bigquery }
fn default_table() -> String { BIGQUERY_TRANSFERS_TABLE.into() }
fn default_sqlite_path() -> String { "stablescope.db".into() }
fn default_warehouse_timeout() -> u64 { WAREHOUSE_TIMEOUT_SECS }

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            backend: default_backend(),
            project_id: String::new(),
            table: default_table(),
            access_token: String::new(),
            location: None,
            sqlite_path: default_sqlite_path(),
            timeout_secs: default_warehouse_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Empty disables remote commentary; every insight is rule-based.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String { GEMINI_DEFAULT_MODEL.into() }
fn default_ai_base_url() -> String { GEMINI_BASE_URL.into() }
fn default_temperature() -> f64 { 0.4 }
fn default_ai_timeout() -> u64 { AI_TIMEOUT_SECS }

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig {
            api_key: String::new(),
            model: default_model(),
            base_url: default_ai_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MevConfig {
    #[serde(default = "default_sandwich_min")]
    pub sandwich_min_transfers: u32,
    #[serde(default = "default_frontrun_tolerance")]
    pub frontrun_tolerance: f64,
    /// How far back monthly trends reach.
    #[serde(default = "default_history_days")]
    pub history_days: i64,
}

fn default_sandwich_min() -> u32 { MEV_SANDWICH_MIN_TRANSFERS }
fn default_frontrun_tolerance() -> f64 { MEV_FRONTRUN_TOLERANCE }
fn default_history_days() -> i64 { 365 }

impl Default for MevConfig {
    fn default() -> Self {
        MevConfig {
            sandwich_min_transfers: default_sandwich_min(),
            frontrun_tolerance: default_frontrun_tolerance(),
            history_days: default_history_days(),
        }
    }
}

impl MevConfig {
    pub fn thresholds(&self) -> MevThresholds {
        MevThresholds {
            sandwich_min_transfers: self.sandwich_min_transfers,
            frontrun_tolerance: self.frontrun_tolerance,
        }
    }
}

// ── Root ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StablescopeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub mev: MevConfig,
}

impl StablescopeConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(format!("Invalid config: {}", e)))
    }

    /// Read a config file, or start from defaults when `path` is None.
    /// Environment overrides are applied and the result validated.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| EngineError::Config(format!("Cannot read {}: {}", p.display(), e)))?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `lookup` is injected so tests never touch the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("STABLESCOPE_RPC_URL") {
            self.chain.rpc_url = v;
        }
        if let Some(v) = non_empty("GEMINI_API_KEY") {
            self.ai.api_key = v;
        }
        if let Some(v) = non_empty("STABLESCOPE_WAREHOUSE_TOKEN") {
            self.warehouse.access_token = v;
        }
        if let Some(v) = non_empty("GOOGLE_CLOUD_PROJECT") {
            self.warehouse.project_id = v;
        }
        if let Some(v) = non_empty("STABLESCOPE_SQLITE_PATH") {
            self.warehouse.sqlite_path = v;
            self.warehouse.backend = WarehouseBackend::Sqlite;
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !is_valid_address(&self.token.address) {
            return Err(EngineError::Config(format!("token.address is not a valid address: {}", self.token.address)));
        }
        if self.feed.capacity == 0 || self.feed.capacity > FEED_MAX_CAPACITY {
            return Err(EngineError::Config(format!(
                "feed.capacity must be between 1 and {}",
                FEED_MAX_CAPACITY
            )));
        }
        if self.chain.max_block_range == 0 {
            return Err(EngineError::Config("chain.max_block_range must be at least 1".into()));
        }
        if self.chain.max_attempts == 0 {
            return Err(EngineError::Config("chain.max_attempts must be at least 1".into()));
        }
        if !(self.mev.frontrun_tolerance > 0.0 && self.mev.frontrun_tolerance < 1.0) {
            return Err(EngineError::Config("mev.frontrun_tolerance must be in (0, 1)".into()));
        }
        if self.mev.history_days < 7 {
            return Err(EngineError::Config("mev.history_days must be at least 7".into()));
        }
        if self.warehouse.backend == WarehouseBackend::Bigquery && self.warehouse.project_id.is_empty() {
            log::warn!("[config] warehouse.project_id is empty; BigQuery reports will fail until it is set");
        }
        Ok(())
    }
}
