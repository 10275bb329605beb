// Stablescope — Shared application state.
// Every owned collaborator is constructed once per process and handed to the
// request handlers behind one `Arc<AppState>`.

use crate::config::StablescopeConfig;
use crate::engine::chain::{ChainReader, ChainReaderConfig, HttpRpcTransport};
use crate::engine::feed::{FeedSettings, LiveTransferFeed};
use crate::engine::insights::InsightGenerator;
use crate::engine::providers::AnyGenerator;
use crate::engine::warehouse::open_warehouse;
use chrono::{DateTime, Utc};
use log::info;
use stablescope_core::atoms::traits::{RpcTransport, Warehouse};
use stablescope_core::EngineResult;
use std::sync::Arc;
use std::time::Duration;

/// Source of "now" for report windows; swapped for a fixed instant in tests.
pub type Clock = fn() -> DateTime<Utc>;

pub struct AppState {
    pub config: StablescopeConfig,
    pub reader: Arc<ChainReader>,
    pub warehouse: Arc<dyn Warehouse>,
    pub insights: InsightGenerator,
    pub feed: Arc<LiveTransferFeed>,
    clock: Clock,
}

impl AppState {
    /// Wire the state from already-built collaborators. The feed is created
    /// but not started.
    pub fn new(
        config: StablescopeConfig,
        transport: Arc<dyn RpcTransport>,
        warehouse: Arc<dyn Warehouse>,
        generator: AnyGenerator,
    ) -> Self {
        let reader = Arc::new(ChainReader::new(transport, ChainReaderConfig::from(&config.chain)));
        let feed = LiveTransferFeed::new(reader.clone(), FeedSettings::from_config(&config));
        let insights = InsightGenerator::new(
            generator,
            Duration::from_secs(config.ai.timeout_secs),
            config.token.symbol.clone(),
        );
        AppState { config, reader, warehouse, insights, feed, clock: Utc::now }
    }

    /// Build the production collaborators named by `config`.
    pub fn from_config(config: StablescopeConfig) -> EngineResult<Self> {
        let transport = HttpRpcTransport::from_config(&config.chain)?;
        let warehouse = open_warehouse(&config.warehouse)?;
        let generator = AnyGenerator::from_config(&config.ai)?;
        // Provider URLs often embed an API key in the path; log the host only.
        let rpc_host = url::Url::parse(&config.chain.rpc_url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| "?".into());
        info!(
            "[config] Token {} ({}), rpc host={}, ai={}",
            config.token.symbol,
            config.token.address,
            rpc_host,
            generator.name()
        );
        Ok(Self::new(config, Arc::new(transport), warehouse, generator))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn warehouse_timeout(&self) -> Duration {
        Duration::from_secs(self.config.warehouse.timeout_secs)
    }
}
