// ── Stablescope Atoms: Constants ───────────────────────────────────────────
// Named constants shared by the engine. Anything an operator may want to
// change is also exposed through the config file; these are the defaults.

// ── Token ──────────────────────────────────────────────────────────────────
// PYUSD on Ethereum mainnet.
pub const DEFAULT_TOKEN_ADDRESS: &str = "0x6c3ea9036406852006290770BEdFcAbA0e23A0e8";
pub const DEFAULT_TOKEN_SYMBOL: &str = "PYUSD";
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Mints originate here and burns end here.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ── Chain reader ───────────────────────────────────────────────────────────
// The node provider rejects eth_getLogs spans wider than 5 blocks.
pub const MAX_LOG_BLOCK_RANGE: u64 = 5;
pub const LOG_REQUEST_DELAY_MS: u64 = 100;
pub const LOG_RANGE_MAX_ATTEMPTS: u32 = 3;
pub const RPC_TIMEOUT_SECS: u64 = 20;
pub const RPC_CONNECTION_MAX_AGE_SECS: u64 = 30 * 60;

// ── Live transfer feed ─────────────────────────────────────────────────────
pub const FEED_DEFAULT_CAPACITY: usize = 20;
pub const FEED_MAX_CAPACITY: usize = 50;
pub const FEED_FILTER_INTERVAL_SECS: u64 = 5;
pub const FEED_POLL_INTERVAL_SECS: u64 = 15;
pub const FEED_REFRESH_TIMEOUT_SECS: u64 = 30;
/// Backfill walks back at most this many 5-block batches on startup.
pub const FEED_BACKFILL_BATCHES: u32 = 20;

// ── Metrics ────────────────────────────────────────────────────────────────
pub const MOVING_AVERAGE_WINDOW: usize = 7;
pub const MEV_BASELINE_SCORE: f64 = 50.0;
pub const MEV_SANDWICH_MIN_TRANSFERS: u32 = 3;
pub const MEV_FRONTRUN_TOLERANCE: f64 = 0.10;
pub const MEV_RECENT_ACTIVITY_LIMIT: usize = 10;
/// Holder supply from the warehouse is replaced by the on-chain figure past this deviation.
pub const SUPPLY_DEVIATION_TOLERANCE: f64 = 0.10;

// ── Market predictions ─────────────────────────────────────────────────────
/// Whole tokens; a single transfer at or above this is a whale movement.
pub const WHALE_THRESHOLD_TOKENS: u64 = 100_000;
/// Transfers within 24h that mark a wallet as accumulating or distributing.
pub const WALLET_PATTERN_MIN_TRANSFERS: u32 = 3;

// ── Insights ───────────────────────────────────────────────────────────────
pub const INSIGHT_SENTENCE_MIN_LEN: usize = 10;
pub const INSIGHT_SENTENCE_MAX_LEN: usize = 150;
pub const INSIGHT_MAX_LINES: usize = 5;

// ── Warehouse ──────────────────────────────────────────────────────────────
pub const BIGQUERY_TRANSFERS_TABLE: &str =
    "bigquery-public-data.goog_blockchain_ethereum_mainnet_us.token_transfers";
pub const WAREHOUSE_TIMEOUT_SECS: u64 = 30;

// ── AI provider ────────────────────────────────────────────────────────────
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const AI_TIMEOUT_SECS: u64 = 30;
