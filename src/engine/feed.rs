// Stablescope — Live Transfer Feed
//
// Keeps the most recent token transfers in memory for `/transfers`.
//
// Modes:
//   Uninitialized   → install a log filter, then backfill recent blocks
//   FilterActive    → poll eth_getFilterChanges every 5s
//   PollingFallback → scan eth_getLogs from the watermark every 15s
//
// A failing filter gets exactly one resubscribe; the next failure drops the
// feed into polling for the rest of its life. Refreshes never propagate
// errors, never overlap, and are bounded by a timeout.

use crate::config::StablescopeConfig;
use crate::engine::chain::ChainReader;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use stablescope_core::atoms::constants::TRANSFER_TOPIC;
use stablescope_core::atoms::types::{DedupKey, FeedMode, RawLog, Transfer};
use stablescope_core::EngineResult;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Block timestamps are cached across refreshes up to this many entries.
const BLOCK_TIME_CACHE_LIMIT: usize = 512;

// ── Settings ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub token: String,
    pub decimals: u8,
    pub capacity: usize,
    pub filter_interval: Duration,
    pub poll_interval: Duration,
    pub refresh_timeout: Duration,
    /// How many `max_block_range`-wide batches backfill may walk back.
    pub backfill_batches: u32,
    pub dedup: DedupKey,
}

impl FeedSettings {
    pub fn from_config(config: &StablescopeConfig) -> Self {
        FeedSettings {
            token: config.token.address_lower(),
            decimals: config.token.decimals,
            capacity: config.feed.capacity,
            filter_interval: Duration::from_secs(config.feed.filter_interval_secs),
            poll_interval: Duration::from_secs(config.feed.poll_interval_secs),
            refresh_timeout: Duration::from_secs(config.feed.refresh_timeout_secs),
            backfill_batches: config.feed.backfill_batches,
            dedup: config.feed.dedup,
        }
    }
}

// ── Merge ──────────────────────────────────────────────────────────────────

/// Merge a batch into the current list: incoming entries replace existing
/// ones with the same key, the result is ordered newest block first (then
/// highest log index) and truncated to `capacity`.
pub fn merge_transfers(existing: &[Transfer], incoming: Vec<Transfer>, capacity: usize, dedup: DedupKey) -> Vec<Transfer> {
    let mut merged: Vec<Transfer> = Vec::with_capacity(existing.len() + incoming.len());
    let mut seen: HashSet<String> = HashSet::new();

    // Within one batch the later log wins too, so walk incoming in reverse.
    for t in incoming.into_iter().rev() {
        if seen.insert(dedup.key_for(&t)) {
            merged.push(t);
        }
    }
    for t in existing {
        if seen.insert(dedup.key_for(t)) {
            merged.push(t.clone());
        }
    }

    merged.sort_by(|a, b| b.block_number.cmp(&a.block_number).then(b.log_index.cmp(&a.log_index)));
    merged.truncate(capacity);
    merged
}

// ── Feed ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub mode: FeedMode,
    pub last_processed_block: u64,
    pub size: usize,
    pub capacity: usize,
}

#[derive(Default)]
struct FeedState {
    filter_id: Option<String>,
    resubscribed: bool,
    block_times: HashMap<u64, i64>,
}

pub struct LiveTransferFeed {
    reader: Arc<ChainReader>,
    settings: FeedSettings,
    /// Held for the duration of a refresh; `try_lock` failing means one is running.
    state: tokio::sync::Mutex<FeedState>,
    mode: RwLock<FeedMode>,
    transfers: RwLock<Arc<Vec<Transfer>>>,
    watermark: AtomicU64,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl LiveTransferFeed {
    pub fn new(reader: Arc<ChainReader>, settings: FeedSettings) -> Arc<Self> {
        Arc::new(LiveTransferFeed {
            reader,
            settings,
            state: tokio::sync::Mutex::new(FeedState::default()),
            mode: RwLock::new(FeedMode::Uninitialized),
            transfers: RwLock::new(Arc::new(Vec::new())),
            watermark: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    // ── Read side ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<Vec<Transfer>> {
        self.transfers.read().clone()
    }

    /// The `count` most recent transfers.
    pub fn latest(&self, count: usize) -> Vec<Transfer> {
        self.snapshot().iter().take(count).cloned().collect()
    }

    pub fn mode(&self) -> FeedMode {
        *self.mode.read()
    }

    pub fn last_processed_block(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            mode: self.mode(),
            last_processed_block: self.last_processed_block(),
            size: self.snapshot().len(),
            capacity: self.settings.capacity,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Run the first refresh (initialization) now and keep refreshing in the
    /// background until `shutdown`.
    pub fn spawn(self: &Arc<Self>) {
        let feed = Arc::clone(self);
        let handle = tokio::spawn(async move {
            feed.refresh().await;
            loop {
                let interval = match feed.mode() {
                    FeedMode::FilterActive => feed.settings.filter_interval,
                    FeedMode::Uninitialized | FeedMode::PollingFallback => feed.settings.poll_interval,
                };
                tokio::select! {
                    _ = feed.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        feed.refresh().await;
                    }
                }
            }
            debug!("[feed] Refresh loop stopped");
        });
        *self.task.lock() = Some(handle);
    }

    /// Stop the loop and remove the filter. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[feed] Refresh task ended abnormally: {}", e);
            }
        }

        let mut state = self.state.lock().await;
        self.release_filter(&mut state).await;
        *self.mode.write() = FeedMode::Uninitialized;
        info!("[feed] Stopped at block {}", self.last_processed_block());
    }

    /// One refresh cycle. Returns false when skipped because another refresh
    /// is still running or the feed is stopped; errors are logged, never returned.
    pub async fn refresh(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let Ok(mut state) = self.state.try_lock() else {
            debug!("[feed] Refresh already in progress, skipping");
            return false;
        };
        match tokio::time::timeout(self.settings.refresh_timeout, self.refresh_locked(&mut state)).await {
            Ok(Ok(added)) if added > 0 => debug!("[feed] {} new transfers", added),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("[feed] Refresh failed: {}", e),
            Err(_) => warn!("[feed] Refresh timed out after {}s", self.settings.refresh_timeout.as_secs()),
        }
        true
    }

    /// Run the first refresh if nothing has initialized the feed yet. A
    /// refresh already in flight is waited for rather than skipped. Returns
    /// whether the feed has left `Uninitialized`.
    pub async fn ensure_initialized(&self) -> bool {
        if self.mode() != FeedMode::Uninitialized {
            return true;
        }
        if !self.refresh().await {
            // Another refresh holds the lock; it is bounded by refresh_timeout.
            drop(self.state.lock().await);
        }
        self.mode() != FeedMode::Uninitialized
    }

    async fn refresh_locked(&self, state: &mut FeedState) -> EngineResult<usize> {
        match self.mode() {
            FeedMode::Uninitialized => self.initialize(state).await,
            FeedMode::FilterActive => self.refresh_from_filter(state).await,
            FeedMode::PollingFallback => self.poll(state).await,
        }
    }

    // ── Modes ──────────────────────────────────────────────────────────

    /// The filter is installed before the head is read, so every block after
    /// `head` is reported by the filter and nothing mined during the backfill
    /// falls between the two.
    async fn initialize(&self, state: &mut FeedState) -> EngineResult<usize> {
        // Left over from an initialization that timed out.
        self.release_filter(state).await;
        let filter = self.reader.new_filter(&self.settings.token, &[TRANSFER_TOPIC]).await;
        let head = match self.reader.current_block_number().await {
            Ok(head) => head,
            Err(e) => {
                if let Ok(id) = filter {
                    state.filter_id = Some(id);
                    self.release_filter(state).await;
                }
                return Err(e);
            }
        };
        let next_mode = match filter {
            Ok(id) => {
                info!("[feed] Filter {} installed at block {}", id, head);
                state.filter_id = Some(id);
                FeedMode::FilterActive
            }
            Err(e) => {
                warn!("[feed] Filter unavailable, polling instead: {}", e);
                FeedMode::PollingFallback
            }
        };

        let added = self.backfill(state, head).await;
        self.watermark.fetch_max(head, Ordering::AcqRel);
        self.set_mode(next_mode);
        Ok(added)
    }

    /// Walk back from `head` in `max_block_range` batches until the feed is full
    /// or the batch budget is spent.
    async fn backfill(&self, state: &mut FeedState, head: u64) -> usize {
        let width = self.reader.max_block_range();
        let mut added = 0;
        let mut to = head;
        for _ in 0..self.settings.backfill_batches {
            let from = to.saturating_sub(width - 1);
            let scan = self.reader.get_logs_in_range(&self.settings.token, &[TRANSFER_TOPIC], from, to).await;
            added += self.ingest(state, scan.logs).await;
            if self.snapshot().len() >= self.settings.capacity || from == 0 {
                break;
            }
            to = from - 1;
        }
        info!("[feed] Backfilled {} transfers ending at block {}", self.snapshot().len(), head);
        added
    }

    async fn refresh_from_filter(&self, state: &mut FeedState) -> EngineResult<usize> {
        let Some(id) = state.filter_id.clone() else {
            self.set_mode(FeedMode::PollingFallback);
            return self.poll(state).await;
        };
        match self.reader.filter_changes(&id).await {
            Ok(logs) => Ok(self.ingest(state, logs).await),
            Err(e) if !state.resubscribed => {
                warn!("[feed] Filter {} failed ({}), resubscribing", id, e);
                state.resubscribed = true;
                self.release_filter(state).await;
                match self.reader.new_filter(&self.settings.token, &[TRANSFER_TOPIC]).await {
                    Ok(new_id) => {
                        info!("[feed] Resubscribed with filter {}", new_id);
                        state.filter_id = Some(new_id);
                        // Blocks mined while the old filter was dead are read directly.
                        self.catch_up(state).await
                    }
                    Err(e) => {
                        warn!("[feed] Resubscribe failed ({}), switching to polling", e);
                        self.set_mode(FeedMode::PollingFallback);
                        self.poll(state).await
                    }
                }
            }
            Err(e) => {
                warn!("[feed] Filter {} failed again ({}), switching to polling", id, e);
                self.release_filter(state).await;
                self.set_mode(FeedMode::PollingFallback);
                self.poll(state).await
            }
        }
    }

    async fn poll(&self, state: &mut FeedState) -> EngineResult<usize> {
        let head = self.reader.current_block_number().await?;
        let added = self.scan_to(state, head).await;
        self.watermark.fetch_max(head, Ordering::AcqRel);
        Ok(added)
    }

    async fn catch_up(&self, state: &mut FeedState) -> EngineResult<usize> {
        let head = self.reader.current_block_number().await?;
        Ok(self.scan_to(state, head).await)
    }

    /// Scan `(watermark, head]`, bounded to the backfill window so a long
    /// outage does not turn into an unbounded scan.
    async fn scan_to(&self, state: &mut FeedState, head: u64) -> usize {
        let watermark = self.last_processed_block();
        if head <= watermark {
            return 0;
        }
        let window = self.reader.max_block_range() * u64::from(self.settings.backfill_batches.max(1));
        let mut from = watermark + 1;
        if head - watermark > window {
            from = head - window + 1;
            warn!("[feed] {} blocks behind, skipping to {}", head - watermark, from);
        }
        let scan = self.reader.get_logs_in_range(&self.settings.token, &[TRANSFER_TOPIC], from, head).await;
        self.ingest(state, scan.logs).await
    }

    /// Best effort: a node that already dropped the filter just logs.
    async fn release_filter(&self, state: &mut FeedState) {
        if let Some(id) = state.filter_id.take() {
            match self.reader.uninstall_filter(&id).await {
                Ok(_) => debug!("[feed] Uninstalled filter {}", id),
                Err(e) => debug!("[feed] Could not uninstall filter {}: {}", id, e),
            }
        }
    }

    fn set_mode(&self, mode: FeedMode) {
        let mut current = self.mode.write();
        if *current != mode {
            info!("[feed] Mode {:?} -> {:?}", *current, mode);
            *current = mode;
        }
    }

    // ── Ingest ─────────────────────────────────────────────────────────

    async fn block_time(&self, state: &mut FeedState, block: u64) -> EngineResult<i64> {
        if let Some(ts) = state.block_times.get(&block) {
            return Ok(*ts);
        }
        let ts = self.reader.get_block(block).await?.timestamp;
        if state.block_times.len() >= BLOCK_TIME_CACHE_LIMIT {
            state.block_times.clear();
        }
        state.block_times.insert(block, ts);
        Ok(ts)
    }

    /// Decode logs, merge them into the list, and advance the watermark.
    /// Returns how many decoded transfers were offered to the merge.
    async fn ingest(&self, state: &mut FeedState, logs: Vec<RawLog>) -> usize {
        let mut decoded = Vec::with_capacity(logs.len());
        let mut highest = None;
        for log in logs.iter().filter(|l| !l.removed) {
            let ts = match self.block_time(state, log.block_number).await {
                Ok(ts) => ts,
                Err(e) => {
                    warn!("[feed] No timestamp for block {}: {}", log.block_number, e);
                    continue;
                }
            };
            match Transfer::from_log(log, self.settings.decimals, ts) {
                Ok(t) => {
                    highest = highest.max(Some(t.block_number));
                    decoded.push(t);
                }
                Err(e) => warn!("[feed] Skipping undecodable log: {}", e),
            }
        }
        if decoded.is_empty() {
            return 0;
        }

        let count = decoded.len();
        let merged = {
            let current = self.snapshot();
            merge_transfers(&current, decoded, self.settings.capacity, self.settings.dedup)
        };
        *self.transfers.write() = Arc::new(merged);
        if let Some(block) = highest {
            self.watermark.fetch_max(block, Ordering::AcqRel);
        }
        count
    }
}
