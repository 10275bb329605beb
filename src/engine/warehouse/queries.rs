// Stablescope — Warehouse Query Templates
//
// Every analytics query, written once against `Dialect`. All inputs are bound
// parameters: the token, addresses, and unix-second cutoffs computed by the
// caller from an explicit `now` (so results are reproducible in tests).
// Amount columns come back in minor units.

use chrono::NaiveDate;
use stablescope_core::rows::{Dialect, Query, Row};
use stablescope_core::{EngineError, EngineResult};

const DAY: i64 = 86_400;

/// Balance deltas per holder: +amount to the receiver, −amount from the sender.
fn holder_flows_cte(d: &Dialect) -> String {
    let amt = d.amount("t");
    format!(
        "flows AS (
            SELECT t.to_address AS holder, {amt} AS delta
            FROM {table} t WHERE t.address = @token
            UNION ALL
            SELECT t.from_address AS holder, -{amt} AS delta
            FROM {table} t WHERE t.address = @token
        )",
        amt = amt,
        table = d.table()
    )
}

fn parse_day(column: &str, text: &str) -> EngineResult<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| EngineError::decode(column, format!("expected YYYY-MM-DD, got '{}'", text)))
}

// ── Holders ────────────────────────────────────────────────────────────────

pub fn top_holders(d: &Dialect, token: &str, limit: i64) -> Query {
    let sql = format!(
        "WITH {flows}
        SELECT holder AS address, SUM(delta) AS balance
        FROM flows
        GROUP BY holder
        HAVING SUM(delta) > 0
        ORDER BY balance DESC
        LIMIT @limit",
        flows = holder_flows_cte(d)
    );
    Query::new("top_holders", sql).text("token", token).int("limit", limit)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HolderRow {
    pub address: String,
    pub balance: f64,
}

pub fn decode_holder(row: &Row) -> EngineResult<HolderRow> {
    Ok(HolderRow { address: row.text("address")?, balance: row.f64("balance")? })
}

pub fn holder_count(d: &Dialect, token: &str) -> Query {
    let sql = format!(
        "WITH {flows},
        balances AS (SELECT holder, SUM(delta) AS balance FROM flows GROUP BY holder)
        SELECT COUNT(*) AS holders FROM balances WHERE balance > 0",
        flows = holder_flows_cte(d)
    );
    Query::new("holder_count", sql).text("token", token)
}

pub fn decode_holder_count(row: &Row) -> EngineResult<i64> {
    row.i64_or_zero("holders")
}

// ── Supply ─────────────────────────────────────────────────────────────────

/// Lifetime minted and burned totals (transfers from / to the zero address).
pub fn supply_totals(d: &Dialect, token: &str, zero: &str) -> Query {
    let amt = d.amount("t");
    let sql = format!(
        "SELECT
            SUM(CASE WHEN t.from_address = @zero THEN {amt} ELSE 0 END) AS minted,
            SUM(CASE WHEN t.to_address = @zero THEN {amt} ELSE 0 END) AS burned
        FROM {table} t
        WHERE t.address = @token",
        amt = amt,
        table = d.table()
    );
    Query::new("supply_totals", sql).text("token", token).text("zero", zero)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupplyTotals {
    pub minted: f64,
    pub burned: f64,
}

impl SupplyTotals {
    pub fn circulating(&self) -> f64 {
        self.minted - self.burned
    }
}

pub fn decode_supply_totals(row: &Row) -> EngineResult<SupplyTotals> {
    Ok(SupplyTotals { minted: row.f64_or_zero("minted")?, burned: row.f64_or_zero("burned")? })
}

/// Net mint minus burn per calendar day, oldest first.
pub fn daily_supply_changes(d: &Dialect, token: &str, zero: &str) -> Query {
    let amt = d.amount("t");
    let sql = format!(
        "SELECT {day} AS day,
            SUM(CASE WHEN t.from_address = @zero THEN {amt}
                     WHEN t.to_address = @zero THEN -{amt}
                     ELSE 0 END) AS net_change
        FROM {table} t
        WHERE t.address = @token AND (t.from_address = @zero OR t.to_address = @zero)
        GROUP BY day
        ORDER BY day",
        day = d.day("t"),
        amt = amt,
        table = d.table()
    );
    Query::new("daily_supply_changes", sql).text("token", token).text("zero", zero)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyAmount {
    pub day: NaiveDate,
    pub amount: f64,
}

pub fn decode_supply_change(row: &Row) -> EngineResult<DailyAmount> {
    Ok(DailyAmount { day: parse_day("day", &row.text("day")?)?, amount: row.f64_or_zero("net_change")? })
}

// ── Volume ─────────────────────────────────────────────────────────────────

/// Transferred amount per calendar day since `since` (unix seconds), oldest first.
pub fn daily_volume(d: &Dialect, token: &str, since: i64) -> Query {
    let sql = format!(
        "SELECT {day} AS day, SUM({amt}) AS volume
        FROM {table} t
        WHERE t.address = @token AND t.block_timestamp >= {since}
        GROUP BY day
        ORDER BY day",
        day = d.day("t"),
        amt = d.amount("t"),
        table = d.table(),
        since = d.timestamp_param("since")
    );
    Query::new("daily_volume", sql).text("token", token).int("since", since)
}

pub fn decode_daily_volume(row: &Row) -> EngineResult<DailyAmount> {
    Ok(DailyAmount { day: parse_day("day", &row.text("day")?)?, amount: row.f64_or_zero("volume")? })
}

/// Volume in each trailing window and the window before it.
pub fn volume_windows(d: &Dialect, token: &str, now: i64) -> Query {
    let amt = d.amount("t");
    let window = |from: &str, until: Option<&str>| {
        let upper = until
            .map(|u| format!(" AND t.block_timestamp < {}", d.timestamp_param(u)))
            .unwrap_or_default();
        format!(
            "SUM(CASE WHEN t.block_timestamp >= {}{} THEN {} ELSE 0 END)",
            d.timestamp_param(from),
            upper,
            amt
        )
    };
    let sql = format!(
        "SELECT
            {} AS last_24h,
            {} AS prev_24h,
            {} AS last_7d,
            {} AS prev_7d,
            {} AS last_30d,
            {} AS prev_30d
        FROM {table} t
        WHERE t.address = @token AND t.block_timestamp >= {oldest}",
        window("d1", None),
        window("d2", Some("d1")),
        window("d7", None),
        window("d14", Some("d7")),
        window("d30", None),
        window("d60", Some("d30")),
        table = d.table(),
        oldest = d.timestamp_param("d60")
    );
    Query::new("volume_windows", sql)
        .text("token", token)
        .int("d1", now - DAY)
        .int("d2", now - 2 * DAY)
        .int("d7", now - 7 * DAY)
        .int("d14", now - 14 * DAY)
        .int("d30", now - 30 * DAY)
        .int("d60", now - 60 * DAY)
}

pub fn decode_volume_windows(row: &Row) -> EngineResult<stablescope_core::metrics::VolumeWindows> {
    Ok(stablescope_core::metrics::VolumeWindows {
        last_24h: row.f64_or_zero("last_24h")?,
        prev_24h: row.f64_or_zero("prev_24h")?,
        last_7d: row.f64_or_zero("last_7d")?,
        prev_7d: row.f64_or_zero("prev_7d")?,
        last_30d: row.f64_or_zero("last_30d")?,
        prev_30d: row.f64_or_zero("prev_30d")?,
    })
}

// ── MEV ────────────────────────────────────────────────────────────────────

/// Per-day block counts by classification since `since`.
///
/// A block with at least `@sandwich_min` transfers is sandwich-like. Otherwise
/// it is frontrun-like when it holds an opposite-direction pair (A→B, B→A)
/// whose amounts differ by less than `@tolerance` of the first.
pub fn mev_daily_activity(d: &Dialect, token: &str, since: i64, sandwich_min: u32, tolerance: f64) -> Query {
    let sql = format!(
        "WITH txs AS (
            SELECT t.block_number AS block_number, {day} AS day,
                   t.from_address AS from_address, t.to_address AS to_address, {amt} AS amount
            FROM {table} t
            WHERE t.address = @token AND t.block_timestamp >= {since}
        ),
        blocks AS (
            SELECT block_number, MIN(day) AS day, COUNT(*) AS transfers, SUM(amount) AS volume
            FROM txs
            GROUP BY block_number
        ),
        mirrored AS (
            SELECT DISTINCT a.block_number AS block_number
            FROM txs a
            JOIN txs b
              ON a.block_number = b.block_number
             AND a.from_address = b.to_address
             AND a.to_address = b.from_address
             AND a.from_address != a.to_address
            WHERE a.amount > 0
              AND ABS({diff}) / {base} < @tolerance
        )
        SELECT bl.day AS day,
            COUNT(*) AS total_blocks,
            SUM(CASE WHEN bl.transfers >= @sandwich_min THEN 1 ELSE 0 END) AS sandwich_blocks,
            SUM(CASE WHEN bl.transfers < @sandwich_min AND m.block_number IS NOT NULL THEN 1 ELSE 0 END) AS frontrun_blocks,
            SUM(bl.transfers) AS transactions,
            SUM(bl.volume) AS volume
        FROM blocks bl
        LEFT JOIN mirrored m ON m.block_number = bl.block_number
        GROUP BY bl.day
        ORDER BY bl.day",
        day = d.day("t"),
        amt = d.amount("t"),
        table = d.table(),
        since = d.timestamp_param("since"),
        diff = d.as_float("b.amount - a.amount"),
        base = d.as_float("a.amount")
    );
    Query::new("mev_daily_activity", sql)
        .text("token", token)
        .int("since", since)
        .int("sandwich_min", i64::from(sandwich_min))
        .float("tolerance", tolerance)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MevDayRow {
    pub day: NaiveDate,
    pub total_blocks: i64,
    pub sandwich_blocks: i64,
    pub frontrun_blocks: i64,
    pub transactions: i64,
    pub volume: f64,
}

pub fn decode_mev_day(row: &Row) -> EngineResult<MevDayRow> {
    Ok(MevDayRow {
        day: parse_day("day", &row.text("day")?)?,
        total_blocks: row.i64_or_zero("total_blocks")?,
        sandwich_blocks: row.i64_or_zero("sandwich_blocks")?,
        frontrun_blocks: row.i64_or_zero("frontrun_blocks")?,
        transactions: row.i64_or_zero("transactions")?,
        volume: row.f64_or_zero("volume")?,
    })
}

/// Every transfer in the `@blocks` most recent blocks after `since`, newest block first.
pub fn recent_block_transfers(d: &Dialect, token: &str, since: i64, blocks: i64) -> Query {
    let sql = format!(
        "WITH recent AS (
            SELECT DISTINCT t.block_number AS block_number
            FROM {table} t
            WHERE t.address = @token AND t.block_timestamp >= {since}
            ORDER BY block_number DESC
            LIMIT @blocks
        )
        SELECT t.block_number AS block_number, {unix} AS block_time,
               t.transaction_hash AS transaction_hash,
               t.from_address AS from_address, t.to_address AS to_address, {amt} AS amount
        FROM {table} t
        JOIN recent r ON r.block_number = t.block_number
        WHERE t.address = @token
        ORDER BY t.block_number DESC, t.log_index",
        table = d.table(),
        since = d.timestamp_param("since"),
        unix = d.unix_seconds("t"),
        amt = d.amount("t")
    );
    Query::new("recent_block_transfers", sql)
        .text("token", token)
        .int("since", since)
        .int("blocks", blocks)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockTransferRow {
    pub block_number: u64,
    pub block_time: i64,
    pub transaction_hash: String,
    pub from: String,
    pub to: String,
    pub amount: f64,
}

pub fn decode_block_transfer(row: &Row) -> EngineResult<BlockTransferRow> {
    Ok(BlockTransferRow {
        block_number: row.i64("block_number")? as u64,
        block_time: row.i64("block_time")?,
        transaction_hash: row.text("transaction_hash")?,
        from: row.text("from_address")?,
        to: row.text("to_address")?,
        amount: row.f64("amount")?,
    })
}

// ── Market activity ────────────────────────────────────────────────────────

/// Hourly activity buckets since `since`, newest first. Transfers of at least
/// `whale_min` minor units count as whale transactions.
pub fn hourly_activity(d: &Dialect, token: &str, since: i64, whale_min: i64) -> Query {
    let amt = d.amount("t");
    let sql = format!(
        "SELECT {hour} AS hour,
            COUNT(*) AS transaction_count,
            SUM({amt}) AS volume,
            COUNT(DISTINCT t.from_address) AS unique_senders,
            COUNT(DISTINCT t.to_address) AS unique_receivers,
            MAX({amt}) AS max_transfer,
            SUM(CASE WHEN {amt} >= @whale_min THEN 1 ELSE 0 END) AS whale_transactions,
            SUM(CASE WHEN {amt} >= @whale_min THEN {amt} ELSE 0 END) AS whale_volume
        FROM {table} t
        WHERE t.address = @token AND t.block_timestamp >= {since}
        GROUP BY hour
        ORDER BY hour DESC",
        hour = d.hour("t"),
        amt = amt,
        table = d.table(),
        since = d.timestamp_param("since")
    );
    Query::new("hourly_activity", sql)
        .text("token", token)
        .int("since", since)
        .int("whale_min", whale_min)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRow {
    pub hour: i64,
    pub transaction_count: i64,
    pub volume: f64,
    pub unique_senders: i64,
    pub unique_receivers: i64,
    pub max_transfer: f64,
    pub whale_transactions: i64,
    pub whale_volume: f64,
}

pub fn decode_hourly(row: &Row) -> EngineResult<HourlyRow> {
    Ok(HourlyRow {
        hour: row.i64("hour")?,
        transaction_count: row.i64_or_zero("transaction_count")?,
        volume: row.f64_or_zero("volume")?,
        unique_senders: row.i64_or_zero("unique_senders")?,
        unique_receivers: row.i64_or_zero("unique_receivers")?,
        max_transfer: row.f64_or_zero("max_transfer")?,
        whale_transactions: row.i64_or_zero("whale_transactions")?,
        whale_volume: row.f64_or_zero("whale_volume")?,
    })
}

/// Wallets receiving (accumulating) or sending (distributing) at least
/// `@min_transfers` times since `since`.
pub fn wallet_patterns(d: &Dialect, token: &str, since: i64, min_transfers: i64) -> Query {
    let sql = format!(
        "SELECT
            (SELECT COUNT(*) FROM (
                SELECT t.to_address FROM {table} t
                WHERE t.address = @token AND t.block_timestamp >= {since}
                GROUP BY t.to_address HAVING COUNT(*) >= @min_transfers
            ) acc) AS accumulation_wallets,
            (SELECT COUNT(*) FROM (
                SELECT t.from_address FROM {table} t
                WHERE t.address = @token AND t.block_timestamp >= {since}
                GROUP BY t.from_address HAVING COUNT(*) >= @min_transfers
            ) dist) AS distribution_wallets",
        table = d.table(),
        since = d.timestamp_param("since")
    );
    Query::new("wallet_patterns", sql)
        .text("token", token)
        .int("since", since)
        .int("min_transfers", min_transfers)
}

pub fn decode_wallet_patterns(row: &Row) -> EngineResult<(i64, i64)> {
    Ok((row.i64_or_zero("accumulation_wallets")?, row.i64_or_zero("distribution_wallets")?))
}

// ── Address ────────────────────────────────────────────────────────────────

pub fn address_summary(d: &Dialect, token: &str, holder: &str) -> Query {
    let sql = format!(
        "SELECT COUNT(*) AS total_transactions, MIN({unix}) AS first_seen
        FROM {table} t
        WHERE t.address = @token AND (t.from_address = @holder OR t.to_address = @holder)",
        unix = d.unix_seconds("t"),
        table = d.table()
    );
    Query::new("address_summary", sql).text("token", token).text("holder", holder)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressSummaryRow {
    pub total_transactions: i64,
    pub first_seen: Option<i64>,
}

pub fn decode_address_summary(row: &Row) -> EngineResult<AddressSummaryRow> {
    Ok(AddressSummaryRow {
        total_transactions: row.i64_or_zero("total_transactions")?,
        first_seen: row.opt_i64("first_seen")?,
    })
}

pub fn address_flows(d: &Dialect, token: &str, holder: &str) -> Query {
    let amt = d.amount("t");
    let sql = format!(
        "SELECT
            SUM(CASE WHEN t.from_address = @holder THEN 1 ELSE 0 END) AS send_count,
            SUM(CASE WHEN t.to_address = @holder THEN 1 ELSE 0 END) AS receive_count,
            SUM(CASE WHEN t.from_address = @holder THEN {amt} ELSE 0 END) AS total_sent,
            SUM(CASE WHEN t.to_address = @holder THEN {amt} ELSE 0 END) AS total_received,
            MAX(CASE WHEN t.from_address = @holder THEN {amt} END) AS max_sent,
            MAX(CASE WHEN t.to_address = @holder THEN {amt} END) AS max_received,
            AVG(CASE WHEN t.from_address = @holder THEN {amt} END) AS avg_sent,
            AVG(CASE WHEN t.to_address = @holder THEN {amt} END) AS avg_received
        FROM {table} t
        WHERE t.address = @token AND (t.from_address = @holder OR t.to_address = @holder)",
        amt = amt,
        table = d.table()
    );
    Query::new("address_flows", sql).text("token", token).text("holder", holder)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressFlowsRow {
    pub send_count: i64,
    pub receive_count: i64,
    pub total_sent: f64,
    pub total_received: f64,
    pub max_sent: f64,
    pub max_received: f64,
    pub avg_sent: f64,
    pub avg_received: f64,
}

pub fn decode_address_flows(row: &Row) -> EngineResult<AddressFlowsRow> {
    Ok(AddressFlowsRow {
        send_count: row.i64_or_zero("send_count")?,
        receive_count: row.i64_or_zero("receive_count")?,
        total_sent: row.f64_or_zero("total_sent")?,
        total_received: row.f64_or_zero("total_received")?,
        max_sent: row.f64_or_zero("max_sent")?,
        max_received: row.f64_or_zero("max_received")?,
        avg_sent: row.f64_or_zero("avg_sent")?,
        avg_received: row.f64_or_zero("avg_received")?,
    })
}
