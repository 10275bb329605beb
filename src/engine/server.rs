// Stablescope — JSON HTTP API
//
// Raw `tokio::net::TcpListener`, no framework dependency. Every route is a GET
// returning JSON with `Access-Control-Allow-Origin: *`; paths may carry an
// optional `/api` prefix.
//
//   GET /transfers?count=N           live feed snapshot (N ≤ 50, default 20)
//   GET /holders?limit=N             top holders + "Others" (1..=100, default 5)
//   GET /token-supply                mint/burn totals and history
//   GET /transaction-volume?period=  24h | 7d | 30d | 3months
//   GET /mev                         MEV risk analysis
//   GET /predictions                 market predictions
//   GET /address-info?address=0x…    wallet lookup
//   GET /token-info                  on-chain token metadata
//   GET /gas-stats                   fee estimates in gwei
//   GET /health                      liveness + feed status (not rate limited)
//
// `route` is pure with respect to the socket so tests drive it directly.

use crate::config::ServerConfig;
use crate::engine::reports::{self, volume::VolumePeriod, ApiResponse};
use crate::engine::state::AppState;
use log::{debug, info, warn};
use parking_lot::Mutex;
use stablescope_core::atoms::constants::{FEED_DEFAULT_CAPACITY, FEED_MAX_CAPACITY};
use stablescope_core::{EngineError, EngineResult};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Requests are GETs without a body; anything past this is ignored.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

// ── Rate Limiter ───────────────────────────────────────────────────────────

const RATE_WINDOW: Duration = Duration::from_secs(60);
/// Stale windows are swept once the table grows past this many peers.
const RATE_TABLE_SWEEP_AT: usize = 4_096;

struct Window {
    opened: Instant,
    used: u32,
}

/// Fixed one-minute window per peer address. A limit of 0 disables it.
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    per_window: u32,
}

impl RateLimiter {
    pub fn new(per_window: u32) -> Self {
        RateLimiter { windows: Mutex::new(HashMap::new()), per_window }
    }

    pub fn admit(&self, peer: IpAddr) -> bool {
        if self.per_window == 0 {
            return true;
        }
        let now = Instant::now();
        let mut windows = self.windows.lock();
        if windows.len() >= RATE_TABLE_SWEEP_AT {
            windows.retain(|_, w| now.duration_since(w.opened) < RATE_WINDOW);
        }
        let window = windows.entry(peer).or_insert(Window { opened: now, used: 0 });
        if now.duration_since(window.opened) >= RATE_WINDOW {
            *window = Window { opened: now, used: 0 };
        }
        window.used += 1;
        window.used <= self.per_window
    }
}

// ── Routing ────────────────────────────────────────────────────────────────

/// Parse an optional count parameter, clamped to `1..=max`.
fn count_param(value: Option<String>, name: &str, default: usize, max: usize) -> Result<usize, ApiResponse> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map(|n| n.clamp(1, max))
            .map_err(|_| ApiResponse::error(400, format!("Invalid {}: '{}'", name, v))),
    }
}

pub async fn route(state: &AppState, method: &str, target: &str) -> ApiResponse {
    let url = match Url::parse("http://localhost").and_then(|base| base.join(target)) {
        Ok(u) => u,
        Err(_) => return ApiResponse::error(400, "Malformed request target"),
    };
    let path = url.path().trim_end_matches('/');
    let path = path.strip_prefix("/api").unwrap_or(path);

    if method != "GET" {
        return ApiResponse::error(405, format!("Method not allowed: {}", method));
    }
    let param = |name: &str| url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned());

    match path {
        "/transfers" => match count_param(param("count"), "count", FEED_DEFAULT_CAPACITY, FEED_MAX_CAPACITY) {
            Ok(count) => reports::transfers::recent_transfers(state, count).await,
            Err(resp) => resp,
        },
        "/holders" => match count_param(
            param("limit"),
            "limit",
            reports::holders::DEFAULT_LIMIT,
            reports::holders::MAX_LIMIT,
        ) {
            Ok(limit) => reports::holders::top_holders(state, limit).await,
            Err(resp) => resp,
        },
        "/token-supply" => reports::supply::token_supply(state).await,
        "/transaction-volume" => {
            let period = VolumePeriod::parse(param("period").as_deref());
            reports::volume::transaction_volume(state, period).await
        }
        "/mev" => reports::mev::mev_analysis(state).await,
        "/predictions" => reports::market::market_predictions(state).await,
        "/address-info" => reports::address::address_info(state, param("address").as_deref()).await,
        "/token-info" => reports::transfers::token_info(state).await,
        "/gas-stats" => reports::transfers::gas_stats(state).await,
        "/health" => reports::transfers::health(state),
        _ => ApiResponse::error(404, format!("Not found: {}", url.path())),
    }
}

// ── HTTP Server ────────────────────────────────────────────────────────────

pub async fn bind(config: &ServerConfig) -> EngineResult<TcpListener> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.port))
        .await
        .map_err(|e| EngineError::Config(format!("cannot bind {}:{}: {}", config.bind_address, config.port, e)))?;
    let local = listener.local_addr()?;
    if !local.ip().is_loopback() {
        warn!("[http] {} is reachable beyond localhost and the API has no authentication", local);
    }
    info!("[http] Listening on http://{}", local);
    Ok(listener)
}

/// Accept connections until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) -> EngineResult<()> {
    let limiter = Arc::new(RateLimiter::new(state.config.server.rate_limit_per_minute));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (state, limiter) = (state.clone(), limiter.clone());
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer.ip(), &state, &limiter).await {
                            warn!("[http] Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("[http] Accept error: {}", e),
            }
        }
    }
    info!("[http] Server stopped");
    Ok(())
}

const PREFLIGHT: &str = "HTTP/1.1 204 No Content\r\n\
    Access-Control-Allow-Origin: *\r\n\
    Access-Control-Allow-Methods: GET, OPTIONS\r\n\
    Access-Control-Allow-Headers: Content-Type\r\n\
    Connection: close\r\n\r\n";

async fn handle_connection(
    mut stream: TcpStream,
    peer: IpAddr,
    state: &AppState,
    limiter: &RateLimiter,
) -> EngineResult<()> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let read = stream.read(&mut buf).await?;
    if read == 0 {
        return Ok(());
    }
    let head = String::from_utf8_lossy(&buf[..read]);
    let request_line = head.lines().next().unwrap_or_default();
    let mut words = request_line.split_whitespace();
    let (Some(method), Some(target)) = (words.next(), words.next()) else {
        return send_json(&mut stream, &ApiResponse::error(400, "Malformed request")).await;
    };

    if method == "OPTIONS" {
        stream.write_all(PREFLIGHT.as_bytes()).await?;
        return Ok(());
    }

    let health_probe = target.trim_end_matches('/').ends_with("/health");
    if !health_probe && !limiter.admit(peer) {
        return send_json(&mut stream, &ApiResponse::error(429, "Rate limit exceeded, try again later")).await;
    }

    let started = Instant::now();
    let response = route(state, method, target).await;
    debug!("[http] {} {} ({}) {} {}ms", method, target, peer, response.status, started.elapsed().as_millis());
    send_json(&mut stream, &response).await
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

async fn send_json(stream: &mut TcpStream, response: &ApiResponse) -> EngineResult<()> {
    let body = serde_json::to_vec(&response.body)?;
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\r\n",
        status = response.status,
        reason = status_text(response.status),
        len = body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
