// Stablescope — JSON-RPC HTTP Transport

use crate::config::ChainConfig;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use stablescope_core::atoms::traits::RpcTransport;
use stablescope_core::{EngineError, EngineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct PooledClient {
    client: Client,
    created: Instant,
}

impl PooledClient {
    fn build(timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(PooledClient { client, created: Instant::now() })
    }
}

/// JSON-RPC over HTTP. The connection pool is rebuilt once it is older than
/// `max_age`, so long-running feeds do not sit on a stale provider session.
pub struct HttpRpcTransport {
    url: String,
    timeout: Duration,
    max_age: Duration,
    pooled: Mutex<PooledClient>,
    next_id: AtomicU64,
}

impl HttpRpcTransport {
    pub fn new(url: impl Into<String>, timeout: Duration, max_age: Duration) -> EngineResult<Self> {
        Ok(HttpRpcTransport {
            url: url.into(),
            timeout,
            max_age,
            pooled: Mutex::new(PooledClient::build(timeout)?),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(chain: &ChainConfig) -> EngineResult<Self> {
        Self::new(
            chain.rpc_url.clone(),
            Duration::from_secs(chain.timeout_secs),
            Duration::from_secs(chain.connection_max_age_secs),
        )
    }

    fn client(&self) -> EngineResult<Client> {
        let mut pooled = self.pooled.lock();
        if pooled.created.elapsed() >= self.max_age {
            *pooled = PooledClient::build(self.timeout)?;
            info!("[chain] Recreated RPC connection after {}s", self.max_age.as_secs());
        }
        Ok(pooled.client.clone())
    }
}

/// Extract `result` from a JSON-RPC response envelope.
pub(crate) fn parse_rpc_response(method: &str, response: Value) -> EngineResult<Value> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(EngineError::rpc(method, message));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| EngineError::rpc(method, "response missing 'result' field"))
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        debug!("[chain] -> {}", method);

        // Provider URLs usually embed an API key, so it is stripped from errors.
        let resp = self
            .client()?
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(format!("{} after {}s", method, self.timeout.as_secs()))
                } else {
                    EngineError::rpc(method, e.without_url().to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::rpc(method, format!("HTTP {}", status.as_u16())));
        }
        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::rpc(method, format!("invalid JSON: {}", e.without_url())))?;
        parse_rpc_response(method, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_extracted() {
        let v = parse_rpc_response("eth_blockNumber", json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})).unwrap();
        assert_eq!(v, json!("0x10"));
    }

    #[test]
    fn error_object_surfaces_message() {
        let err = parse_rpc_response(
            "eth_getLogs",
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32005, "message": "query returned more than 10000 results"}}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "RPC error: eth_getLogs: query returned more than 10000 results");
    }

    #[test]
    fn missing_result_is_error() {
        assert!(parse_rpc_response("eth_call", json!({"jsonrpc": "2.0", "id": 1})).is_err());
        // A null result (e.g. unknown block) is still a result.
        assert_eq!(parse_rpc_response("eth_getBlockByNumber", json!({"result": null})).unwrap(), Value::Null);
    }

    #[test]
    fn transport_builds() {
        let t = HttpRpcTransport::new("http://127.0.0.1:8545", Duration::from_secs(5), Duration::from_secs(0)).unwrap();
        // Zero max age forces a rebuild on every access.
        assert!(t.client().is_ok());
        assert!(t.client().is_ok());
    }
}
