// ── Stablescope Atoms: Collaborator Traits ─────────────────────────────────
// The three black boxes the engine talks to. Each is constructed once per
// process, owned behind an `Arc<dyn _>`, and swapped for a scripted fake in
// tests.

use crate::atoms::error::EngineResult;
use crate::rows::{Dialect, Query, Row};
use async_trait::async_trait;
use serde_json::Value;

/// A JSON-RPC 2.0 endpoint. `call` returns the `result` member or an error.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> EngineResult<Value>;
}

/// A SQL warehouse holding the historical transfer table.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Which SQL fragments the query templates must use.
    fn dialect(&self) -> Dialect;

    async fn query(&self, query: &Query) -> EngineResult<Vec<Row>>;
}

/// A generative text endpoint: prompt in, free text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> EngineResult<String>;
}
