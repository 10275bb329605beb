// ── Stablescope Atoms: Errors ──────────────────────────────────────────────
// One `thiserror` enum shared by every layer.
//
//   • One variant per collaborator: node, warehouse, AI provider, config.
//   • Library errors convert through `#[from]` so `?` works everywhere.
//   • Messages never carry credentials; HTTP errors are stripped of URLs
//     before they get here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level failure from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The node answered with a JSON-RPC error or an unusable result.
    #[error("RPC error: {method}: {message}")]
    Rpc { method: String, message: String },

    /// `query` is the named query, never the SQL text.
    #[error("Warehouse error: {query}: {message}")]
    Warehouse { query: String, message: String },

    /// A row, log or response did not have the expected shape.
    #[error("Decode error: {context}: {message}")]
    Decode { context: String, message: String },

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad caller input, surfaced as HTTP 400.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl EngineError {
    pub fn rpc(method: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Rpc { method: method.into(), message: message.into() }
    }

    pub fn warehouse(query: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Warehouse { query: query.into(), message: message.into() }
    }

    pub fn decode(context: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Decode { context: context.into(), message: message.into() }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Provider { provider: provider.into(), message: message.into() }
    }

    /// True when the caller, not a collaborator, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
