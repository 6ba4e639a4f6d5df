//! Typed error taxonomy shared across component boundaries. Internal
//! plumbing keeps using `anyhow::Result`, matching `codex-mcp-client`; this
//! enum is reserved for places a caller needs to match on a stable JSON-RPC
//! shape (HTTP handlers, MCP error responses, config loading).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("session `{0}` is unknown or missing")]
    SessionInvalid(String),

    #[error("unknown method `{0}`")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// JSON-RPC error code this error maps to when surfaced over the HTTP
    /// session transport (see spec §4.6/§7).
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            RouterError::SessionInvalid(_) => -32000,
            RouterError::MethodNotFound(_) => -32601,
            RouterError::InvalidParams(_) => -32602,
            RouterError::ConfigInvalid(_) => -32603,
            RouterError::Internal(_) => -32003,
        }
    }
}
