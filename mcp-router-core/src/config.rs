//! Declarative shape of a child MCP server entry, shared by the config
//! loader (in `mcp-router-server`) and the supervisor that spawns processes
//! from it.

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// The only transport this router knows how to speak to a child over.
/// Anything else present in a config entry's `type` field is skipped at
/// load time with a warning rather than rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
}

/// Per-child configuration, read-only once the router has started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    /// Per-call timeout in milliseconds, as written in the config file.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ServerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// The fully loaded and validated router configuration.
///
/// `mcp_servers` preserves declaration order so that namespacing and
/// `list*` responses are deterministic across restarts for an unchanged
/// config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    pub mcp_servers: IndexMap<String, ServerConfig>,
}
