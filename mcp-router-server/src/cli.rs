use std::path::PathBuf;

use clap::Parser;

use crate::config_loader::DEFAULT_CONFIG_PATH;
use crate::config_loader::RouterConfigOverrides;

/// Run the MCP aggregating proxy: spawn the configured child servers,
/// federate their capabilities, and serve the union over `/mcp`.
#[derive(Debug, Parser)]
#[command(name = "mcp-router-server")]
pub struct RouterCli {
    /// Path to the JSON config file describing child MCP servers.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// TCP port the `/mcp` endpoint is bound to.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    #[clap(flatten)]
    pub config_overrides: RouterConfigOverrides,
}
