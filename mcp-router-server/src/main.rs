use clap::Parser;
use mcp_router_server::cli::RouterCli;
use mcp_router_server::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = RouterCli::parse();
    run_main(cli).await
}
