//! End-to-end tests that spawn the fixture stdio MCP server in
//! `tests/fixtures/fixture_mcp_server.rs` as a real child process, matching
//! the router's own supervisor/client stack against actual process I/O
//! rather than in-process fakes.

use std::process::Command as StdCommand;
use std::time::Duration;

use assert_cmd::prelude::*;
use indexmap::IndexMap;
use mcp_router_core::RouterConfig;
use mcp_router_core::ServerConfig;
use mcp_router_core::Supervisor;
use mcp_router_core::dispatch;

fn fixture_command() -> String {
    StdCommand::cargo_bin("fixture-mcp-server")
        .expect("fixture-mcp-server binary should be built for this crate's tests")
        .get_program()
        .to_string_lossy()
        .into_owned()
}

fn fixture_server(cwd: Option<String>) -> ServerConfig {
    ServerConfig {
        command: fixture_command(),
        args: Vec::new(),
        env: Default::default(),
        cwd,
        disabled: false,
        timeout_ms: None,
    }
}

#[tokio::test]
async fn tool_call_round_trips_through_a_real_child_process() {
    let mut mcp_servers = IndexMap::new();
    mcp_servers.insert("worker".to_string(), fixture_server(Some(
        std::env::temp_dir().to_string_lossy().into_owned(),
    )));
    let (supervisor, errors) = Supervisor::start(RouterConfig { mcp_servers }).await;
    assert!(errors.is_empty(), "fixture child should spawn cleanly: {errors:?}");

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        dispatch::call_tool(
            &supervisor,
            "worker_echo",
            Some(serde_json::json!({ "text": "hello router" })),
        ),
    )
    .await
    .expect("tool call should not hang");

    assert_ne!(result.is_error, Some(true));
    let mcp_types::ContentBlock::TextContent(text) = &result.content[0] else {
        panic!("expected text content block, got {:?}", result.content[0]);
    };
    assert_eq!(text.text, "hello router");
}

#[tokio::test]
async fn child_crash_mid_call_resolves_as_a_clean_tool_error_instead_of_hanging() {
    let mut mcp_servers = IndexMap::new();
    mcp_servers.insert("flaky".to_string(), fixture_server(None));
    let (supervisor, errors) = Supervisor::start(RouterConfig { mcp_servers }).await;
    assert!(errors.is_empty());

    // No timeout_ms is configured for `flaky`, so this call only returns if
    // the reader task's EOF handling drains the pending map and fails the
    // in-flight request; without that fix it would hang forever.
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        dispatch::call_tool(&supervisor, "flaky_crash", None),
    )
    .await
    .expect("a crashed child must fail the in-flight call, not hang");

    assert_eq!(result.is_error, Some(true));
}

#[tokio::test]
async fn a_failing_child_does_not_prevent_a_working_sibling_from_registering() {
    let mut mcp_servers = IndexMap::new();
    mcp_servers.insert("worker".to_string(), fixture_server(None));
    mcp_servers.insert(
        "broken".to_string(),
        ServerConfig {
            command: "this-binary-does-not-exist-anywhere".to_string(),
            ..fixture_server(None)
        },
    );
    let (supervisor, errors) = Supervisor::start(RouterConfig { mcp_servers }).await;

    assert_eq!(errors.len(), 1);
    assert!(errors.contains_key("broken"));
    assert!(supervisor.client_for("worker").await.is_some());
    assert!(supervisor.client_for("broken").await.is_none());

    let registry = supervisor.registry().await;
    assert!(registry.get_tool("worker_echo").is_some());
}
