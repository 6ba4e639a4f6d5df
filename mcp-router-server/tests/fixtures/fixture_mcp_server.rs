//! Trivial stdio MCP server used only by the integration tests in this
//! crate's `tests/` directory. Speaks just enough JSON-RPC to exercise a
//! real `tools/call` round trip and a mid-call crash: `initialize`,
//! `tools/list`, `resources/list`, `prompts/list`, and `tools/call` for two
//! tools — `echo`, which replies normally, and `crash`, which exits the
//! process without ever writing a response.
//!
//! Not part of the router; never spawned outside of tests.

use std::io::BufRead;
use std::io::Write;

use serde_json::Value;
use serde_json::json;

fn write_message(value: &Value) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{value}");
    let _ = stdout.flush();
}

fn respond(id: &Value, result: Value) {
    write_message(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    }));
}

fn tools_list_result() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "inputSchema": { "type": "object" },
            },
            {
                "name": "crash",
                "inputSchema": { "type": "object" },
            },
        ],
    })
}

fn call_tool_result(name: &str, arguments: &Value) -> Value {
    let text = arguments
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or(name)
        .to_string();
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    })
}

fn main() {
    eprintln!("fixture-mcp-server ready");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        // Notifications (no `id`) require no reply.
        let Some(id) = value.get("id").cloned() else {
            continue;
        };
        match value.get("method").and_then(Value::as_str) {
            Some("initialize") => respond(
                &id,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "serverInfo": { "name": "fixture-mcp-server", "version": "0.0.0" },
                }),
            ),
            Some("tools/list") => respond(&id, tools_list_result()),
            Some("resources/list") => respond(&id, json!({ "resources": [] })),
            Some("prompts/list") => respond(&id, json!({ "prompts": [] })),
            Some("tools/call") => {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                if name == "crash" {
                    // Simulate a child dying mid-call: exit without replying.
                    std::process::exit(1);
                }
                respond(&id, call_tool_result(name, &arguments));
            }
            _ => respond(
                &id,
                json!({ "content": [], "isError": true }),
            ),
        }
    }
}
