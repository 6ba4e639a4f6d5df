//! Translates a unified-name call into the originating child's RPC and
//! translates child-side failures into well-formed MCP error responses,
//! per spec §4.5: downstream clients should never see a transport-level
//! failure for a forwarding failure, only a well-formed `isError` result.

use std::collections::HashMap;
use std::sync::Arc;

use mcp_types::CallToolResult;
use mcp_types::ContentBlock;
use mcp_types::GetPromptResult;
use mcp_types::PromptMessage;
use mcp_types::ReadResourceResult;
use mcp_types::ResourceContents;
use mcp_types::TextContent;
use serde_json::Value;
use serde_json::json;

use crate::registry::STATS_RESOURCE_URI;
use crate::supervisor::Supervisor;

fn tool_error(message: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent {
            r#type: "text".to_string(),
            text: message.into(),
            annotations: None,
        })],
        is_error: Some(true),
        structured_content: None,
        meta: None,
    }
}

/// Forward a `tools/call` for the given unified tool name.
pub async fn call_tool(
    supervisor: &Supervisor,
    unified_name: &str,
    arguments: Option<Value>,
) -> CallToolResult {
    let (alias, original_name) = {
        let registry = supervisor.registry().await;
        match registry.get_tool(unified_name) {
            Some(entry) => (entry.server_alias.clone(), entry.original_name.clone()),
            None => {
                return tool_error(format!("unknown tool `{unified_name}`"));
            }
        }
    };

    let Some(client) = supervisor.client_for(&alias).await else {
        return tool_error(format!("server `{alias}` is not available"));
    };
    let timeout = supervisor.timeout_for(&alias).await;

    match client.call_tool(original_name, arguments, timeout).await {
        Ok(result) => result,
        Err(e) => tool_error(format!("tool call to `{alias}` failed: {e:#}")),
    }
}

fn resource_error(uri: &str, message: impl Into<String>) -> ReadResourceResult {
    ReadResourceResult {
        contents: vec![ResourceContents::Text {
            uri: uri.to_string(),
            mime_type: Some("text/plain".to_string()),
            text: message.into(),
        }],
    }
}

/// Forward a `resources/read` for the given unified uri, or answer the
/// always-present `stats://mcp-router-server` resource locally.
pub async fn read_resource(supervisor: &Arc<Supervisor>, unified_uri: &str) -> ReadResourceResult {
    if unified_uri == STATS_RESOURCE_URI {
        return read_stats(supervisor).await;
    }

    let (alias, original_uri) = {
        let registry = supervisor.registry().await;
        match registry.get_resource(unified_uri) {
            Some(entry) => (entry.server_alias.clone(), entry.original_uri.clone()),
            None => return resource_error(unified_uri, format!("unknown resource `{unified_uri}`")),
        }
    };

    let Some(client) = supervisor.client_for(&alias).await else {
        return resource_error(unified_uri, format!("server `{alias}` is not available"));
    };
    let timeout = supervisor.timeout_for(&alias).await;

    match client.read_resource(original_uri, timeout).await {
        Ok(result) => result,
        Err(e) => resource_error(unified_uri, format!("resource read on `{alias}` failed: {e:#}")),
    }
}

async fn read_stats(supervisor: &Arc<Supervisor>) -> ReadResourceResult {
    let registry = supervisor.registry().await;
    let stats = json!({
        "activeServers": registry.active_server_count(),
        "toolCount": registry.tool_count(),
        "resourceCount": registry.resource_count(),
        "promptCount": registry.prompt_count(),
        "uptimeSeconds": supervisor.uptime_seconds(),
    });
    ReadResourceResult {
        contents: vec![ResourceContents::Text {
            uri: STATS_RESOURCE_URI.to_string(),
            mime_type: Some("application/json".to_string()),
            text: stats.to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;

    #[tokio::test]
    async fn unknown_tool_call_is_an_error_result_not_a_panic() {
        let (supervisor, errors) = Supervisor::start(RouterConfig::default()).await;
        assert!(errors.is_empty());

        let result = call_tool(&supervisor, "weather_get_forecast", None).await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn unknown_prompt_get_is_an_error_result() {
        let (supervisor, _) = Supervisor::start(RouterConfig::default()).await;
        let result = get_prompt(&supervisor, "weather_daily_summary", None).await;
        assert!(!result.messages.is_empty());
    }

    #[tokio::test]
    async fn stats_resource_is_served_without_any_child() {
        let (supervisor, _) = Supervisor::start(RouterConfig::default()).await;
        let result = read_resource(&supervisor, STATS_RESOURCE_URI).await;
        let ResourceContents::Text { text, .. } = &result.contents[0] else {
            panic!("expected text contents");
        };
        let stats: Value = serde_json::from_str(text).unwrap();
        assert_eq!(stats["activeServers"], 0);
        assert_eq!(stats["toolCount"], 0);
    }

    #[tokio::test]
    async fn unknown_resource_read_is_an_error_result() {
        let (supervisor, _) = Supervisor::start(RouterConfig::default()).await;
        let result = read_resource(&supervisor, "weather_forecast://today").await;
        let ResourceContents::Text { text, .. } = &result.contents[0] else {
            panic!("expected text contents");
        };
        assert!(text.contains("unknown resource"));
    }
}

fn prompt_error(message: impl Into<String>) -> GetPromptResult {
    GetPromptResult {
        description: None,
        messages: vec![PromptMessage {
            role: "assistant".to_string(),
            content: ContentBlock::TextContent(TextContent {
                r#type: "text".to_string(),
                text: message.into(),
                annotations: None,
            }),
        }],
    }
}

/// Forward a `prompts/get` for the given unified prompt name.
pub async fn get_prompt(
    supervisor: &Supervisor,
    unified_name: &str,
    arguments: Option<HashMap<String, String>>,
) -> GetPromptResult {
    let (alias, original_name) = {
        let registry = supervisor.registry().await;
        match registry.get_prompt(unified_name) {
            Some(entry) => (entry.server_alias.clone(), entry.original_name.clone()),
            None => return prompt_error(format!("unknown prompt `{unified_name}`")),
        }
    };

    let Some(client) = supervisor.client_for(&alias).await else {
        return prompt_error(format!("server `{alias}` is not available"));
    };
    let timeout = supervisor.timeout_for(&alias).await;

    match client.get_prompt(original_name, arguments, timeout).await {
        Ok(result) => result,
        Err(e) => prompt_error(format!("prompt fetch from `{alias}` failed: {e:#}")),
    }
}
