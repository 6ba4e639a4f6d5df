//! The unified capability registry: three maps (tools, resources, prompts)
//! keyed by unified identifier, plus a reverse per-alias index so a child's
//! capabilities can be dropped in O(k) when it exits.
//!
//! Namespacing: tool/prompt unified name is `{alias}_{originalName}`;
//! resource unified uri is `{alias}_{originalUri}`. Collisions keep the
//! first registration and log a warning for the loser (see spec §4.4/§9 —
//! dispatch keys off the stored `server_alias` field, never by re-splitting
//! the unified name).

use indexmap::IndexMap;
use mcp_types::Prompt;
use mcp_types::Resource;
use mcp_types::Tool;
use tracing::warn;

/// Special, always-present resource. Not namespaced, not owned by any child.
pub const STATS_RESOURCE_URI: &str = "stats://mcp-router-server";

#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub server_alias: String,
    pub original_name: String,
    pub tool: Tool,
}

#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub server_alias: String,
    pub original_uri: String,
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct PromptEntry {
    pub server_alias: String,
    pub original_name: String,
    pub prompt: Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Tool,
    Resource,
    Prompt,
}

/// Build the unified name/uri for a capability owned by `alias`.
pub fn unified_name(alias: &str, original: &str) -> String {
    format!("{alias}_{original}")
}

#[derive(Debug, Default)]
pub struct Registry {
    tools: IndexMap<String, ToolEntry>,
    resources: IndexMap<String, ResourceEntry>,
    prompts: IndexMap<String, PromptEntry>,
    /// alias -> (kind, unified key) of every entry it owns, for O(k) removal.
    owned_by_alias: IndexMap<String, Vec<(Kind, String)>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tool(&mut self, alias: &str, original_name: String, tool: Tool) {
        let key = unified_name(alias, &original_name);
        if self.tools.contains_key(&key) {
            warn!(unified_name = %key, alias, "dropping duplicate tool registration");
            return;
        }
        self.tools.insert(
            key.clone(),
            ToolEntry {
                server_alias: alias.to_string(),
                original_name,
                tool,
            },
        );
        self.owned_by_alias
            .entry(alias.to_string())
            .or_default()
            .push((Kind::Tool, key));
    }

    pub fn insert_resource(&mut self, alias: &str, original_uri: String, resource: Resource) {
        let key = unified_name(alias, &original_uri);
        if key == STATS_RESOURCE_URI || self.resources.contains_key(&key) {
            warn!(unified_uri = %key, alias, "dropping duplicate resource registration");
            return;
        }
        self.resources.insert(
            key.clone(),
            ResourceEntry {
                server_alias: alias.to_string(),
                original_uri,
                resource,
            },
        );
        self.owned_by_alias
            .entry(alias.to_string())
            .or_default()
            .push((Kind::Resource, key));
    }

    pub fn insert_prompt(&mut self, alias: &str, original_name: String, prompt: Prompt) {
        let key = unified_name(alias, &original_name);
        if self.prompts.contains_key(&key) {
            warn!(unified_name = %key, alias, "dropping duplicate prompt registration");
            return;
        }
        self.prompts.insert(
            key.clone(),
            PromptEntry {
                server_alias: alias.to_string(),
                original_name,
                prompt,
            },
        );
        self.owned_by_alias
            .entry(alias.to_string())
            .or_default()
            .push((Kind::Prompt, key));
    }

    /// Remove every entry owned by `alias`, e.g. on child exit. O(k) in the
    /// number of entries that child owns.
    pub fn remove_alias(&mut self, alias: &str) {
        let Some(owned) = self.owned_by_alias.shift_remove(alias) else {
            return;
        };
        for (kind, key) in owned {
            match kind {
                Kind::Tool => {
                    self.tools.shift_remove(&key);
                }
                Kind::Resource => {
                    self.resources.shift_remove(&key);
                }
                Kind::Prompt => {
                    self.prompts.shift_remove(&key);
                }
            }
        }
    }

    pub fn get_tool(&self, unified_name: &str) -> Option<&ToolEntry> {
        self.tools.get(unified_name)
    }

    pub fn get_resource(&self, unified_uri: &str) -> Option<&ResourceEntry> {
        self.resources.get(unified_uri)
    }

    pub fn get_prompt(&self, unified_name: &str) -> Option<&PromptEntry> {
        self.prompts.get(unified_name)
    }

    /// Ordered list of tools, matching configuration order of alias and
    /// within-child discovery order (the `IndexMap` insertion order).
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.values().map(|e| e.tool.clone()).collect()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources.values().map(|e| e.resource.clone()).collect()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts.values().map(|e| e.prompt.clone()).collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.len()
    }

    pub fn active_server_count(&self) -> usize {
        self.owned_by_alias.len()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
        self.resources.clear();
        self.prompts.clear();
        self.owned_by_alias.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_types::ToolInputSchema;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: ToolInputSchema {
                properties: None,
                required: None,
                r#type: "object".to_string(),
            },
            output_schema: None,
            annotations: None,
        }
    }

    #[test]
    fn namespacing_is_a_bijection_for_dispatch() {
        let mut registry = Registry::new();
        registry.insert_tool("weather", "get_forecast".to_string(), tool("get_forecast"));

        let entry = registry.get_tool("weather_get_forecast").unwrap();
        assert_eq!(entry.server_alias, "weather");
        assert_eq!(entry.original_name, "get_forecast");
    }

    #[test]
    fn first_registration_wins_on_collision() {
        let mut registry = Registry::new();
        registry.insert_tool("a", "do".to_string(), tool("do"));
        registry.insert_tool("a", "do".to_string(), tool("do-second"));

        assert_eq!(registry.tool_count(), 1);
        let entry = registry.get_tool("a_do").unwrap();
        assert_eq!(entry.tool.name, "do");
    }

    #[test]
    fn pathological_alias_does_not_collide_with_real_prefix() {
        let mut registry = Registry::new();
        registry.insert_tool("a", "do".to_string(), tool("do"));
        registry.insert_tool("a_do", "x".to_string(), tool("x"));

        assert_eq!(registry.tool_count(), 2);
        assert!(registry.get_tool("a_do").is_some());
        assert!(registry.get_tool("a_do_x").is_some());
    }

    #[test]
    fn remove_alias_drops_only_that_childs_entries() {
        let mut registry = Registry::new();
        registry.insert_tool("a", "x".to_string(), tool("x"));
        registry.insert_tool("b", "y".to_string(), tool("y"));

        registry.remove_alias("a");

        assert!(registry.get_tool("a_x").is_none());
        assert!(registry.get_tool("b_y").is_some());
        assert_eq!(registry.tool_count(), 1);
    }
}
