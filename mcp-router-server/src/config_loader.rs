//! Reads and validates the JSON config file (spec §4.7/§6) into the
//! `RouterConfig` the supervisor consumes, then applies `-c key=value`
//! overrides the same way `CliConfigOverrides` applies them onto a config
//! tree in `codex-common`.

use std::fs;
use std::path::Path;

use clap::ArgAction;
use clap::Parser;
use indexmap::IndexMap;
use mcp_router_core::RouterConfig;
use mcp_router_core::RouterError;
use mcp_router_core::ServerConfig;
use serde_json::Value;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "watson_mcprouter_config.json";

/// `-c mcp_servers.<alias>.<field>=value` style overrides, applied onto the
/// loaded config's JSON tree before it is deserialized into `RouterConfig`.
#[derive(Parser, Debug, Default, Clone)]
pub struct RouterConfigOverrides {
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl RouterConfigOverrides {
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, String> {
        self.raw_overrides
            .iter()
            .map(|raw| {
                let mut parts = raw.splitn(2, '=');
                let key = parts
                    .next()
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| format!("empty key in override: {raw}"))?;
                let value_str = parts
                    .next()
                    .ok_or_else(|| format!("invalid override (missing '='): {raw}"))?
                    .trim();

                let value = serde_json::from_str::<Value>(value_str)
                    .unwrap_or_else(|_| Value::String(value_str.trim_matches('"').to_string()));

                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Apply every parsed `(dotted.path, value)` override onto `target` by
    /// walking/creating intermediate objects.
    fn apply(&self, target: &mut Value) -> Result<(), String> {
        for (path, value) in self.parse_overrides()? {
            let mut cursor = target;
            let segments: Vec<&str> = path.split('.').collect();
            for (i, segment) in segments.iter().enumerate() {
                if i == segments.len() - 1 {
                    let obj = cursor
                        .as_object_mut()
                        .ok_or_else(|| format!("cannot set `{path}` on a non-object"))?;
                    obj.insert((*segment).to_string(), value.clone());
                } else {
                    let obj = cursor
                        .as_object_mut()
                        .ok_or_else(|| format!("cannot descend into `{path}` on a non-object"))?;
                    cursor = obj
                        .entry((*segment).to_string())
                        .or_insert_with(|| Value::Object(Default::default()));
                }
            }
        }
        Ok(())
    }
}

/// Raw on-disk shape, permissive about `type` so a non-`stdio` entry can be
/// skipped with a warning instead of rejected by `serde`.
#[derive(serde::Deserialize)]
struct RawRouterConfig {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: IndexMap<String, RawServerEntry>,
}

#[derive(serde::Deserialize)]
struct RawServerEntry {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: std::collections::HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    timeout: Option<u64>,
}

pub fn load_config(path: &Path, overrides: &RouterConfigOverrides) -> Result<RouterConfig, RouterError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        RouterError::ConfigInvalid(format!("failed to read `{}`: {e}", path.display()))
    })?;

    let mut document: Value = serde_json::from_str(&raw)
        .map_err(|e| RouterError::ConfigInvalid(format!("invalid JSON in `{}`: {e}", path.display())))?;

    overrides.apply(&mut document).map_err(RouterError::ConfigInvalid)?;

    let raw_config: RawRouterConfig = serde_json::from_value(document)
        .map_err(|e| RouterError::ConfigInvalid(format!("malformed config document: {e}")))?;

    let mut mcp_servers = IndexMap::new();
    for (alias, entry) in raw_config.mcp_servers {
        if let Some(kind) = entry.r#type.as_deref() {
            if kind != "stdio" {
                warn!(alias, kind, "skipping config entry with unsupported transport type");
                continue;
            }
        }

        let command = entry.command.filter(|c| !c.is_empty()).ok_or_else(|| {
            RouterError::ConfigInvalid(format!("server `{alias}` is missing a non-empty `command`"))
        })?;

        mcp_servers.insert(
            alias,
            ServerConfig {
                command,
                args: entry.args,
                env: entry.env,
                cwd: entry.cwd,
                disabled: entry.disabled,
                timeout_ms: entry.timeout,
            },
        );
    }

    Ok(RouterConfig { mcp_servers })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile_like::TempJsonFile {
        tempfile_like::TempJsonFile::new(contents)
    }

    // A tiny scratch-file helper so this crate does not need to depend on
    // the `tempfile` crate just for two tests.
    mod tempfile_like {
        use std::fs::File;
        use std::io::Write;
        use std::path::PathBuf;

        pub struct TempJsonFile {
            pub path: PathBuf,
        }

        impl TempJsonFile {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!(
                    "mcp-router-server-test-{}-{}.json",
                    std::process::id(),
                    contents.len()
                ));
                let mut file = File::create(&path).expect("create temp config file");
                file.write_all(contents.as_bytes()).expect("write temp config file");
                Self { path }
            }
        }

        impl Drop for TempJsonFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn missing_command_is_fatal() {
        let file = write_temp(r#"{"mcpServers": {"weather": {"type": "stdio", "args": []}}}"#);
        let err = load_config(&file.path, &RouterConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, RouterError::ConfigInvalid(_)));
    }

    #[test]
    fn unsupported_transport_is_skipped_not_fatal() {
        let file = write_temp(
            r#"{"mcpServers": {
                "weather": {"type": "stdio", "command": "weather-mcp", "args": []},
                "legacy": {"type": "sse", "command": "irrelevant"}
            }}"#,
        );
        let config = load_config(&file.path, &RouterConfigOverrides::default()).unwrap();
        assert_eq!(config.mcp_servers.len(), 1);
        assert!(config.mcp_servers.contains_key("weather"));
    }

    #[test]
    fn cli_override_replaces_a_scalar_field() {
        let file = write_temp(
            r#"{"mcpServers": {"weather": {"type": "stdio", "command": "weather-mcp", "args": []}}}"#,
        );
        let overrides = RouterConfigOverrides {
            raw_overrides: vec!["mcpServers.weather.command=other-mcp".to_string()],
        };
        let config = load_config(&file.path, &overrides).unwrap();
        assert_eq!(config.mcp_servers["weather"].command, "other-mcp");
    }
}
