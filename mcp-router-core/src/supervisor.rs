//! Spawns configured child processes, wires each to a [`McpClient`], runs
//! capability discovery, and keeps the [`Registry`] consistent with which
//! children are actually `ready`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use mcp_router_client::McpClient;
use mcp_types::ClientCapabilities;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::MCP_SCHEMA_VERSION;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::info;
use tracing::warn;

use crate::config::RouterConfig;
use crate::config::ServerConfig;
use crate::registry::Registry;

const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Spawning,
    Ready,
    Exited,
    Failed,
}

pub struct ChildRecord {
    pub alias: String,
    pub config: ServerConfig,
    pub client: Arc<McpClient>,
    pub state: ChildState,
}

/// Owns every running child and the registry derived from them.
pub struct Supervisor {
    children: RwLock<HashMap<String, ChildRecord>>,
    registry: RwLock<Registry>,
    started_at: Instant,
}

/// One entry per child that failed to spawn or complete discovery, so the
/// caller (CLI/`run_main`) can log them without the startup path returning
/// an error — per spec §4.3, spawn/discovery failure isolates to that
/// child.
pub type StartupErrors = HashMap<String, anyhow::Error>;

impl Supervisor {
    pub async fn start(config: RouterConfig) -> (Arc<Self>, StartupErrors) {
        let supervisor = Arc::new(Self {
            children: RwLock::new(HashMap::new()),
            registry: RwLock::new(Registry::new()),
            started_at: Instant::now(),
        });

        let mut errors = StartupErrors::new();
        let mut join_set = JoinSet::new();

        for (index, (alias, cfg)) in config.mcp_servers.into_iter().enumerate() {
            if cfg.disabled {
                info!(alias, "skipping disabled child");
                continue;
            }
            join_set.spawn(async move {
                let result = spawn_and_initialize(&alias, &cfg).await;
                (index, alias, cfg, result)
            });
        }

        // Children spawn concurrently, but `join_next` yields them in
        // completion order, not submission order. Collect everything first
        // and re-sort by each child's position in the config before
        // registering, so the final tools/resources/prompts listing order
        // is deterministic regardless of how fast each child started.
        let mut joined = Vec::new();
        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok(v) => joined.push(v),
                Err(e) => warn!("task panic while starting a child: {e:#}"),
            }
        }
        joined.sort_by_key(|(index, ..)| *index);

        for (_, alias, cfg, result) in joined {
            match result {
                Ok(client) => {
                    let client = Arc::new(client);
                    supervisor.children.write().await.insert(
                        alias.clone(),
                        ChildRecord {
                            alias: alias.clone(),
                            config: cfg,
                            client: client.clone(),
                            state: ChildState::Ready,
                        },
                    );
                    discover_and_register(&alias, &client, &supervisor.registry).await;

                    let watcher_supervisor = supervisor.clone();
                    let watcher_client = client.clone();
                    let watcher_alias = alias.clone();
                    tokio::spawn(async move {
                        watcher_client.wait_closed().await;
                        watcher_supervisor.mark_exited(&watcher_alias).await;
                    });
                }
                Err(e) => {
                    warn!(alias, error = %e, "failed to start child");
                    errors.insert(alias, e);
                }
            }
        }

        (supervisor, errors)
    }

    pub async fn registry(&self) -> tokio::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().await
    }

    pub async fn registry_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().await
    }

    pub async fn client_for(&self, alias: &str) -> Option<Arc<McpClient>> {
        let children = self.children.read().await;
        children
            .get(alias)
            .filter(|record| record.state == ChildState::Ready)
            .map(|record| record.client.clone())
    }

    pub async fn timeout_for(&self, alias: &str) -> Option<Duration> {
        let children = self.children.read().await;
        children.get(alias).and_then(|record| record.config.timeout())
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Called when a child's reader task observes the transport close.
    /// Removes the child record and, atomically with respect to readers of
    /// the registry, all the capability entries it owned.
    pub async fn mark_exited(&self, alias: &str) {
        let had_child = {
            let mut children = self.children.write().await;
            if let Some(record) = children.get_mut(alias) {
                record.state = ChildState::Exited;
                true
            } else {
                false
            }
        };
        if had_child {
            self.registry.write().await.remove_alias(alias);
            info!(alias, "child exited; capabilities removed from registry");
        }
    }

    /// Best-effort termination signal to every running child, used on
    /// process shutdown. Per spec §4.3 this is signal-and-clear, not
    /// wait-then-escalate. Kills each child explicitly rather than relying
    /// on `kill_on_drop`: the exit-watcher task spawned in `start` holds its
    /// own `Arc<McpClient>` clone until the transport closes, so dropping
    /// this map alone never brings a child's refcount to zero.
    pub async fn shutdown(&self) {
        let mut children = self.children.write().await;
        for (alias, record) in children.iter_mut() {
            info!(alias, "shutting down child");
            record.client.kill().await;
            record.state = ChildState::Exited;
        }
        children.clear();
        self.registry.write().await.clear();
    }
}

async fn spawn_and_initialize(alias: &str, cfg: &ServerConfig) -> Result<McpClient> {
    let env = if cfg.env.is_empty() {
        None
    } else {
        Some(cfg.env.clone())
    };
    let client = McpClient::new_stdio_client(
        alias,
        OsString::from(cfg.command.clone()),
        cfg.args.iter().map(OsString::from).collect(),
        cfg.cwd.clone().map(OsString::from),
        env,
    )
    .await
    .with_context(|| format!("failed to spawn child `{alias}`"))?;

    let params = InitializeRequestParams {
        capabilities: ClientCapabilities {
            experimental: None,
            roots: None,
            sampling: None,
            elicitation: Some(json!({})),
        },
        client_info: Implementation {
            name: "mcp-router-server".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            title: Some("MCP Router".into()),
            user_agent: None,
        },
        protocol_version: MCP_SCHEMA_VERSION.to_owned(),
    };

    client
        .initialize(params, Some(DEFAULT_DISCOVERY_TIMEOUT))
        .await
        .with_context(|| format!("`initialize` handshake failed for child `{alias}`"))?;

    Ok(client)
}

/// Runs `tools/list`, `resources/list`, `prompts/list` against a freshly
/// initialized child and registers whatever comes back. A list call that
/// errors contributes an empty list for that category rather than failing
/// the whole child (spec §4.2 partial-discovery tolerance).
async fn discover_and_register(alias: &str, client: &Arc<McpClient>, registry: &RwLock<Registry>) {
    // Independent requests to the same already-initialized child: run them
    // concurrently so a slow list endpoint doesn't serialize onto the other
    // two and triple the worst-case discovery latency.
    let (tools, resources, prompts) = tokio::join!(
        client.list_tools(None, Some(DEFAULT_DISCOVERY_TIMEOUT)),
        client.list_resources(None, Some(DEFAULT_DISCOVERY_TIMEOUT)),
        client.list_prompts(None, Some(DEFAULT_DISCOVERY_TIMEOUT)),
    );

    let mut registry = registry.write().await;

    match tools {
        Ok(result) => {
            for tool in result.tools {
                registry.insert_tool(alias, tool.name.clone(), tool);
            }
        }
        Err(e) => warn!(alias, error = %e, "tools/list failed during discovery"),
    }

    match resources {
        Ok(result) => {
            for resource in result.resources {
                registry.insert_resource(alias, resource.uri.clone(), resource);
            }
        }
        Err(e) => warn!(alias, error = %e, "resources/list failed during discovery"),
    }

    match prompts {
        Ok(result) => {
            for prompt in result.prompts {
                registry.insert_prompt(alias, prompt.name.clone(), prompt);
            }
        }
        Err(e) => warn!(alias, error = %e, "prompts/list failed during discovery"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn server(command: &str, disabled: bool) -> ServerConfig {
        ServerConfig {
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            disabled,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn disabled_children_are_skipped_without_error() {
        let mut mcp_servers = IndexMap::new();
        mcp_servers.insert("weather".to_string(), server("weather-mcp", true));
        let (supervisor, errors) = Supervisor::start(RouterConfig { mcp_servers }).await;

        assert!(errors.is_empty());
        assert!(supervisor.client_for("weather").await.is_none());
        assert_eq!(supervisor.registry().await.tool_count(), 0);
    }

    #[tokio::test]
    async fn spawn_failure_is_isolated_to_the_failing_child() {
        let mut mcp_servers = IndexMap::new();
        mcp_servers.insert(
            "broken".to_string(),
            server("this-binary-does-not-exist-anywhere", false),
        );
        let (supervisor, errors) = Supervisor::start(RouterConfig { mcp_servers }).await;

        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("broken"));
        assert!(supervisor.client_for("broken").await.is_none());
    }

    #[tokio::test]
    async fn uptime_is_tracked_from_start() {
        let (supervisor, _) = Supervisor::start(RouterConfig::default()).await;
        // Uptime is monotonic from construction; it cannot go backwards.
        let first = supervisor.uptime_seconds();
        let second = supervisor.uptime_seconds();
        assert!(second >= first);
    }
}
