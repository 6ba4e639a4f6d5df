//! A minimal async client for speaking the Model Context Protocol (MCP) to a
//! single child process over its STDIO.
//!
//! The client is intentionally lightweight – it is only capable of:
//!   1. Spawning a subprocess that launches a conforming MCP server that
//!      communicates over stdio, newline-delimited.
//!   2. Sending MCP requests and pairing them with their corresponding
//!      responses.
//!   3. Offering convenience helpers for `tools/list`, `tools/call`,
//!      `resources/list`, `resources/read`, `prompts/list` and `prompts/get`.
//!
//! The crate hides all JSON-RPC framing details behind a typed API. Callers
//! interact with the [`ModelContextProtocolRequest`] trait from `mcp-types` to
//! issue requests and receive strongly-typed results.

use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use mcp_types::CallToolRequest;
use mcp_types::CallToolRequestParams;
use mcp_types::CallToolResult;
use mcp_types::GetPromptRequest;
use mcp_types::GetPromptRequestParams;
use mcp_types::GetPromptResult;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::InitializedNotification;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::ListPromptsRequest;
use mcp_types::ListPromptsRequestParams;
use mcp_types::ListPromptsResult;
use mcp_types::ListResourcesRequest;
use mcp_types::ListResourcesRequestParams;
use mcp_types::ListResourcesResult;
use mcp_types::ListToolsRequest;
use mcp_types::ListToolsRequestParams;
use mcp_types::ListToolsResult;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::ReadResourceRequest;
use mcp_types::ReadResourceRequestParams;
use mcp_types::ReadResourceResult;
use mcp_types::RequestId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Capacity of the bounded channels used for transporting messages between
/// the client API and the IO tasks.
const CHANNEL_CAPACITY: usize = 128;

/// Internal representation of a pending request sender.
type PendingSender = oneshot::Sender<JSONRPCMessage>;

/// A running MCP client for one child process.
pub struct McpClient {
    /// Retain this child process until the client is dropped. The Tokio
    /// runtime makes a "best effort" to reap the process after it exits, but
    /// it is not a guarantee. See the `kill_on_drop` documentation. Behind a
    /// `Mutex` so [`kill`](Self::kill) can reach it through a shared `&self`
    /// — callers hold `Arc<McpClient>`, not an owned one.
    child: Mutex<tokio::process::Child>,

    /// Channel for sending JSON-RPC messages *to* the background writer task.
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,

    /// Map of `request.id -> oneshot::Sender` used to dispatch responses back
    /// to the originating caller.
    pending: Arc<Mutex<HashMap<i64, PendingSender>>>,

    /// Monotonically increasing counter used to generate request IDs.
    id_counter: AtomicI64,

    /// Flips to `true` once the reader task observes the child's stdout
    /// close, i.e. the transport has gone down. Callers that need to react
    /// to child exit (the supervisor) watch this rather than polling the
    /// process.
    closed: watch::Receiver<bool>,
}

impl McpClient {
    /// Spawn the given command and establish an MCP session over its STDIO.
    /// Caller is responsible for calling [`initialize`](Self::initialize).
    ///
    /// `alias` tags every line this child writes to stderr in the log sink;
    /// `cwd`, if set, becomes the child's working directory.
    pub async fn new_stdio_client(
        alias: &str,
        program: OsString,
        args: Vec<OsString>,
        cwd: Option<OsString>,
        env: Option<HashMap<String, String>>,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(create_env_for_mcp_server(env))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let mut child = command.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture child stderr"))?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
        let pending: Arc<Mutex<HashMap<i64, PendingSender>>> = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: drains `outgoing_rx` onto the child's stdin, one line
        // of JSON per message.
        let writer_handle = {
            let mut stdin = stdin;
            tokio::spawn(async move {
                while let Some(msg) = outgoing_rx.recv().await {
                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            debug!("MCP message to server: {json}");
                            if stdin.write_all(json.as_bytes()).await.is_err() {
                                error!("failed to write message to child stdin");
                                break;
                            }
                            if stdin.write_all(b"\n").await.is_err() {
                                error!("failed to write newline to child stdin");
                                break;
                            }
                        }
                        Err(e) => error!("failed to serialize JSONRPCMessage: {e}"),
                    }
                }
            })
        };

        // Reader task: reads line-delimited JSON from the child's stdout and
        // dispatches responses to the pending map.
        let (closed_tx, closed_rx) = watch::channel(false);
        let reader_handle = {
            let pending = pending.clone();
            let mut lines = BufReader::new(stdout).lines();

            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("MCP message from server: {line}");
                    match serde_json::from_str::<JSONRPCMessage>(&line) {
                        Ok(JSONRPCMessage::Response(resp)) => {
                            Self::dispatch_response(coerce_structured_content(resp), &pending).await;
                        }
                        Ok(JSONRPCMessage::Error(err)) => {
                            Self::dispatch_error(err, &pending).await;
                        }
                        Ok(JSONRPCMessage::Notification(JSONRPCNotification { .. })) => {
                            info!("<- notification: {line}");
                        }
                        Ok(other) => {
                            info!("<- unhandled message: {other:?}");
                        }
                        Err(e) => {
                            error!("failed to deserialize JSONRPCMessage: {e}; line = {line}")
                        }
                    }
                }
                // EOF on the child's stdout: the transport is down. Fail
                // every request still waiting on a reply instead of letting
                // it hang forever.
                let _ = closed_tx.send(true);
                let mut guard = pending.lock().await;
                for (_, tx) in guard.drain() {
                    drop(tx);
                }
            })
        };

        // stderr reader: MCP servers are expected to write diagnostics, not
        // protocol traffic, to stderr. Route each line into the log sink
        // tagged by alias rather than discarding it.
        let stderr_handle = {
            let alias = alias.to_string();
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(alias, "{line}");
                }
            })
        };

        // The tasks are intentionally detached: dropping `McpClient` drops
        // `outgoing_tx`/`child`, which closes the channel/pipes and ends them.
        let _ = (writer_handle, reader_handle, stderr_handle);

        Ok(Self {
            child: Mutex::new(child),
            outgoing_tx,
            pending,
            id_counter: AtomicI64::new(1),
            closed: closed_rx,
        })
    }

    /// Sends a kill signal to the child process. `kill_on_drop` alone isn't
    /// enough on shutdown: the supervisor's exit-watcher task holds its own
    /// `Arc<McpClient>` clone until the transport closes, so the refcount
    /// never reaches zero on its own unless the child is killed first.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }

    /// Resolves once the transport to this child has gone down (reader task
    /// observed EOF on stdout). Used by the supervisor to react to child
    /// exit instead of polling the process; safe to call from multiple
    /// tasks and safe to call after the close already happened.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Send an arbitrary MCP request and await the typed result.
    ///
    /// If `timeout` is `None` the call waits indefinitely; otherwise a
    /// timeout error is returned once the duration elapses without a reply.
    pub async fn send_request<R>(
        &self,
        params: R::Params,
        timeout: Option<Duration>,
    ) -> Result<R::Result>
    where
        R: ModelContextProtocolRequest,
        R::Params: Serialize,
        R::Result: DeserializeOwned,
    {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request_id = RequestId::Integer(id);

        let params_json = serde_json::to_value(&params)?;
        let params_field = if params_json.is_null() {
            None
        } else {
            Some(params_json)
        };

        let jsonrpc_request = JSONRPCRequest {
            id: request_id.clone(),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: R::METHOD.to_string(),
            params: params_field,
        };

        let message = JSONRPCMessage::Request(jsonrpc_request);

        let (tx, rx) = oneshot::channel();

        // Register before sending so a reply that arrives immediately can
        // never race ahead of the pending-map insert.
        {
            let mut guard = self.pending.lock().await;
            guard.insert(id, tx);
        }

        if self.outgoing_tx.send(message).await.is_err() {
            let mut guard = self.pending.lock().await;
            guard.remove(&id);
            return Err(anyhow!(
                "failed to send message to writer task - channel closed"
            ));
        }

        let msg = match timeout {
            Some(duration) => match time::timeout(duration, rx).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(_)) => {
                    let mut guard = self.pending.lock().await;
                    guard.remove(&id);
                    return Err(anyhow!(
                        "response channel closed before a reply was received"
                    ));
                }
                Err(_) => {
                    let mut guard = self.pending.lock().await;
                    guard.remove(&id);
                    return Err(anyhow!("request `{}` timed out", R::METHOD));
                }
            },
            None => rx
                .await
                .map_err(|_| anyhow!("response channel closed before a reply was received"))?,
        };

        match msg {
            JSONRPCMessage::Response(JSONRPCResponse { result, .. }) => {
                let typed: R::Result = serde_json::from_value(result)?;
                Ok(typed)
            }
            JSONRPCMessage::Error(err) => Err(anyhow!(
                "server returned JSON-RPC error: code = {}, message = {}",
                err.error.code,
                err.error.message
            )),
            other => Err(anyhow!(
                "unexpected message variant received in reply path: {other:?}"
            )),
        }
    }

    pub async fn send_notification<N>(&self, params: N::Params) -> Result<()>
    where
        N: ModelContextProtocolNotification,
        N::Params: Serialize,
    {
        let params_json = serde_json::to_value(&params)?;
        let params_field = if params_json.is_null() {
            None
        } else {
            Some(params_json)
        };

        let method = N::METHOD.to_string();
        let jsonrpc_notification = JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.clone(),
            params: params_field,
        };

        self.outgoing_tx
            .send(JSONRPCMessage::Notification(jsonrpc_notification))
            .await
            .with_context(|| format!("failed to send notification `{method}` to writer task"))
    }

    /// Negotiates the `initialize` handshake: sends the `initialize` request,
    /// then the `notifications/initialized` notification once the response
    /// arrives. Returns the `initialize` response.
    pub async fn initialize(
        &self,
        initialize_params: InitializeRequestParams,
        timeout: Option<Duration>,
    ) -> Result<InitializeResult> {
        let response = self
            .send_request::<InitializeRequest>(initialize_params, timeout)
            .await?;
        self.send_notification::<InitializedNotification>(None)
            .await?;
        Ok(response)
    }

    pub async fn list_tools(
        &self,
        params: Option<ListToolsRequestParams>,
        timeout: Option<Duration>,
    ) -> Result<ListToolsResult> {
        self.send_request::<ListToolsRequest>(params, timeout).await
    }

    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult> {
        let params = CallToolRequestParams { name, arguments };
        debug!("MCP tool call: {params:?}");
        self.send_request::<CallToolRequest>(params, timeout).await
    }

    pub async fn list_resources(
        &self,
        params: Option<ListResourcesRequestParams>,
        timeout: Option<Duration>,
    ) -> Result<ListResourcesResult> {
        self.send_request::<ListResourcesRequest>(params, timeout)
            .await
    }

    pub async fn read_resource(
        &self,
        uri: String,
        timeout: Option<Duration>,
    ) -> Result<ReadResourceResult> {
        self.send_request::<ReadResourceRequest>(ReadResourceRequestParams { uri }, timeout)
            .await
    }

    pub async fn list_prompts(
        &self,
        params: Option<ListPromptsRequestParams>,
        timeout: Option<Duration>,
    ) -> Result<ListPromptsResult> {
        self.send_request::<ListPromptsRequest>(params, timeout)
            .await
    }

    pub async fn get_prompt(
        &self,
        name: String,
        arguments: Option<HashMap<String, String>>,
        timeout: Option<Duration>,
    ) -> Result<GetPromptResult> {
        self.send_request::<GetPromptRequest>(GetPromptRequestParams { name, arguments }, timeout)
            .await
    }

    async fn dispatch_response(
        resp: JSONRPCResponse,
        pending: &Arc<Mutex<HashMap<i64, PendingSender>>>,
    ) {
        let id = match resp.id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => {
                error!("response with string ID - no matching pending request");
                return;
            }
        };

        let tx_opt = {
            let mut guard = pending.lock().await;
            guard.remove(&id)
        };
        if let Some(tx) = tx_opt {
            let _ = tx.send(JSONRPCMessage::Response(resp));
        } else {
            warn!(id, "no pending request found for response");
        }
    }

    async fn dispatch_error(err: JSONRPCError, pending: &Arc<Mutex<HashMap<i64, PendingSender>>>) {
        let id = match err.id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => return,
        };

        let tx_opt = {
            let mut guard = pending.lock().await;
            guard.remove(&id)
        };
        if let Some(tx) = tx_opt {
            let _ = tx.send(JSONRPCMessage::Error(err));
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // `kill_on_drop(true)` already does this, but a direct `try_wait`
        // reaps the process immediately when it has already exited instead
        // of waiting on the Tokio runtime to get around to it.
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.try_wait();
        }
    }
}

/// Some child servers reply to `tools/call` with `"structuredContent": null`
/// instead of omitting the field, which breaks strict consumers that expect
/// either an object or absence. Coerce `null` to `{}` on the one response
/// shape known to carry this field, `tools/call`'s `CallToolResult`.
fn coerce_structured_content(mut resp: JSONRPCResponse) -> JSONRPCResponse {
    if let Some(obj) = resp.result.as_object_mut() {
        if matches!(obj.get("structuredContent"), Some(serde_json::Value::Null)) {
            obj.insert(
                "structuredContent".to_string(),
                serde_json::Value::Object(Default::default()),
            );
        }
    }
    resp
}

/// Environment variables that are always included when spawning a new MCP
/// server, to which the per-server configured `env` is then merged in.
#[rustfmt::skip]
#[cfg(unix)]
const DEFAULT_ENV_VARS: &[&str] = &[
    // https://modelcontextprotocol.io/docs/tools/debugging#environment-variables
    // states that MCP servers inherit only a subset of environment variables
    // automatically, like `USER`, `HOME`, and `PATH`, without fully
    // enumerating the list. This mirrors what Claude Desktop passes through
    // on macOS.
    "HOME",
    "LOGNAME",
    "PATH",
    "SHELL",
    "USER",
    "__CF_USER_TEXT_ENCODING",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "TZ",
];

#[cfg(windows)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "PATH",
    "PATHEXT",
    "USERNAME",
    "USERDOMAIN",
    "USERPROFILE",
    "TEMP",
    "TMP",
];

/// `extra_env` comes from the `env` map on a server's entry in `mcp_servers`.
fn create_env_for_mcp_server(
    extra_env: Option<HashMap<String, String>>,
) -> HashMap<String, String> {
    DEFAULT_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|value| (var.to_string(), value)))
        .chain(extra_env.unwrap_or_default())
        .collect::<HashMap<_, _>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_env_for_mcp_server() {
        let env_var = "USER";
        let existing = std::env::var(env_var).unwrap_or_default();
        let new_value = format!("{existing}-extra");
        let extra_env = HashMap::from([(env_var.to_owned(), new_value.clone())]);
        let mcp_server_env = create_env_for_mcp_server(Some(extra_env));
        assert!(mcp_server_env.contains_key("PATH"));
        assert_eq!(Some(&new_value), mcp_server_env.get(env_var));
    }

    #[test]
    fn coerces_null_structured_content_to_empty_object() {
        let resp = JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            result: json!({
                "content": [],
                "structuredContent": null,
            }),
        };
        let coerced = coerce_structured_content(resp);
        assert_eq!(coerced.result["structuredContent"], json!({}));
    }

    #[test]
    fn leaves_other_results_untouched() {
        let resp = JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            result: json!({ "tools": [] }),
        };
        let coerced = coerce_structured_content(resp);
        assert_eq!(coerced.result, json!({ "tools": [] }));
    }
}
