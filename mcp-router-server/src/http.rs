//! The outward MCP surface: a single `/mcp` endpoint speaking the
//! streamable HTTP transport (spec §4.6) — `POST` for request/response and
//! initialization, `GET` for server-pushed notifications over SSE, `DELETE`
//! for session teardown.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::routing::get;
use futures::FutureExt;
use futures::Stream;
use futures::StreamExt;
use mcp_router_core::RouterError;
use mcp_router_core::Supervisor;
use mcp_router_core::dispatch;
use mcp_types::CallToolRequest;
use mcp_types::CallToolRequestParams;
use mcp_types::GetPromptRequest;
use mcp_types::GetPromptRequestParams;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeResult;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::ListPromptsRequest;
use mcp_types::ListPromptsResult;
use mcp_types::ListResourcesRequest;
use mcp_types::ListResourcesResult;
use mcp_types::ListToolsRequest;
use mcp_types::ListToolsResult;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::ReadResourceRequest;
use mcp_types::ReadResourceRequestParams;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::ServerCapabilitiesTools;
use serde_json::Value;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::error;
use tracing::warn;

use crate::error_code::HANDLER_INTERNAL_ERROR;
use crate::error_code::INVALID_REQUEST;
use crate::error_code::SESSION_INVALID;
use crate::session::ServerEvent;
use crate::session::SessionManager;

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub sessions: Arc<SessionManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", get(handle_get).post(handle_post).delete(handle_delete))
        .with_state(state)
}

enum Incoming {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
}

fn parse_incoming(value: Value) -> Result<Incoming, ()> {
    if value.get("id").is_some() {
        serde_json::from_value(value).map(Incoming::Request).map_err(|_| ())
    } else {
        serde_json::from_value(value)
            .map(Incoming::Notification)
            .map_err(|_| ())
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn bad_request_no_session(id: Option<RequestId>) -> Response {
    json_error_response(
        StatusCode::BAD_REQUEST,
        id,
        SESSION_INVALID,
        "Bad Request: No valid session ID provided".to_string(),
        None,
    )
}

fn json_error_response(
    status: StatusCode,
    id: Option<RequestId>,
    code: i64,
    message: String,
    session_id: Option<&str>,
) -> Response {
    let body = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message },
    });
    let mut response = (status, axum::Json(body)).into_response();
    if let Some(sid) = session_id {
        if let Ok(value) = HeaderValue::from_str(sid) {
            response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
        }
    }
    response
}

fn json_result_response(id: RequestId, result: Value, session_id: &str) -> Response {
    let body = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result });
    let mut response = (StatusCode::OK, axum::Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse POST /mcp body as JSON");
            return json_error_response(
                StatusCode::BAD_REQUEST,
                None,
                INVALID_REQUEST,
                "Request body must be valid JSON-RPC".to_string(),
                None,
            );
        }
    };

    let incoming = match parse_incoming(value) {
        Ok(i) => i,
        Err(()) => {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                None,
                INVALID_REQUEST,
                "Body must be a JSON-RPC request or notification".to_string(),
                None,
            );
        }
    };

    let is_initialize = matches!(
        &incoming,
        Incoming::Request(r) if r.method == InitializeRequest::METHOD
    );
    let request_id = match &incoming {
        Incoming::Request(r) => Some(r.id.clone()),
        Incoming::Notification(_) => None,
    };

    let header_sid = session_header(&headers);
    let session = match (header_sid, is_initialize) {
        (Some(sid), _) => match state.sessions.get(&sid).await {
            Some(session) => session,
            None => return bad_request_no_session(request_id),
        },
        (None, true) => state.sessions.create().await,
        (None, false) => return bad_request_no_session(request_id),
    };

    match incoming {
        Incoming::Notification(_) => {
            let mut response = StatusCode::ACCEPTED.into_response();
            if let Ok(value) = HeaderValue::from_str(&session.id) {
                response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
            }
            response
        }
        Incoming::Request(request) => {
            let session_id = session.id.clone();
            let outcome = AssertUnwindSafe(dispatch_request(&state.supervisor, request.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(result)) => json_result_response(request.id, result, &session_id),
                Ok(Err(router_error)) => {
                    let code = router_error.jsonrpc_code();
                    json_error_response(
                        StatusCode::OK,
                        Some(request.id),
                        code,
                        router_error.to_string(),
                        Some(&session_id),
                    )
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(message, "handler panicked while processing request");
                    json_error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Some(request.id),
                        HANDLER_INTERNAL_ERROR,
                        format!("Internal server error: {message}"),
                        Some(&session_id),
                    )
                }
            }
        }
    }
}

async fn handle_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let Some(sid) = session_header(&headers) else {
        return Err(bad_request_no_session(None));
    };
    let Some(session) = state.sessions.get(&sid).await else {
        return Err(bad_request_no_session(None));
    };

    let rx = session.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(ServerEvent { payload }) => Some(Ok(Event::default().data(payload.to_string()))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(Ok(Event::default()
                .event("warning")
                .data(format!("{{\"droppedEvents\":{skipped}}}")))),
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(20))
            .text(": keep-alive"),
    ))
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(sid) = session_header(&headers) else {
        return bad_request_no_session(None);
    };
    if !state.sessions.remove(&sid).await {
        return bad_request_no_session(None);
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Run the request through the method table, returning either the JSON-RPC
/// `result` value or a typed [`RouterError`] (spec §4.10: internal errors are
/// converted to `RouterError` at the boundary where a typed response is
/// required).
async fn dispatch_request(
    supervisor: &Arc<Supervisor>,
    request: JSONRPCRequest,
) -> Result<Value, RouterError> {
    let params = request.params.unwrap_or(Value::Null);

    match request.method.as_str() {
        m if m == InitializeRequest::METHOD => Ok(serde_json::to_value(initialize_result())
            .expect("InitializeResult always serializes")),
        m if m == ListToolsRequest::METHOD => {
            let registry = supervisor.registry().await;
            let result = ListToolsResult {
                tools: registry.list_tools(),
                next_cursor: None,
            };
            Ok(serde_json::to_value(result).expect("ListToolsResult always serializes"))
        }
        m if m == CallToolRequest::METHOD => {
            let params: CallToolRequestParams = serde_json::from_value(params)
                .map_err(|e| RouterError::InvalidParams(format!("invalid tools/call params: {e}")))?;
            let result = dispatch::call_tool(supervisor, &params.name, params.arguments).await;
            Ok(serde_json::to_value(result).expect("CallToolResult always serializes"))
        }
        m if m == ListResourcesRequest::METHOD => {
            let registry = supervisor.registry().await;
            let mut resources = registry.list_resources();
            resources.push(mcp_types::Resource {
                uri: mcp_router_core::registry::STATS_RESOURCE_URI.to_string(),
                name: "router stats".to_string(),
                title: Some("MCP Router Stats".to_string()),
                description: Some("Live counts of active children and federated capabilities".to_string()),
                mime_type: Some("application/json".to_string()),
            });
            let result = ListResourcesResult {
                resources,
                next_cursor: None,
            };
            Ok(serde_json::to_value(result).expect("ListResourcesResult always serializes"))
        }
        m if m == ReadResourceRequest::METHOD => {
            let params: ReadResourceRequestParams = serde_json::from_value(params).map_err(|e| {
                RouterError::InvalidParams(format!("invalid resources/read params: {e}"))
            })?;
            let result = dispatch::read_resource(supervisor, &params.uri).await;
            Ok(serde_json::to_value(result).expect("ReadResourceResult always serializes"))
        }
        m if m == ListPromptsRequest::METHOD => {
            let registry = supervisor.registry().await;
            let result = ListPromptsResult {
                prompts: registry.list_prompts(),
                next_cursor: None,
            };
            Ok(serde_json::to_value(result).expect("ListPromptsResult always serializes"))
        }
        m if m == GetPromptRequest::METHOD => {
            let params: GetPromptRequestParams = serde_json::from_value(params).map_err(|e| {
                RouterError::InvalidParams(format!("invalid prompts/get params: {e}"))
            })?;
            let result = dispatch::get_prompt(supervisor, &params.name, params.arguments).await;
            Ok(serde_json::to_value(result).expect("GetPromptResult always serializes"))
        }
        other => Err(RouterError::MethodNotFound(format!("unknown method `{other}`"))),
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        capabilities: ServerCapabilities {
            completions: None,
            experimental: None,
            logging: None,
            prompts: Some(json!({})),
            resources: Some(json!({})),
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
        },
        instructions: None,
        protocol_version: MCP_SCHEMA_VERSION.to_string(),
        server_info: Implementation {
            name: "mcp-router-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("MCP Router".to_string()),
            user_agent: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mcp_router_core::RouterConfig;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let (supervisor, errors) = Supervisor::start(RouterConfig::default()).await;
        assert!(errors.is_empty());
        AppState {
            supervisor,
            sessions: Arc::new(SessionManager::new()),
        }
    }

    #[tokio::test]
    async fn post_without_session_or_initialize_is_bad_request() {
        let app = router(test_state().await);
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn initialize_without_session_header_mints_one() {
        let app = router(test_state().await);
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"},
                "protocolVersion": MCP_SCHEMA_VERSION,
            }
        })
        .to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(MCP_SESSION_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn delete_with_unknown_session_is_bad_request() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/mcp")
                    .header(MCP_SESSION_ID_HEADER, "deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
