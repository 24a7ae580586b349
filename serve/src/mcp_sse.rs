//! The JSON-RPC-over-SSE MCP server (§4.2 "JSON-RPC-over-SSE Server"): a
//! client GETs `/mcp/sse`, gets an `endpoint` event carrying a
//! session-scoped POST URL, then POSTs JSON-RPC requests there; responses
//! are produced asynchronously onto the SSE stream as `message` events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use orchestrator_core::interceptors::PERMISSION_DENIED_CODE;
use orchestrator_core::message::Message;
use orchestrator_core::tool_executor::{InternalToolCall, ToolCall};

use crate::app::{AppState, McpSession};
use crate::auth::check_bearer;

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

/// `GET /mcp/sse` (§6, §4.2).
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    check_bearer(&headers, state.mcp_auth_token.as_deref())?;

    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Value>(128);
    state.sessions.insert(
        session_id.clone(),
        Arc::new(McpSession {
            tx,
            client_name: tokio::sync::RwLock::new("anonymous".to_string()),
        }),
    );

    let endpoint = Event::default()
        .event("endpoint")
        .data(json!({ "uri": format!("/mcp/messages?session_id={session_id}") }).to_string());

    let messages = ReceiverStream::new(rx).map(|v| {
        Ok(Event::default()
            .event("message")
            .data(v.to_string()))
    });

    let stream = tokio_stream::once(Ok(endpoint)).chain(messages);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn jsonrpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

/// `POST /mcp/messages?session_id=...`: accepts one JSON-RPC request,
/// returns 202 immediately, and produces the response asynchronously onto
/// the session's SSE stream (§4.2).
pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if check_bearer(&headers, state.mcp_auth_token.as_deref()).is_err() {
        return StatusCode::UNAUTHORIZED;
    }

    let Some(session_id) = query.session_id else {
        return StatusCode::BAD_REQUEST;
    };
    let Some(session) = state.sessions.get(&session_id).map(|e| Arc::clone(e.value())) else {
        return StatusCode::NOT_FOUND;
    };

    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let params = body.get("params").cloned().unwrap_or(json!({}));

    tokio::spawn(async move {
        // `notifications/initialized` is a JSON-RPC notification: no `id`,
        // no reply expected.
        if method == "notifications/initialized" {
            return;
        }
        let response = dispatch_method(&state, &session, &method, params, id.clone()).await;
        let _ = session.tx.send(response).await;
    });

    StatusCode::ACCEPTED
}

async fn dispatch_method(
    state: &Arc<AppState>,
    session: &Arc<McpSession>,
    method: &str,
    params: Value,
    id: Value,
) -> Value {
    match method {
        "initialize" => {
            if let Some(name) = params
                .get("clientInfo")
                .and_then(|c| c.get("name"))
                .and_then(|n| n.as_str())
            {
                *session.client_name.write().await = name.to_string();
            }
            jsonrpc_result(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                    "serverInfo": { "name": "orchestrator", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
        }
        "tools/list" => jsonrpc_result(id, json!({ "tools": list_tools(state).await })),
        "tools/call" => call_tool(state, session, params, id).await,
        "resources/list" => jsonrpc_result(id, json!({ "resources": [] })),
        "resources/read" => read_resource(state, params, id).await,
        "prompts/list" => jsonrpc_result(id, json!({ "prompts": [] })),
        "prompts/get" => jsonrpc_error(id, -32601, "no prompts registered"),
        "ping" => jsonrpc_result(id, json!({})),
        "debug/session" => {
            let client_name = session.client_name.read().await.clone();
            jsonrpc_result(id, json!({ "client_name": client_name }))
        }
        other => jsonrpc_error(id, -32601, format!("method not found: {other}")),
    }
}

const INTERNAL_TOOL_NAMES: &[&str] = &[
    "store_fact",
    "query_facts",
    "delete_fact",
    "update_fact",
    "ingest_file",
    "semantic_search",
    "read_resource",
    "get_system_status",
];

async fn list_tools(state: &Arc<AppState>) -> Vec<Value> {
    let mut tools: Vec<Value> = INTERNAL_TOOL_NAMES
        .iter()
        .map(|name| json!({ "name": name, "description": "", "inputSchema": {"type": "object"} }))
        .collect();

    for (name, schema) in state.ctx.mcp.all_tools().await {
        tools.push(json!({
            "name": name,
            "description": schema.description,
            "inputSchema": schema.input_schema,
        }));
    }

    // The meta-tool the SSE server always advertises alongside internal and
    // MCP-proxied tools (§4.2 "tools/list returns the union ... plus the
    // meta-tool ask_antigravity").
    tools.push(json!({
        "name": "ask_antigravity",
        "description": "Delegate to the internal agent loop",
        "inputSchema": { "type": "object", "properties": { "prompt": { "type": "string" } }, "required": ["prompt"] },
    }));

    tools
}

async fn read_resource(state: &Arc<AppState>, params: Value, id: Value) -> Value {
    let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
        return jsonrpc_error(id, -32602, "missing uri");
    };
    match state
        .ctx
        .memory
        .dispatch_internal(InternalToolCall::ReadResource { uri: uri.to_string() })
        .await
    {
        Ok(v) => jsonrpc_result(id, v),
        Err(e) => jsonrpc_error(id, -32000, e),
    }
}

/// Runs `tools/call` through the interceptor stack (for internal tools
/// only — an MCP-proxied call's arguments are opaque to our interceptors,
/// same as the meta-tool, which isn't a tool at all but a direct agent-loop
/// delegation) and then the Tool Executor (§4.2).
async fn call_tool(
    state: &Arc<AppState>,
    session: &Arc<McpSession>,
    params: Value,
    id: Value,
) -> Value {
    let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
        return jsonrpc_error(id, -32602, "missing tool name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
    let client_name = session.client_name.read().await.clone();

    if name == "ask_antigravity" {
        let prompt = arguments
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let request_id = format!("mcp-{}", Uuid::new_v4());
        return match state
            .agent
            .agent_loop(vec![Message::user(prompt)], None, &request_id)
            .await
        {
            Ok(completion) => jsonrpc_result(
                id,
                json!({ "content": [{ "type": "text", "text": completion.message.content() }] }),
            ),
            Err(e) => jsonrpc_error(id, -32000, e),
        };
    }

    if let Some((server, tool)) = ToolCall::parse_mcp_name(name) {
        let request_id = format!("mcp-{}", Uuid::new_v4());
        let (envelope, _record) = state
            .ctx
            .tool_executor
            .execute(ToolCall::Mcp { server, tool, arguments }, &request_id)
            .await;
        return if envelope.ok {
            jsonrpc_result(id, envelope.result.unwrap_or(Value::Null))
        } else {
            jsonrpc_error(id, -32000, envelope.error.unwrap_or_default())
        };
    }

    let mut call_value = arguments.clone();
    if let Some(obj) = call_value.as_object_mut() {
        obj.insert("tool".to_string(), json!(name));
    }
    let call: InternalToolCall = match serde_json::from_value(call_value) {
        Ok(c) => c,
        Err(e) => return jsonrpc_error(id, -32602, format!("invalid arguments: {e}")),
    };

    let call = match state.interceptors.run(call, &client_name).await {
        Ok(c) => c,
        Err(e) => return jsonrpc_error(id, PERMISSION_DENIED_CODE, e.to_string()),
    };

    let request_id = format!("mcp-{}", Uuid::new_v4());
    let (envelope, _record) = state
        .ctx
        .tool_executor
        .execute(ToolCall::Internal(call), &request_id)
        .await;
    if envelope.ok {
        jsonrpc_result(id, envelope.result.unwrap_or(Value::Null))
    } else {
        jsonrpc_error(id, -32000, envelope.error.unwrap_or_default())
    }
}
