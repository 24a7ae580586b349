//! Process lifecycle for one MCP server connection (§4.2 "Process
//! lifecycle"). Grounded on the teacher's `McpHttpSession` (async reqwest,
//! own `JsonRpcResponse` parsing struct rather than depending on the
//! transport-library's wire enum) but adapted to stdio over `tokio::process`
//! so the whole loop stays on the async runtime instead of a dedicated
//! OS thread.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mcp_core::{NotificationMessage, RequestMessage};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::McpError;
use crate::mcp::server::{McpServerDescriptor, ToolSchema};

const PROTOCOL_VERSION: &str = "2024-11-05";
const STDERR_LOG_CAPACITY: usize = 200;

/// Mirrors the shape of a JSON-RPC response body; decoded independently of
/// any transport-specific wire enum, same approach as the teacher's HTTP
/// session's local `JsonRpcResponse`.
#[derive(Debug, Deserialize)]
struct WireMessage {
    id: Option<Value>,
    method: Option<String>,
    result: Option<Value>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: i64,
    message: String,
}

enum Outcome {
    Ok(Value),
    Err(McpError),
}

struct StdioHandles {
    child: Child,
    stdin: ChildStdin,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// One live connection to an MCP server: either a spawned stdio subprocess or
/// a Streamable-HTTP client. Owned exclusively by `McpRegistry`; calls are
/// serialized through an async mutex standing in for the spec's "per-server
/// lock (timeout 10s)".
pub enum Connection {
    Stdio {
        handles: Mutex<Option<StdioHandles>>,
        descriptor: McpServerDescriptor,
        pending: Arc<DashMap<u64, oneshot::Sender<Outcome>>>,
        next_id: AtomicU64,
        stderr_log: Arc<std::sync::Mutex<VecDeque<String>>>,
    },
    Http {
        client: reqwest::Client,
        url: String,
        descriptor: McpServerDescriptor,
        session_id: std::sync::Mutex<Option<String>>,
    },
}

impl Connection {
    pub async fn connect(descriptor: McpServerDescriptor) -> Result<Self, McpError> {
        match descriptor.transport {
            super::server::TransportKind::Remote => Self::connect_http(descriptor).await,
            super::server::TransportKind::Stdio => Self::connect_stdio(descriptor).await,
        }
    }

    async fn connect_stdio(descriptor: McpServerDescriptor) -> Result<Self, McpError> {
        let mut cmd = tokio::process::Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: descriptor.command.clone(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let pending: Arc<DashMap<u64, oneshot::Sender<Outcome>>> = Arc::new(DashMap::new());
        let stderr_log = Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(
            STDERR_LOG_CAPACITY,
        )));

        let reader_pending = Arc::clone(&pending);
        let server_name = descriptor.name.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        handle_incoming_line(&line, &reader_pending, &server_name).await;
                    }
                    Ok(None) | Err(_) => {
                        fail_all_pending(&reader_pending, "server process closed its stdout");
                        return;
                    }
                }
            }
        });

        let stderr_buf = Arc::clone(&stderr_log);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buf = stderr_buf.lock().unwrap();
                if buf.len() >= STDERR_LOG_CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        });

        let conn = Connection::Stdio {
            handles: Mutex::new(Some(StdioHandles {
                child,
                stdin,
                reader_task,
                stderr_task,
            })),
            descriptor: descriptor.clone(),
            pending,
            next_id: AtomicU64::new(1),
            stderr_log,
        };

        conn.handshake().await?;
        Ok(conn)
    }

    async fn connect_http(descriptor: McpServerDescriptor) -> Result<Self, McpError> {
        let url = descriptor
            .url
            .clone()
            .ok_or_else(|| McpError::Transport("remote server has no url".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| McpError::Transport(e.to_string()))?;
        let conn = Connection::Http {
            client,
            url,
            descriptor: descriptor.clone(),
            session_id: std::sync::Mutex::new(None),
        };
        conn.handshake().await?;
        Ok(conn)
    }

    /// `initialize` + `notifications/initialized` (§4.2 "Handshake").
    async fn handshake(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": "orchestrator", "version": env!("CARGO_PKG_VERSION") },
        });
        let timeout = self.descriptor().handshake_timeout();
        let name = self.descriptor().name.clone();

        let result = tokio::time::timeout(timeout, self.call_raw("initialize", params))
            .await
            .map_err(|_| McpError::HandshakeTimeout(name.clone()))??;

        if let Some(err) = result_error(&result) {
            return Err(McpError::HandshakeFailed(name, err));
        }

        self.notify("notifications/initialized", json!({})).await?;
        Ok(())
    }

    /// `tools/list` (§3 "Tool cache": ordered sequence of tool schemas
    /// discovered at handshake). Called by the registry right after a
    /// successful `handshake`/respawn, not as part of `handshake` itself, so
    /// a handshake that succeeds but a `tools/list` that fails can be
    /// retried independently.
    pub async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        let result = self.call("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools).map_err(|e| McpError::Transport(e.to_string()))
    }

    fn descriptor(&self) -> &McpServerDescriptor {
        match self {
            Connection::Stdio { descriptor, .. } => descriptor,
            Connection::Http { descriptor, .. } => descriptor,
        }
    }

    /// §4.2 "Per-call timeout default 60s". Internal tools never reach this
    /// path; this is purely the MCP wire call.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let name = self.descriptor().name.clone();
        let timeout = Duration::from_secs(60);
        let result = tokio::time::timeout(timeout, self.call_raw(method, params))
            .await
            .map_err(|_| McpError::CallTimeout {
                tool: method.to_string(),
                timeout_secs: timeout.as_secs(),
            })??;
        if let Some(message) = result_error(&result) {
            return Err(McpError::JsonRpc { server: name, message });
        }
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, McpError> {
        match self {
            Connection::Stdio {
                handles,
                pending,
                next_id,
                ..
            } => {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                let request = RequestMessage::new(id.to_string(), method, params);
                let body = serde_json::to_vec(&request)
                    .map_err(|e| McpError::Transport(e.to_string()))?;

                let (tx, rx) = oneshot::channel();
                pending.insert(id, tx);

                let mut guard = tokio::time::timeout(Duration::from_secs(10), handles.lock())
                    .await
                    .map_err(|_| McpError::LockTimeout(self.descriptor().name.clone()))?;
                let h = guard
                    .as_mut()
                    .ok_or_else(|| McpError::Transport("process not running".into()))?;
                if let Err(e) = h.stdin.write_all(&body).await {
                    pending.remove(&id);
                    return Err(McpError::Transport(e.to_string()));
                }
                if let Err(e) = h.stdin.write_all(b"\n").await {
                    pending.remove(&id);
                    return Err(McpError::Transport(e.to_string()));
                }
                drop(guard);

                match rx.await {
                    Ok(Outcome::Ok(v)) => Ok(v),
                    Ok(Outcome::Err(e)) => Err(e),
                    Err(_) => Err(McpError::Transport("response channel dropped".into())),
                }
            }
            Connection::Http {
                client,
                url,
                session_id,
                ..
            } => {
                let id = uuid::Uuid::new_v4().to_string();
                let request = RequestMessage::new(id, method, params);
                let body = serde_json::to_vec(&request)
                    .map_err(|e| McpError::Transport(e.to_string()))?;
                let mut req = client
                    .post(url)
                    .header("Content-Type", "application/json")
                    .header("Accept", "application/json, text/event-stream")
                    .header("MCP-Protocol-Version", PROTOCOL_VERSION)
                    .body(body);
                if let Some(sid) = session_id.lock().unwrap().clone() {
                    req = req.header("MCP-Session-Id", sid);
                }
                let resp = req.send().await.map_err(|e| McpError::Transport(e.to_string()))?;
                if let Some(sid) = resp
                    .headers()
                    .get("MCP-Session-Id")
                    .and_then(|v| v.to_str().ok())
                {
                    *session_id.lock().unwrap() = Some(sid.to_string());
                }
                let status = resp.status();
                if status == reqwest::StatusCode::ACCEPTED {
                    return Ok(json!({"result": Value::Null}));
                }
                if !status.is_success() {
                    return Err(McpError::Transport(format!("http {status}")));
                }
                let text = resp.text().await.map_err(|e| McpError::Transport(e.to_string()))?;
                let wire: WireMessage =
                    serde_json::from_str(&text).map_err(|e| McpError::Transport(e.to_string()))?;
                Ok(json!({ "result": wire.result, "error": wire.error.map(|e| json!({"code": e.code, "message": e.message})) }))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        match self {
            Connection::Stdio { handles, .. } => {
                let notification = NotificationMessage::new(method, Some(params));
                let mut body = serde_json::to_vec(&notification)
                    .map_err(|e| McpError::Transport(e.to_string()))?;
                body.push(b'\n');
                let mut guard = handles.lock().await;
                let h = guard
                    .as_mut()
                    .ok_or_else(|| McpError::Transport("process not running".into()))?;
                h.stdin
                    .write_all(&body)
                    .await
                    .map_err(|e| McpError::Transport(e.to_string()))?;
                Ok(())
            }
            Connection::Http { .. } => {
                // Best-effort: the HTTP transport's handshake already fires
                // notifications/initialized via call_raw's ACCEPTED path.
                let _ = self.call_raw(method, params).await;
                Ok(())
            }
        }
    }

    pub fn recent_stderr(&self) -> Vec<String> {
        match self {
            Connection::Stdio { stderr_log, .. } => {
                stderr_log.lock().unwrap().iter().cloned().collect()
            }
            Connection::Http { .. } => Vec::new(),
        }
    }

    /// True once the child process has exited or the reader task observed
    /// EOF (§4.2 "Crash handling").
    pub async fn is_dead(&self) -> bool {
        match self {
            Connection::Stdio { handles, .. } => {
                let mut guard = handles.lock().await;
                match guard.as_mut() {
                    Some(h) => h.reader_task.is_finished() || h.stderr_task.is_finished(),
                    None => true,
                }
            }
            Connection::Http { .. } => false,
        }
    }
}

async fn handle_incoming_line(
    line: &str,
    pending: &DashMap<u64, oneshot::Sender<Outcome>>,
    server_name: &str,
) {
    let wire: WireMessage = match serde_json::from_str(line) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(server = server_name, error = %e, "malformed json-rpc line from mcp server");
            return;
        }
    };

    // Server-initiated request, e.g. `roots/list`; this orchestrator does not
    // expose a filesystem-roots concept to child servers, so such requests
    // are simply acknowledged by not answering (no pending reply was ever
    // registered for a server-initiated id, so there is nothing to resolve).
    if wire.method.is_some() {
        return;
    }

    let Some(id_value) = wire.id.clone() else {
        return;
    };
    let Some(id) = id_value.as_str().and_then(|s| s.parse::<u64>().ok()).or_else(|| id_value.as_u64()) else {
        return;
    };

    if let Some((_, tx)) = pending.remove(&id) {
        if let Some(err) = &wire.error {
            let _ = tx.send(Outcome::Err(McpError::JsonRpc {
                server: server_name.to_string(),
                message: err.message.clone(),
            }));
        } else {
            let _ = tx.send(Outcome::Ok(json!({"result": wire.result})));
        }
    }
}

fn fail_all_pending(pending: &DashMap<u64, oneshot::Sender<Outcome>>, reason: &str) {
    let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    for k in keys {
        if let Some((_, tx)) = pending.remove(&k) {
            let _ = tx.send(Outcome::Err(McpError::Transport(reason.to_string())));
        }
    }
}

fn result_error(wrapped: &Value) -> Option<String> {
    wrapped
        .get("error")
        .and_then(|e| e.as_object())
        .and_then(|o| o.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}
