//! The Tool Executor (§4.2 "Tool invocation contract", L2 of §2): the single
//! place every tool call passes through, whether it originates from the
//! agent engine's loop, the Nexus Regulator's trigger dispatch, or the MCP
//! SSE server.
//!
//! §9 "Dynamic typing / runtime dispatch" redesign flag: rather than a
//! string tool name plus a `HashMap<String, Value>` of arguments, calls are
//! represented as the sealed [`ToolCall`] enum — a closed set of internal
//! tools with typed argument structs, plus one open variant for MCP-proxied
//! calls (which are inherently dynamic: the schema comes from the child
//! process at handshake time, not from this crate's type system).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{McpError, ToolError};
use crate::mcp::McpRegistry;
use crate::memory_client::MemoryClient;
use crate::sentinel::Sentinel;

/// Internal (non-MCP) tool calls with typed arguments (§4.2 write/read tool
/// names referenced by the interceptor stack: `store_fact`, `ingest_file`,
/// `delete_fact`, `update_fact`, `query_facts`, `semantic_search`,
/// `read_resource`, plus `get_system_status` used by the Nexus trigger
/// registry's worked example in §8 scenario 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum InternalToolCall {
    StoreFact {
        entity: String,
        relation: String,
        target: String,
        context: String,
        #[serde(default = "default_confidence")]
        confidence: f64,
        kb_id: String,
    },
    QueryFacts {
        kb_id: String,
        entity: Option<String>,
    },
    DeleteFact {
        id: i64,
        kb_id: String,
    },
    UpdateFact {
        id: i64,
        kb_id: String,
        context: Option<String>,
        confidence: Option<f64>,
    },
    IngestFile {
        path: String,
        kb_id: String,
    },
    SemanticSearch {
        query: String,
        kb_id: String,
    },
    ReadResource {
        uri: String,
    },
    GetSystemStatus,
    /// The meta-tool the SSE server's `tools/list` always includes
    /// alongside internal + MCP tools (§4.2): delegates to the agent
    /// engine's own loop rather than dispatching to a registry entry.
    AskAntigravity {
        prompt: String,
    },
}

fn default_confidence() -> f64 {
    0.5
}

impl InternalToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            InternalToolCall::StoreFact { .. } => "store_fact",
            InternalToolCall::QueryFacts { .. } => "query_facts",
            InternalToolCall::DeleteFact { .. } => "delete_fact",
            InternalToolCall::UpdateFact { .. } => "update_fact",
            InternalToolCall::IngestFile { .. } => "ingest_file",
            InternalToolCall::SemanticSearch { .. } => "semantic_search",
            InternalToolCall::ReadResource { .. } => "read_resource",
            InternalToolCall::GetSystemStatus => "get_system_status",
            InternalToolCall::AskAntigravity { .. } => "ask_antigravity",
        }
    }

    /// Whether this tool mutates durable state, for the Write-Own
    /// interceptor (§4.2 "Interceptors").
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            InternalToolCall::StoreFact { .. }
                | InternalToolCall::IngestFile { .. }
                | InternalToolCall::DeleteFact { .. }
                | InternalToolCall::UpdateFact { .. }
        )
    }

    /// The `kb_id` this call targets, if any — read by both interceptors.
    pub fn kb_id(&self) -> Option<&str> {
        match self {
            InternalToolCall::StoreFact { kb_id, .. }
            | InternalToolCall::DeleteFact { kb_id, .. }
            | InternalToolCall::UpdateFact { kb_id, .. }
            | InternalToolCall::QueryFacts { kb_id, .. }
            | InternalToolCall::IngestFile { kb_id, .. }
            | InternalToolCall::SemanticSearch { kb_id, .. } => Some(kb_id),
            InternalToolCall::ReadResource { .. }
            | InternalToolCall::GetSystemStatus
            | InternalToolCall::AskAntigravity { .. } => None,
        }
    }

    /// Overrides the `kb_id` field in place; used by the Write-Own
    /// interceptor to force it to the calling client's name.
    pub fn set_kb_id(&mut self, new_kb_id: String) {
        match self {
            InternalToolCall::StoreFact { kb_id, .. }
            | InternalToolCall::DeleteFact { kb_id, .. }
            | InternalToolCall::UpdateFact { kb_id, .. }
            | InternalToolCall::QueryFacts { kb_id, .. }
            | InternalToolCall::IngestFile { kb_id, .. }
            | InternalToolCall::SemanticSearch { kb_id, .. } => *kb_id = new_kb_id,
            _ => {}
        }
    }
}

/// A single `ToolCall` sum type (§9 redesign flag): either a typed internal
/// call, or an MCP proxy call named `mcp__<server>__<tool>` whose arguments
/// are necessarily an open `serde_json::Value` map (the schema lives in the
/// child process, discovered at handshake).
#[derive(Debug, Clone)]
pub enum ToolCall {
    Internal(InternalToolCall),
    Mcp {
        server: String,
        tool: String,
        arguments: Value,
    },
}

impl ToolCall {
    /// Parses a `mcp__<server>__<tool>` name into its two parts, or `None`
    /// if `name` isn't namespaced that way.
    pub fn parse_mcp_name(name: &str) -> Option<(String, String)> {
        let rest = name.strip_prefix("mcp__")?;
        let (server, tool) = rest.split_once("__")?;
        Some((server.to_string(), tool.to_string()))
    }

    pub fn tool_name(&self) -> String {
        match self {
            ToolCall::Internal(i) => i.name().to_string(),
            ToolCall::Mcp { server, tool, .. } => format!("mcp__{server}__{tool}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    Error,
    BlockedByInterceptor,
    BlockedBySentinel,
}

/// `Tool Call Record` (§3), transient, one per execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool: String,
    pub request_id: String,
    pub outcome: CallOutcome,
    pub latency_ms: u64,
}

/// The `{ok, result|error, latency_ms, tool}` envelope of §4.2.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResultEnvelope {
    pub ok: bool,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl ToolResultEnvelope {
    fn ok(tool: String, result: Value, latency_ms: u64) -> Self {
        Self {
            ok: true,
            tool,
            result: Some(result),
            error: None,
            latency_ms,
        }
    }

    fn err(tool: String, error: String, latency_ms: u64) -> Self {
        Self {
            ok: false,
            tool,
            result: None,
            error: Some(error),
            latency_ms,
        }
    }
}

const TRANSIENT_RETRY_BASE: Duration = Duration::from_millis(500);
const TRANSIENT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Dispatches internal-tool calls directly and MCP-proxied calls through the
/// [`McpRegistry`], recording latency/success for every call (§2 L2 "Tool
/// Executor").
pub struct ToolExecutor {
    mcp: Arc<McpRegistry>,
    memory: Arc<MemoryClient>,
    sentinel: Option<Arc<Sentinel>>,
}

impl ToolExecutor {
    pub fn new(mcp: Arc<McpRegistry>, memory: Arc<MemoryClient>) -> Self {
        Self {
            mcp,
            memory,
            sentinel: None,
        }
    }

    pub fn with_sentinel(mut self, sentinel: Arc<Sentinel>) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// `execute_tool_call` (§4.2). `request_id` identifies the invoking
    /// request for the transient [`ToolCallRecord`] (not persisted; callers
    /// that want an audit trail read it off the return value).
    pub async fn execute(
        &self,
        call: ToolCall,
        request_id: &str,
    ) -> (ToolResultEnvelope, ToolCallRecord) {
        let call_id = Uuid::new_v4().to_string();
        let tool_name = call.tool_name();
        let start = Instant::now();

        let (envelope, outcome) = match call {
            ToolCall::Internal(internal) => self.execute_internal(internal, &tool_name, start).await,
            ToolCall::Mcp {
                server,
                tool,
                arguments,
            } => self.execute_mcp(&server, &tool, arguments, &tool_name, start).await,
        };

        let record = ToolCallRecord {
            call_id,
            tool: tool_name,
            request_id: request_id.to_string(),
            outcome,
            latency_ms: envelope.latency_ms,
        };
        (envelope, record)
    }

    async fn execute_internal(
        &self,
        call: InternalToolCall,
        tool_name: &str,
        start: Instant,
    ) -> (ToolResultEnvelope, CallOutcome) {
        // A bash/shell-adjacent internal tool would route through the
        // Sentinel (§2 L1 "Sentinel"); none of the typed variants here
        // shell out directly, but the hook is kept for the `BashTool`
        // bridge registered alongside these (see `tool_source::BashTool`).
        if let Some(sentinel) = &self.sentinel {
            if let InternalToolCall::AskAntigravity { prompt } = &call {
                if let Err(reason) = sentinel.audit_text(prompt).await {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    return (
                        ToolResultEnvelope::err(
                            tool_name.to_string(),
                            format!("SECURITY BLOCK: {reason}"),
                            latency_ms,
                        ),
                        CallOutcome::BlockedBySentinel,
                    );
                }
            }
        }

        let result = self.memory.dispatch_internal(call).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(v) => (
                ToolResultEnvelope::ok(tool_name.to_string(), v, latency_ms),
                CallOutcome::Ok,
            ),
            Err(e) => (
                ToolResultEnvelope::err(tool_name.to_string(), e.to_string(), latency_ms),
                CallOutcome::Error,
            ),
        }
    }

    /// §7 "Transient network/subprocess failure — retried locally with
    /// exponential backoff (base 0.5s, up to 3 attempts)".
    async fn execute_mcp(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        tool_name: &str,
        start: Instant,
    ) -> (ToolResultEnvelope, CallOutcome) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.mcp.call_tool(server, tool, arguments.clone()).await {
                Ok(v) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    return (
                        ToolResultEnvelope::ok(tool_name.to_string(), v, latency_ms),
                        CallOutcome::Ok,
                    );
                }
                Err(McpError::Unavailable { .. }) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    return (
                        ToolResultEnvelope::err(
                            tool_name.to_string(),
                            "mcp_unavailable".to_string(),
                            latency_ms,
                        ),
                        CallOutcome::Error,
                    );
                }
                Err(e) if attempt < TRANSIENT_RETRY_MAX_ATTEMPTS => {
                    let backoff = TRANSIENT_RETRY_BASE * 2u32.pow(attempt - 1);
                    tracing::warn!(server, tool, attempt, error = %e, "transient mcp failure, retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    return (
                        ToolResultEnvelope::err(tool_name.to_string(), e.to_string(), latency_ms),
                        CallOutcome::Error,
                    );
                }
            }
        }
    }
}

impl From<ToolError> for ToolResultEnvelope {
    fn from(e: ToolError) -> Self {
        ToolResultEnvelope::err("unknown".to_string(), e.to_string(), 0)
    }
}
