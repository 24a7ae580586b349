//! Per-module error taxonomy (§7 of the spec) plus the crate-root aggregate
//! the HTTP layer sees.
//!
//! Each owning module gets its own `thiserror` enum rather than one flat type,
//! mirroring how a real system separates a scheduler's failure modes from a
//! transport's. `OrchestratorError` is the boundary type: everything that can
//! cross from `core` into `serve` collapses into it so the HTTP handler has one
//! match, not five.

use thiserror::Error;

/// Failure modes for one task-body invocation (§4.1 "Retry logic").
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("dependency {0} unhealthy (advisory, execution proceeds)")]
    Dependency(String),
    #[error("cancelled")]
    Cancelled,
    #[error("task body panicked: {0}")]
    Body(String),
}

/// Failure modes for the MCP transport (process lifecycle, JSON-RPC, breakers).
#[derive(Debug, Error)]
pub enum McpError {
    #[error("server {0} not registered")]
    UnknownServer(String),
    #[error("spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("handshake with {0} timed out")]
    HandshakeTimeout(String),
    #[error("handshake with {0} failed: {1}")]
    HandshakeFailed(String, String),
    #[error("{server} unavailable (circuit open)")]
    Unavailable { server: String },
    #[error("json-rpc error from {server}: {message}")]
    JsonRpc { server: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("call to {tool} timed out after {timeout_secs}s")]
    CallTimeout { tool: String, timeout_secs: u64 },
    #[error("lock on server {0} timed out")]
    LockTimeout(String),
}

/// `IngestOutcome` — the dedicated result variant §9's "Exceptions for control
/// flow" redesign flag calls for, replacing the original's string-matched
/// `QualityError("Quality Check Failed...")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ok,
    Duplicate,
    QualityReject,
    Recursion,
    ExtractionFail,
    /// Heavy file held in `deferred/` until the night window (§4.3
    /// "Triage"); not one of the original's string-matched exception
    /// outcomes, but a legitimate fourth path through the pipeline.
    Deferred,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("quality check failed: {0}")]
    QualityReject(String),
    #[error("recursive artifact detected: {0}")]
    Recursion(String),
    #[error("submission to retrieval backend failed: {0}")]
    Submission(String),
    #[error("filing failed: {0}")]
    Filing(#[from] std::io::Error),
    #[error("hashing failed: {0}")]
    Hashing(String),
}

impl IngestError {
    pub fn outcome(&self) -> IngestOutcome {
        match self {
            IngestError::QualityReject(_) => IngestOutcome::QualityReject,
            IngestError::Recursion(_) => IngestOutcome::Recursion,
            _ => IngestOutcome::ExtractionFail,
        }
    }
}

/// Failure modes for the Nexus Regulator's dispatch algorithm.
#[derive(Debug, Error)]
pub enum NexusError {
    #[error("trigger registry: {0}")]
    TriggerRegistry(String),
    #[error("intent classifier: {0}")]
    IntentClassifier(String),
    #[error("agent handover: {0}")]
    AgentHandover(String),
}

/// Failure modes surfaced by the Tool Executor (§7 "Propagation policy": tool
/// errors become tool-result messages, not propagated exceptions, so this type
/// is mostly consumed at the edge rather than bubbled with `?`).
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    #[error("SECURITY BLOCK: {0}")]
    SentinelBlock(String),
    #[error("permission denied: {0}")]
    InterceptorDenied(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Mcp(#[from] McpErrorKind),
}

/// Clonable projection of [`McpError`] for embedding in [`ToolError`], which
/// must be `Clone` to live in a `ToolCallRecord` kept around after the call.
#[derive(Debug, Clone, Error)]
pub enum McpErrorKind {
    #[error("{server} unavailable")]
    Unavailable { server: String },
    #[error("json-rpc: {0}")]
    JsonRpc(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl From<&McpError> for ToolError {
    fn from(e: &McpError) -> Self {
        match e {
            McpError::Unavailable { server } => ToolError::Mcp(McpErrorKind::Unavailable {
                server: server.clone(),
            }),
            McpError::JsonRpc { message, .. } => {
                ToolError::Mcp(McpErrorKind::JsonRpc(message.clone()))
            }
            other => ToolError::Mcp(McpErrorKind::Transport(other.to_string())),
        }
    }
}

/// Failures from the state-store client (L0).
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("pool: {0}")]
    Pool(String),
}

/// Crate-root aggregate error: the shape the HTTP/SSE boundary sees. §7
/// "External HTTP callers see either the normal completion or an error
/// envelope with kind+message; stack traces are never returned."
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Nexus(#[from] NexusError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
    #[error("llm: {0}")]
    Llm(String),
}

impl OrchestratorError {
    /// `(kind, message)` pair for the HTTP error envelope. Never includes a
    /// backtrace or source chain — §7 "stack traces are never returned".
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Task(_) => "task",
            OrchestratorError::Mcp(_) => "mcp",
            OrchestratorError::Ingest(_) => "ingest",
            OrchestratorError::Nexus(_) => "nexus",
            OrchestratorError::Tool(_) => "tool",
            OrchestratorError::StateStore(_) => "state_store",
            OrchestratorError::Llm(_) => "llm",
        }
    }
}
