//! Explicit process context (§9 redesign flag "Global singletons"): a plain
//! struct of `Arc`-wrapped leaf services, built once at startup in
//! leaf-first order and threaded through constructors, rather than a
//! module-level `ServiceRegistry` singleton any component can reach into.
//!
//! Construction order matches §9: state store -> memory client -> tool
//! executor -> scheduler -> MCP registry -> Nexus. Callers (the `cli` crate's
//! `main`, and `serve`'s app state) hold one `Arc<OrchestratorContext>` and
//! pass it down; no component imports a crate-level static to reach another.

use std::sync::Arc;

use crate::mcp::McpRegistry;
use crate::memory_client::{HttpIngestSink, IngestSink, MemoryClient};
use crate::scheduler::{AlwaysIdle, FixedTempo, IdleChecker, NotificationSink, Scheduler, Tempo, TempoProvider, TracingNotificationSink};
use crate::sentinel::Sentinel;
use crate::state_store::SqliteStateStore;
use crate::tool_executor::ToolExecutor;

/// Everything a running process needs, constructed once and shared by
/// reference. Each field is independently `Arc`-cloneable so a subsystem
/// (e.g. the SSE server) can hold just the pieces it needs without holding
/// the whole context alive longer than necessary.
pub struct OrchestratorContext {
    pub state_store: Arc<SqliteStateStore>,
    pub memory: Arc<MemoryClient>,
    pub sentinel: Arc<Sentinel>,
    pub tool_executor: Arc<ToolExecutor>,
    pub scheduler: Arc<Scheduler>,
    pub mcp: Arc<McpRegistry>,
}

/// Build-time knobs threaded into the leaf-first construction sequence;
/// kept separate from `config::Settings` so `core` doesn't depend on the
/// `config` crate for its own wiring contract.
pub struct ContextConfig {
    pub db_path: std::path::PathBuf,
    pub retrieval_backend_url: String,
    pub idle: Arc<dyn IdleChecker>,
    pub tempo: Arc<dyn TempoProvider>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("orchestrator.db"),
            retrieval_backend_url: String::new(),
            idle: Arc::new(AlwaysIdle),
            tempo: Arc::new(FixedTempo(Tempo::Alert)),
            notifications: Arc::new(TracingNotificationSink),
        }
    }
}

impl OrchestratorContext {
    /// Leaf-first startup (§9): state store, then memory client built on
    /// top of it, then the tool executor built on top of memory + MCP +
    /// Sentinel, then the scheduler (which the tool executor's task bodies
    /// will in turn call back into), then the MCP registry itself is
    /// actually constructed earlier since the tool executor needs it — the
    /// "leaf-first" ordering is about *dependency* direction, not literal
    /// field-initialization order, so MCP and state store (both true leaves,
    /// neither depending on the other) are built first.
    pub fn init(cfg: ContextConfig) -> Result<Self, crate::error::StateStoreError> {
        let state_store = Arc::new(SqliteStateStore::new(&cfg.db_path)?);
        let mcp = Arc::new(McpRegistry::new());
        let sink: Arc<dyn IngestSink> = Arc::new(HttpIngestSink::new(cfg.retrieval_backend_url));
        let memory = Arc::new(MemoryClient::new(Arc::clone(&state_store), sink));
        let sentinel = Arc::new(Sentinel::new(Arc::clone(&state_store)));
        let tool_executor = Arc::new(
            ToolExecutor::new(Arc::clone(&mcp), Arc::clone(&memory))
                .with_sentinel(Arc::clone(&sentinel)),
        );
        let scheduler = Scheduler::new(cfg.idle, cfg.tempo, cfg.notifications).with_state_store(Arc::clone(&state_store));

        Ok(Self {
            state_store,
            memory,
            sentinel,
            tool_executor,
            scheduler: Arc::new(scheduler),
            mcp,
        })
    }
}
