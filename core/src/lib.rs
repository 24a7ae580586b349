//! # orchestrator-core
//!
//! The core of the autonomous agent orchestrator: a background task
//! scheduler, an MCP transport and tool-execution layer, a document
//! ingestion pipeline, and the Nexus Regulator that sits in front of the
//! agent engine. Everything else (the `serve` HTTP/SSE surface, the `cli`
//! binary) is a thin shell around an [`context::OrchestratorContext`].
//!
//! ## Main modules
//!
//! - [`scheduler`]: priority- and gate-aware background task scheduler with
//!   deterministic jittered retry and a global circuit breaker.
//! - [`mcp`]: per-server JSON-RPC-over-stdio (or remote SSE) transport, tool
//!   cache, and crash/respawn handling, fronted by [`mcp::McpRegistry`].
//! - [`ingestion`]: the document ingestion pipeline — triage, extraction,
//!   enrichment, submission, and filing.
//! - [`nexus`]: the Nexus Regulator's dispatch algorithm and event taxonomy.
//! - [`agent`]: the Agent Engine interface and a ReAct-style reference loop.
//! - [`tool_executor`]: the single seam every tool call passes through.
//! - [`memory_client`]: facts, episodes, sovereign files, and ingestion-sink
//!   dispatch.
//! - [`sentinel`]: the three-tier command-safety classifier.
//! - [`interceptors`]: the logging/write-own/privacy interceptor stack the
//!   MCP SSE server's `tools/call` runs through.
//! - [`breaker`]: the shared circuit-breaker primitive.
//! - [`state_store`]: the durable SQLite-backed state store (L0).
//! - [`context`]: explicit, leaf-first process wiring
//!   ([`context::OrchestratorContext`]) in place of a service-locator
//!   singleton.
//! - [`error`]: per-module error taxonomy plus the crate-root aggregate.
//! - [`llm`]: the external LLM client seam ([`llm::LlmClient`]).
//! - [`message`]: the shared [`message::Message`] conversation type.

pub mod agent;
pub mod breaker;
pub mod context;
pub mod error;
pub mod ingestion;
pub mod interceptors;
pub mod llm;
pub mod mcp;
pub mod memory_client;
pub mod message;
pub mod nexus;
pub mod scheduler;
pub mod sentinel;
pub mod state_store;
pub mod tool_executor;

pub use context::{ContextConfig, OrchestratorContext};
pub use error::OrchestratorError;
pub use message::Message;

#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
