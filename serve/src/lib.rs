//! The outer HTTP/SSE surface (§6 "External Interfaces"): `serve::build()`
//! assembles an [`app::AppState`] around an already-initialized
//! [`OrchestratorContext`] and returns a router the `cli` binary can bind to
//! a `TcpListener` and drive with `axum::serve`.

pub mod app;
pub mod auth;
pub mod chat;
pub mod connectivity;
pub mod health;
pub mod mcp_sse;
pub mod response;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use orchestrator_core::agent::AgentEngine;
use orchestrator_core::interceptors::{BankConfig, BankConfigSource, InterceptorStack};
use orchestrator_core::llm::LlmClient;
use orchestrator_core::nexus::NexusRegulator;
use orchestrator_core::state_store::SqliteStateStore;
use orchestrator_core::OrchestratorContext;

use app::AppState;
use connectivity::{ConnectivityChecker, TcpProbe};

/// Resolves bank (kb) privacy/ownership from `config_state` rows keyed
/// `bank:<kb_id>` (§4.2 "an application wires [`BankConfigSource`] to
/// wherever bank ownership is actually recorded").
pub struct StateStoreBankSource {
    store: Arc<SqliteStateStore>,
}

impl StateStoreBankSource {
    pub fn new(store: Arc<SqliteStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BankConfigSource for StateStoreBankSource {
    async fn get(&self, kb_id: &str) -> Option<BankConfig> {
        let row = self.store.config_get(&format!("bank:{kb_id}")).await.ok()??;
        serde_json::from_value(row.value).ok()
    }
}

pub struct ServeConfig {
    pub mcp_auth_token: Option<String>,
    /// `None` falls back to a real [`TcpProbe`]; tests pass
    /// `Some(Arc::new(AlwaysOnline))` to avoid a real network hop.
    pub connectivity: Option<Arc<dyn ConnectivityChecker>>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            mcp_auth_token: None,
            connectivity: None,
        }
    }
}

/// Wires an already-initialized context, agent, and LLM client into a router
/// ready to serve (§6). Kept separate from `OrchestratorContext::init` so the
/// `cli` binary controls startup ordering (register MCP servers and tasks
/// before the first request can reach them).
pub fn build(
    ctx: Arc<OrchestratorContext>,
    agent: Arc<dyn AgentEngine>,
    llm: Arc<dyn LlmClient>,
    cfg: ServeConfig,
) -> (axum::Router, Arc<NexusRegulator>) {
    let banks: Arc<dyn BankConfigSource> = Arc::new(StateStoreBankSource::new(ctx.state_store.clone()));
    let interceptors = Arc::new(InterceptorStack::standard(banks));
    let nexus = Arc::new(NexusRegulator::new(
        agent.clone(),
        ctx.tool_executor.clone(),
        llm.clone(),
    ));
    let connectivity = cfg.connectivity.unwrap_or_else(|| Arc::new(TcpProbe::default()));

    let state = Arc::new(AppState {
        ctx,
        agent,
        llm,
        nexus: nexus.clone(),
        interceptors,
        connectivity,
        sessions: DashMap::new(),
        mcp_auth_token: cfg.mcp_auth_token,
        started_at: Instant::now(),
    });

    (app::router(state), nexus)
}

/// Binds and serves `router` until the process receives a shutdown signal,
/// used by the `cli` binary's daemon entry point.
pub async fn serve_until_shutdown(
    listener: tokio::net::TcpListener,
    router: axum::Router,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
