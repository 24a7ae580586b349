//! Shared helpers for the `serve` e2e tests: spins up a real daemon stack
//! (sqlite-backed `OrchestratorContext`, a `MockLlm`-driven `ReactEngine`,
//! and the axum router) bound to a random local port, same shape as the
//! teacher's `spawn_server_once` helper.

use std::sync::Arc;

use orchestrator_core::agent::{AgentEngine, ReactEngine};
use orchestrator_core::llm::{LlmClient, MockLlm};
use orchestrator_core::nexus::NexusRegulator;
use orchestrator_core::{ContextConfig, OrchestratorContext};
use serve::ServeConfig;
use tokio::net::TcpListener;

/// Keeps the backing sqlite file and server task alive for the test's
/// duration; dropping this tears both down.
pub struct TestServer {
    pub base_url: String,
    pub ctx: Arc<OrchestratorContext>,
    pub nexus: Arc<NexusRegulator>,
    _db_dir: tempfile::TempDir,
    _server: tokio::task::JoinHandle<()>,
}

pub async fn spawn_server() -> TestServer {
    let db_dir = tempfile::tempdir().expect("tempdir");
    let db_path = db_dir.path().join("state.db");

    let ctx = Arc::new(
        OrchestratorContext::init(ContextConfig {
            db_path,
            ..ContextConfig::default()
        })
        .expect("context init"),
    );

    let llm: Arc<dyn LlmClient> = Arc::new(MockLlm::new("mock assistant reply"));
    let agent: Arc<dyn AgentEngine> = Arc::new(ReactEngine::new(
        llm.clone(),
        ctx.tool_executor.clone(),
        ctx.mcp.clone(),
        ctx.state_store.clone(),
    ));

    let (router, nexus) = serve::build(ctx.clone(), agent, llm, ServeConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        ctx,
        nexus,
        _db_dir: db_dir,
        _server: server,
    }
}
