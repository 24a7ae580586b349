//! Axum app: shared state and router (§6 "External Interfaces").

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use tokio::sync::{mpsc, RwLock};

use orchestrator_core::agent::AgentEngine;
use orchestrator_core::interceptors::InterceptorStack;
use orchestrator_core::llm::LlmClient;
use orchestrator_core::nexus::NexusRegulator;
use orchestrator_core::OrchestratorContext;

use crate::connectivity::ConnectivityChecker;

/// One live `/mcp/sse` connection: the queue the SSE loop drains as
/// `message` events, and the client identity learned from `initialize`
/// (§4.2 "client_name" consulted by the interceptor stack).
pub struct McpSession {
    pub tx: mpsc::Sender<serde_json::Value>,
    pub client_name: RwLock<String>,
}

pub struct AppState {
    pub ctx: Arc<OrchestratorContext>,
    pub agent: Arc<dyn AgentEngine>,
    pub llm: Arc<dyn LlmClient>,
    pub nexus: Arc<NexusRegulator>,
    pub interceptors: Arc<InterceptorStack>,
    pub connectivity: Arc<dyn ConnectivityChecker>,
    pub sessions: DashMap<String, Arc<McpSession>>,
    pub mcp_auth_token: Option<String>,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(crate::chat::completions))
        .route("/health", get(crate::health::health))
        .route("/admin/system-status", get(crate::health::system_status))
        .route("/mcp/sse", get(crate::mcp_sse::sse_handler))
        .route("/mcp/messages", post(crate::mcp_sse::messages_handler))
        .with_state(state)
}
