//! `GET /health` and `GET /admin/system-status` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::app::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let internet = state.connectivity.is_online().await;
    let uptime_s = state.started_at.elapsed().as_secs();
    Json(json!({
        "status": if internet { "ok" } else { "degraded" },
        "ok": true,
        "internet": internet,
        "uptime_s": uptime_s,
    }))
}

/// Subsystem rollup (§2 L2/L3 table): scheduler task snapshot, MCP server
/// breaker states, and whether the ingestion pipeline is currently paused.
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let tasks: Vec<_> = state
        .ctx
        .scheduler
        .status()
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "kind": format!("{:?}", t.kind),
                "priority": format!("{:?}", t.priority),
                "enabled": t.enabled,
                "run_count": t.metrics.run_count,
                "error_count": t.metrics.error_count,
                "currently_running": t.metrics.currently_running,
                "last_run": t.metrics.last_run,
                "next_run": t.metrics.next_run,
            })
        })
        .collect();

    let mcp_servers: Vec<_> = state
        .ctx
        .mcp
        .server_names()
        .into_iter()
        .map(|name| {
            let breaker = state.ctx.mcp.breaker_state(&name);
            json!({ "name": name, "breaker": format!("{:?}", breaker) })
        })
        .collect();

    Json(json!({
        "uptime_s": state.started_at.elapsed().as_secs(),
        "scheduler": { "tasks": tasks },
        "mcp": { "servers": mcp_servers },
    }))
}
