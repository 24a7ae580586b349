//! Concrete row types for the persisted tables of §3/§6: every record the
//! spec enumerates as a `#[derive(Debug, Clone, Serialize, Deserialize)]`
//! struct, not a stringly-typed map (§9 "Dynamic typing / runtime dispatch").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `config_state(key unique, value, source, last_updated)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigStateRow {
    pub key: String,
    pub value: serde_json::Value,
    pub source: String,
    pub last_updated: i64,
}

/// `system_state(item unique, details json, category, last_updated)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStateRow {
    pub item: String,
    pub details: serde_json::Value,
    pub category: String,
    pub last_updated: i64,
}

/// `task_def(name unique, type, enabled, schedule, idle_only, priority, description, prompt, config json)`.
///
/// The on-disk/DB mirror of a [`crate::scheduler::Task`]; the scheduler is the
/// in-memory owner, this row is what hot-reload diffs against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefRow {
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub schedule: Option<String>,
    pub idle_only: bool,
    pub priority: String,
    pub description: String,
    pub prompt: Option<String>,
    pub config: serde_json::Value,
}

/// `mcp_server(name unique, command, args, env, enabled, type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerRow {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub enabled: bool,
    pub core_service: bool,
    pub transport: String,
}

/// `fact(entity, relation, target, context, confidence, kb_id)`; unique across
/// `(entity, relation, target, kb_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRow {
    pub id: i64,
    pub entity: String,
    pub relation: String,
    pub target: String,
    pub context: String,
    pub confidence: f64,
    pub kb_id: String,
}

/// `episode(request_id, messages json, consolidated bool)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRow {
    pub id: i64,
    pub request_id: String,
    pub messages: serde_json::Value,
    pub consolidated: bool,
}

/// `ingestion_history(file_hash unique, kb_id, file_path, file_size, ingested_at)`
/// — the "Cache Entry" of §3, keyed by SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionHistoryRow {
    pub file_hash: String,
    pub kb_id: String,
    pub file_path: String,
    pub file_size: i64,
    pub ingested_at: i64,
}

/// `tool_rating(tool_name unique, overall_rating, success_rate, usage_count, deprecated, deprecation_reason, last_evaluated)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRatingRow {
    pub tool_name: String,
    pub overall_rating: f64,
    pub success_rate: f64,
    pub usage_count: i64,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
    pub last_evaluated: i64,
}

/// `tool_performance(tool, success_count, failure_count, reliability_score, last_used)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPerformanceRow {
    pub tool: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub reliability_score: f64,
    pub last_used: i64,
}

/// `sentinel_rules(pattern, allowed, reason, added_at, source)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelRuleRow {
    pub pattern: String,
    pub allowed: bool,
    pub reason: String,
    pub added_at: i64,
    pub source: String,
}

/// Current unix timestamp in seconds, used throughout the state store for
/// `last_updated`/`ingested_at`/`added_at` columns.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
