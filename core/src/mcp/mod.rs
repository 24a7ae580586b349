//! The MCP Transport & Tool-Execution Layer (§4.2): a registry of named
//! server connections, each guarded by its own circuit breaker, exposing one
//! `call_tool` entry point that spawns/respawns the child process as needed
//! and serializes writes through the connection's own per-server lock.

pub mod server;
pub mod transport;

pub use server::{McpServerDescriptor, ToolSchema, TransportKind};
pub use transport::Connection;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::breaker::BreakerRegistry;
use crate::error::McpError;

/// Non-core servers: 5 consecutive failures -> open 60s (§4.2).
const NON_CORE_THRESHOLD: u32 = 5;
const NON_CORE_COOLDOWN: Duration = Duration::from_secs(60);
/// Core services: 10 failures -> open 30s, plus an auto-recovery probe every
/// 15s while open (§4.2).
const CORE_THRESHOLD: u32 = 10;
const CORE_COOLDOWN: Duration = Duration::from_secs(30);
const CORE_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// One server's live state: its descriptor, its (possibly absent) live
/// connection, and a lock serializing connect attempts so two concurrent
/// first-callers don't both spawn a process (§4.2 "acquire a per-server lock
/// (timeout 10s)").
struct ServerSlot {
    descriptor: McpServerDescriptor,
    connection: RwLock<Option<Connection>>,
    connect_lock: Mutex<()>,
    tools: RwLock<Vec<ToolSchema>>,
}

/// Owns every MCP server connection and their breakers (§3 "Process handle",
/// §4.2). `Arc`-wrapped and handed to the Tool Executor and the hot-reload
/// path; never cloned as a value (redesign flag: explicit context, not a
/// global singleton import).
pub struct McpRegistry {
    servers: DashMap<String, Arc<ServerSlot>>,
    breakers: BreakerRegistry,
}

impl Default for McpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl McpRegistry {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
            breakers: BreakerRegistry::new(),
        }
    }

    /// Registers (or re-registers, idempotently by name) a server
    /// descriptor. Does not connect eagerly; the first `call_tool` or
    /// `ensure_connected` spawns the process.
    pub fn register(&self, descriptor: McpServerDescriptor) {
        let name = descriptor.name.clone();
        let core = descriptor.core_service;
        self.servers.insert(
            name.clone(),
            Arc::new(ServerSlot {
                descriptor,
                connection: RwLock::new(None),
                connect_lock: Mutex::new(()),
                tools: RwLock::new(Vec::new()),
            }),
        );
        self.breakers.register_with(
            name,
            if core { CORE_THRESHOLD } else { NON_CORE_THRESHOLD },
            if core { CORE_COOLDOWN } else { NON_CORE_COOLDOWN },
        );
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|e| e.key().clone()).collect()
    }

    /// Ensures a live connection for `name` exists, spawning/respawning if
    /// necessary, and refreshes the cached tool list on (re)connect
    /// (§4.2 "Process lifecycle", §5 P5 "at most one process is alive at
    /// any instant").
    async fn ensure_connected(&self, name: &str) -> Result<Arc<ServerSlot>, McpError> {
        let slot = self
            .servers
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;

        {
            let conn = slot.connection.read().await;
            if let Some(c) = conn.as_ref() {
                if !c.is_dead().await {
                    return Ok(slot);
                }
            }
        }

        let _guard = tokio::time::timeout(Duration::from_secs(10), slot.connect_lock.lock())
            .await
            .map_err(|_| McpError::LockTimeout(name.to_string()))?;

        // Re-check after acquiring the lock: another caller may have already
        // respawned while we were waiting.
        {
            let conn = slot.connection.read().await;
            if let Some(c) = conn.as_ref() {
                if !c.is_dead().await {
                    return Ok(slot);
                }
            }
        }

        if !slot.descriptor.enabled {
            return Err(McpError::UnknownServer(name.to_string()));
        }

        let connection = Connection::connect(slot.descriptor.clone()).await?;
        let fetched_tools = connection.list_tools().await.unwrap_or_else(|e| {
            tracing::warn!(server = name, error = %e, "tools/list failed after handshake");
            Vec::new()
        });
        *slot.tools.write().await = fetched_tools;
        *slot.connection.write().await = Some(connection);
        Ok(slot)
    }

    /// `execute_tool_call` for the MCP-proxied half of the Tool Executor's
    /// contract (§4.2 "Tool invocation contract"). `server` is the bare
    /// server name (the `mcp__<server>__<tool>` prefix is stripped by the
    /// caller).
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        if !self.breakers.allow(server) {
            return Err(McpError::Unavailable {
                server: server.to_string(),
            });
        }

        let slot = match self.ensure_connected(server).await {
            Ok(s) => s,
            Err(e) => {
                self.breakers.record_failure(server);
                return Err(e);
            }
        };

        let conn = slot.connection.read().await;
        let conn = match conn.as_ref() {
            Some(c) => c,
            None => {
                self.breakers.record_failure(server);
                return Err(McpError::Transport("no live connection".into()));
            }
        };

        let result = conn
            .call("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await;

        match result {
            Ok(v) => {
                self.breakers.record_success(server);
                Ok(v)
            }
            Err(e) => {
                self.breakers.record_failure(server);
                Err(e)
            }
        }
    }

    /// The union of all servers' cached tool schemas, namespaced
    /// `mcp__<server>__<tool>` (§4.2 "tools/list returns the union...").
    pub async fn all_tools(&self) -> Vec<(String, ToolSchema)> {
        let mut out = Vec::new();
        for entry in self.servers.iter() {
            let name = entry.key().clone();
            let tools = entry.value().tools.read().await;
            for t in tools.iter() {
                out.push((format!("mcp__{name}__{}", t.name), t.clone()));
            }
        }
        out
    }

    pub fn breaker_state(&self, name: &str) -> Option<crate::breaker::BreakerState> {
        self.breakers.state(name)
    }

    /// §4.2 "auto-recovery probe every 15s while open" for core services.
    /// Spawns a background loop; intended to be started once at process
    /// startup alongside the scheduler.
    pub fn spawn_core_recovery_probes(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CORE_PROBE_INTERVAL).await;
                for name in registry.server_names() {
                    let is_core = registry
                        .servers
                        .get(&name)
                        .map(|s| s.descriptor.core_service)
                        .unwrap_or(false);
                    if !is_core {
                        continue;
                    }
                    if registry.breaker_state(&name) != Some(crate::breaker::BreakerState::Open) {
                        continue;
                    }
                    tracing::info!(server = %name, "probing core mcp server for recovery");
                    let _ = registry.call_tool(&name, "__probe__", json!({})).await;
                }
            }
        })
    }
}
