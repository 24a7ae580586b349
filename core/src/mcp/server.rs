//! MCP Server Descriptor (§3): the declarative registration record for one
//! external tool server plus the ordered tool-schema cache discovered at
//! handshake.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub transport: TransportKind,
    /// Only meaningful for `TransportKind::Remote`.
    pub url: Option<String>,
    pub enabled: bool,
    pub core_service: bool,
}

impl McpServerDescriptor {
    /// §4.2 "Handshake ... await reply <= 20s (15s for non-core)".
    pub fn handshake_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(if self.core_service { 20 } else { 15 })
    }
}
