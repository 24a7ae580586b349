//! The Agent Engine (§4.5): interface only per the spec, modeled on the
//! teacher's ReAct runner collapsed from "one node in a graph" to "the
//! whole per-iteration loop" — build a system prompt, rank tools, call the
//! LLM, run any requested tool calls in parallel, append results, repeat up
//! to `max_tool_steps`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

use crate::llm::{LlmClient, LlmUsage, MessageChunk};
use crate::mcp::{McpRegistry, ToolSchema};
use crate::message::Message;
use crate::state_store::SqliteStateStore;
use crate::tool_executor::{ToolCall, ToolExecutor, ToolResultEnvelope};

pub const DEFAULT_MAX_TOOL_STEPS: u32 = 10;

/// One named, schema-carrying tool offered to the LLM, namespaced for
/// internal tools the same way MCP tools already are so the model sees one
/// flat list (§4.5 "get_all_tools").
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A completed, non-streaming run of the loop (§4.5 `agent_loop`).
pub struct Completion {
    pub message: Message,
    pub tool_calls_made: Vec<ToolResultEnvelope>,
    pub usage: Option<LlmUsage>,
}

/// §4.5's required surface. `agent_stream` isn't a trait method here — the
/// Nexus Regulator needs to multiplex it against its system-event queue
/// (§4.4 step 9), so streaming is implemented as a free function
/// ([`stream_agent`]) the regulator can `select!` alongside its own queue,
/// rather than an opaque boxed stream hidden behind the trait object.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    async fn agent_loop(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        request_id: &str,
    ) -> Result<Completion, String>;

    async fn get_all_tools(&self, messages: Option<&[Message]>) -> Vec<ToolDescriptor>;

    async fn get_system_prompt(&self, messages: Option<&[Message]>) -> String;

    async fn execute_tool_call(&self, call: ToolCall, request_id: &str) -> ToolResultEnvelope;
}

/// Reference implementation driving one external [`LlmClient`] through the
/// tool-calling loop (§4.5's per-iteration contract).
pub struct ReactEngine {
    llm: Arc<dyn LlmClient>,
    tool_executor: Arc<ToolExecutor>,
    mcp: Arc<McpRegistry>,
    state_store: Arc<SqliteStateStore>,
    max_tool_steps: u32,
}

impl ReactEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tool_executor: Arc<ToolExecutor>,
        mcp: Arc<McpRegistry>,
        state_store: Arc<SqliteStateStore>,
    ) -> Self {
        Self {
            llm,
            tool_executor,
            mcp,
            state_store,
            max_tool_steps: DEFAULT_MAX_TOOL_STEPS,
        }
    }

    pub fn with_max_tool_steps(mut self, max_tool_steps: u32) -> Self {
        self.max_tool_steps = max_tool_steps;
        self
    }

    /// Ranks and filters the flat MCP+internal tool list (§4.5 "select/rank
    /// tools (deprecated tools filtered unless core)"). A tool is "core"
    /// (kept even if deprecated) when it has no `tool_rating` row at all —
    /// ratings only accrue once a tool has actually been used and evaluated,
    /// so an unrated tool is assumed to still be load-bearing.
    async fn ranked_tools(&self, mcp_tools: Vec<(String, ToolSchema)>) -> Vec<ToolDescriptor> {
        let mut descriptors = Vec::with_capacity(mcp_tools.len());
        for (server, schema) in mcp_tools {
            let name = format!("mcp__{server}__{}", schema.name);
            let rating = self.state_store.tool_rating_get(&name).await.ok().flatten();
            if rating.as_ref().is_some_and(|r| r.deprecated) {
                continue;
            }
            descriptors.push(ToolDescriptor {
                name,
                description: schema.description,
                input_schema: schema.input_schema,
            });
        }
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

#[async_trait]
impl AgentEngine for ReactEngine {
    async fn agent_loop(
        &self,
        mut messages: Vec<Message>,
        _model: Option<String>,
        request_id: &str,
    ) -> Result<Completion, String> {
        let mut tool_calls_made = Vec::new();
        let mut usage = None;

        for _ in 0..self.max_tool_steps {
            let response = self.llm.invoke(&messages).await?;
            usage = response.usage.or(usage);

            if response.tool_calls.is_empty() {
                return Ok(Completion {
                    message: Message::assistant(response.content),
                    tool_calls_made,
                    usage,
                });
            }

            messages.push(Message::assistant(response.content));

            // §4.5 "execute them in parallel (subject to tool-specific rate
            // limits)"; rate limiting lives in the Tool Executor's per-tool
            // retry/backoff, not here.
            let results = join_all(
                response
                    .tool_calls
                    .into_iter()
                    .map(|call| self.execute_tool_call(call, request_id)),
            )
            .await;

            for envelope in results {
                let content = envelope
                    .result
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| envelope.error.clone().unwrap_or_default());
                messages.push(Message::tool(content, envelope.tool.clone()));
                tool_calls_made.push(envelope);
            }
        }

        Err(format!(
            "exceeded max_tool_steps ({}) without a final assistant message",
            self.max_tool_steps
        ))
    }

    async fn get_all_tools(&self, _messages: Option<&[Message]>) -> Vec<ToolDescriptor> {
        self.ranked_tools(self.mcp.all_tools().await).await
    }

    async fn get_system_prompt(&self, _messages: Option<&[Message]>) -> String {
        "You are an autonomous agent with access to a knowledge base and a set of tools. \
         Use tools when they help answer the request; otherwise answer directly."
            .to_string()
    }

    async fn execute_tool_call(&self, call: ToolCall, request_id: &str) -> ToolResultEnvelope {
        self.tool_executor.execute(call, request_id).await.0
    }
}

/// Streams one `agent_loop` iteration's worth of tokens through `chunk_tx`
/// (§4.4 step 9's token half of the Nexus multiplex); the Regulator awaits
/// this concurrently against its system-event queue.
pub async fn stream_agent(
    llm: &dyn LlmClient,
    messages: &[Message],
    chunk_tx: tokio::sync::mpsc::Sender<MessageChunk>,
) -> Result<crate::llm::LlmResponse, String> {
    llm.invoke_stream(messages, Some(chunk_tx)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::memory_client::{HttpIngestSink, MemoryClient};

    async fn engine() -> ReactEngine {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStateStore::new(dir.path().join("state.db")).unwrap());
        let mcp = Arc::new(McpRegistry::new());
        let memory = Arc::new(MemoryClient::new(Arc::clone(&store), Arc::new(HttpIngestSink::new(""))));
        let tool_executor = Arc::new(ToolExecutor::new(Arc::clone(&mcp), memory));
        ReactEngine::new(Arc::new(MockLlm::new("final answer")), tool_executor, mcp, store)
    }

    #[tokio::test]
    async fn loop_returns_final_message_when_no_tool_calls() {
        let engine = engine().await;
        let completion = engine
            .agent_loop(vec![Message::user("hi")], None, "req-1")
            .await
            .unwrap();
        assert_eq!(completion.message.content(), "final answer");
        assert!(completion.tool_calls_made.is_empty());
    }

    #[tokio::test]
    async fn get_all_tools_is_empty_with_no_mcp_servers_registered() {
        let engine = engine().await;
        assert!(engine.get_all_tools(None).await.is_empty());
    }
}
