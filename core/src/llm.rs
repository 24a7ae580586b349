//! LLM client abstraction (§4.5 "Agent Engine"): the seam the agent loop
//! calls through for one completion turn, with a streaming variant for the
//! Nexus Regulator's token multiplexing.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::tool_executor::ToolCall;

/// Tool choice mode for a chat completion: auto (model picks), none (no
/// tools), or required (must call at least one).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!(
                "unknown tool_choice: {s} (use auto, none, or required)"
            )),
        }
    }
}

/// Token usage for one LLM call, surfaced as a `Usage` protocol event when
/// streaming.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One streamed token (§4.4 event taxonomy `token`).
#[derive(Clone, Debug)]
pub struct MessageChunk {
    pub content: String,
}

/// Assistant content plus any tool calls requested for this turn.
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// External LLM seam (spec.md §1 explicitly excludes "the model inference
/// runtime itself"). `invoke` is the synchronous variant `agent_loop` needs;
/// `invoke_stream` backs `agent_stream`'s token events.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, String>;

    /// Default streaming behavior: call `invoke` and emit the whole reply as
    /// one chunk. Real streaming backends override this to forward tokens as
    /// they arrive.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, String> {
        let response = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx
                    .send(MessageChunk {
                        content: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }
}

/// Fixed-response stub for tests, and a workable degraded mode when no real
/// backend is configured.
pub struct MockLlm {
    pub content: String,
}

impl MockLlm {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, String> {
        Ok(LlmResponse {
            content: self.content.clone(),
            tool_calls: Vec::new(),
            usage: None,
        })
    }
}

/// OpenAI-compatible chat completions client (§6 "the router/gateway base
/// URLs"); talks to any server implementing the same wire format, which is
/// how this orchestrator reaches either a local router or a hosted gateway.
pub struct ChatOpenAI {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatOpenAI {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    fn to_wire(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| match m {
                Message::Tool {
                    content,
                    tool_call_id,
                } => serde_json::json!({
                    "role": "tool",
                    "content": content,
                    "tool_call_id": tool_call_id,
                }),
                other => serde_json::json!({
                    "role": other.role(),
                    "content": other.content(),
                }),
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, String> {
        let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(
            &serde_json::json!({
                "model": self.model,
                "messages": Self::to_wire(messages),
            }),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("llm request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("llm returned error status: {e}"))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("llm response was not valid json: {e}"))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = body.get("usage").map(|u| LlmUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(LlmResponse {
            content,
            tool_calls: Vec::new(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_mode_from_str_parses_known_values() {
        assert_eq!("auto".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Auto);
        assert_eq!("none".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::None);
        assert_eq!(
            "required".parse::<ToolChoiceMode>().unwrap(),
            ToolChoiceMode::Required
        );
    }

    #[test]
    fn tool_choice_mode_from_str_rejects_unknown_value() {
        let err = "unexpected".parse::<ToolChoiceMode>().unwrap_err();
        assert!(err.contains("unknown tool_choice"));
    }

    #[tokio::test]
    async fn default_invoke_stream_sends_single_chunk_when_enabled() {
        let llm = MockLlm::new("hello");
        let (tx, mut rx) = mpsc::channel(2);
        let resp = llm.invoke_stream(&[], Some(tx)).await.unwrap();
        assert_eq!(resp.content, "hello");
        let chunk = rx.recv().await.expect("one chunk");
        assert_eq!(chunk.content, "hello");
    }
}
