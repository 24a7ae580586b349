//! Conversation message type shared by the agent engine, LLM client, and the
//! OpenAI-compatible chat completions surface.

use serde::{Deserialize, Serialize};

/// One turn in a conversation. Tool results are carried as `Tool` messages so
/// the model can react to them on the next iteration (§7 "Propagation policy").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    Tool { content: String, tool_call_id: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role_and_content() {
        let m = Message::user("hi");
        assert_eq!(m.role(), "user");
        assert_eq!(m.content(), "hi");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let m = Message::tool("42", "call-1");
        assert_eq!(m.role(), "tool");
        match m {
            Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "call-1"),
            _ => panic!("expected tool message"),
        }
    }
}
