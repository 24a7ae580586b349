//! `POST /v1/chat/completions` (§6): the core's single chat entry point,
//! routed through the Nexus Regulator's dispatch algorithm (§4.4) and
//! rendered back as an OpenAI-compatible completion object.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use orchestrator_core::message::Message;
use stream_event::ProtocolEvent;

use crate::app::AppState;
use crate::response::ApiError;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Incoming wire message: looser than [`Message`] (no `tool_call_id`
/// requirement on a `tool` role) since external callers are OpenAI clients,
/// not our own agent loop.
#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        match w.role.as_str() {
            "system" => Message::system(w.content),
            "assistant" => Message::assistant(w.content),
            _ => Message::user(w.content),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: WireReply,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct WireReply {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{:08x}", uuid::Uuid::new_v4().as_u128() as u32))
}

pub async fn completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatCompletion>, ApiError> {
    if body.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    let request_id = request_id_from_headers(&headers);
    let model = body.model.clone().unwrap_or_else(|| "default".to_string());

    let user_message = body
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let messages: Vec<Message> = body.messages.into_iter().map(Message::from).collect();

    // No system-event queue pending for a fresh HTTP request; pass an
    // already-empty channel so step 2 of the dispatch algorithm finds
    // nothing queued and falls through immediately.
    let (_system_tx, system_rx) = mpsc::channel::<ProtocolEvent>(1);
    let mut rx = state
        .nexus
        .dispatch(request_id.clone(), messages, user_message, system_rx);

    let mut reply = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            ProtocolEvent::Token { content } => reply.push_str(&content),
            ProtocolEvent::ToolEnd { output, .. } => reply.push_str(&output),
            ProtocolEvent::ControlUi { output, .. } => reply.push_str(&output),
            ProtocolEvent::SystemStatus { message } => reply.push_str(&message),
            ProtocolEvent::NexusError { message } => {
                return Err(ApiError {
                    status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    kind: "nexus",
                    message,
                });
            }
            ProtocolEvent::Done | ProtocolEvent::ToolStart { .. } | ProtocolEvent::LayerUpdate { .. } => {}
        }
    }

    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(Json(ChatCompletion {
        id: request_id,
        object: "chat.completion",
        created,
        model,
        choices: vec![Choice {
            index: 0,
            message: WireReply {
                role: "assistant",
                content: reply,
            },
            finish_reason: "stop",
        }],
    }))
}

/// Exposed for tests that want the raw `{"error": {...}}` shape without
/// standing up a full server.
pub fn error_envelope(kind: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "kind": kind, "message": message } })
}
