//! The Nexus Regulator's event taxonomy (spec §4.4): the wire shape of one
//! event in the stream the regulator multiplexes token chunks and
//! system-queue events onto.

use serde::Serialize;
use serde_json::Value;

/// One event in a Nexus dispatch stream. `#[serde(tag = "type")]` gives each
/// variant a `"type"` discriminant field matching the taxonomy's event
/// names, with the rest of the variant's fields flattened alongside it.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// One streamed token from the agent's LLM reply.
    Token { content: String },
    /// A tool invocation started; carries the tool name for UI feedback.
    ToolStart { call_id: String, tool: String },
    /// A tool invocation finished; carries the rendered output (or error text).
    ToolEnd {
        call_id: String,
        tool: String,
        ok: bool,
        output: String,
    },
    /// An out-of-band system status line (health probe result, breaker trip, etc).
    SystemStatus { message: String },
    /// A UI layer should update its active/opacity/visible state.
    LayerUpdate {
        layer: String,
        active: bool,
        opacity: f32,
        visible: bool,
    },
    /// A control-UI action's rendered result (menu, switch_mode, macro).
    ControlUi { action: String, output: String },
    /// A terminal error for the request.
    NexusError { message: String },
    /// The dispatch sequence has finished; no further events follow for this request.
    Done,
}

impl ProtocolEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
