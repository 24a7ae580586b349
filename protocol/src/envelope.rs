//! Envelope carried alongside every [`ProtocolEvent`] so a client can
//! correlate SSE/stream frames back to the HTTP request that produced them
//! (spec §6 `X-Request-ID`).

use crate::event::ProtocolEvent;
use serde_json::Value;

/// `request_id` is constant for a stream; `event_id` is a per-stream
/// monotonic sequence number.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    pub request_id: Option<String>,
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.request_id {
            obj.entry("request_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Tracks the next `event_id` to assign for one request's stream.
pub struct EnvelopeState {
    pub request_id: String,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            next_event_id: 1,
        }
    }

    /// Injects envelope into the event value and advances the sequence.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_request_id(&self.request_id)
            .with_event_id(self.next_event_id);
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts a protocol event to JSON and injects envelope using the given state.
pub fn to_json(
    event: &ProtocolEvent,
    state: &mut EnvelopeState,
) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_sets_request_and_event_id() {
        let mut obj = serde_json::json!({"type":"token","content":"hi"});
        let env = Envelope::new().with_request_id("req-1").with_event_id(1);
        env.inject_into(&mut obj);
        assert_eq!(obj["request_id"], "req-1");
        assert_eq!(obj["event_id"], 1);
        assert_eq!(obj["type"], "token");
    }

    #[test]
    fn to_json_advances_event_id_across_calls() {
        let mut state = EnvelopeState::new("req-123".to_string());
        let first = to_json(&ProtocolEvent::Token { content: "a".into() }, &mut state).unwrap();
        let second = to_json(&ProtocolEvent::Done, &mut state).unwrap();
        assert_eq!(first["event_id"], 1);
        assert_eq!(second["event_id"], 2);
        assert_eq!(first["request_id"], "req-123");
    }
}
