//! Stream event protocol: the Nexus Regulator's event taxonomy (spec §4.4)
//! plus request-id envelope injection for correlating stream frames back to
//! their originating HTTP request (spec §6). Has no dependency on
//! `orchestrator-core` so either side can evolve independently of the wire
//! format.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::ProtocolEvent;
