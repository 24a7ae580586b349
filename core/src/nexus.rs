//! The Nexus Regulator (§4.4): the single entry point for chat input. Runs
//! the nine-step dispatch algorithm against a user message and emits a
//! sequence of [`ProtocolEvent`]s (§4.4 "Event taxonomy"), short-circuiting
//! to a trigger action or the intent classifier when possible and otherwise
//! handing over to the Agent Engine's token stream multiplexed against a
//! system-event queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use stream_event::ProtocolEvent;

use crate::agent::{stream_agent, AgentEngine};
use crate::llm::{LlmClient, MessageChunk};
use crate::message::Message;
use crate::tool_executor::{InternalToolCall, ToolCall, ToolExecutor};

/// §3 "Nexus Layer State": one of four UI layers tracked by the regulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Chat,
    System,
    Emoji,
    UiControl,
}

impl Layer {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "chat" => Some(Layer::Chat),
            "system" => Some(Layer::System),
            "emoji" => Some(Layer::Emoji),
            "ui_control" => Some(Layer::UiControl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LayerState {
    pub active: bool,
    pub opacity: f32,
    pub visible: bool,
}

impl Default for LayerState {
    fn default() -> Self {
        Self {
            active: true,
            opacity: 1.0,
            visible: true,
        }
    }
}

/// `{chat, system, emoji, ui_control} -> {active, opacity, visible}`.
pub struct NexusLayerState {
    layers: RwLock<HashMap<Layer, LayerState>>,
}

impl Default for NexusLayerState {
    fn default() -> Self {
        let mut layers = HashMap::new();
        layers.insert(Layer::Chat, LayerState::default());
        layers.insert(Layer::System, LayerState::default());
        layers.insert(Layer::Emoji, LayerState::default());
        layers.insert(Layer::UiControl, LayerState::default());
        Self {
            layers: RwLock::new(layers),
        }
    }
}

impl NexusLayerState {
    pub async fn get(&self, layer: Layer) -> LayerState {
        self.layers
            .read()
            .await
            .get(&layer)
            .copied()
            .unwrap_or_default()
    }

    pub async fn set_active(&self, layer: Layer, active: bool) {
        self.layers.write().await.entry(layer).or_default().active = active;
    }
}

/// §6 "Trigger-registry schema" `action_type`. `Diagnostic` is the dispatch
/// algorithm's step-5 kind; it isn't in the worked trigger-schema examples
/// but is a legitimate seventh action kind the registry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToolCall,
    ControlUi,
    Menu,
    SystemPrompt,
    UiLayer,
    Macro,
    SwitchMode,
    Diagnostic,
}

/// One `(regex, action)` rule (§6 "Trigger-registry schema", GLOSSARY
/// "Trigger").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEntry {
    pub pattern: String,
    pub action_type: ActionType,
    pub action_data: Value,
    pub description: String,
    #[serde(skip)]
    compiled: Option<()>,
}

impl TriggerEntry {
    pub fn new(
        pattern: impl Into<String>,
        action_type: ActionType,
        action_data: Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            action_type,
            action_data,
            description: description.into(),
            compiled: None,
        }
    }
}

/// The declarative trigger registry consulted before any LLM call (§4.4
/// step 3). Regexes are compiled lazily and cached alongside the entry so
/// hot-reload (re-`register`ing the whole set) doesn't pay recompilation on
/// every message.
#[derive(Default)]
pub struct TriggerRegistry {
    entries: RwLock<Vec<(Regex, TriggerEntry)>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole registry, e.g. on hot-reload from disk/DB.
    /// Entries whose pattern fails to compile are dropped with a warning
    /// rather than poisoning the whole registry.
    pub async fn load(&self, entries: Vec<TriggerEntry>) {
        let mut compiled = Vec::with_capacity(entries.len());
        for entry in entries {
            match Regex::new(&format!("(?i){}", entry.pattern)) {
                Ok(re) => compiled.push((re, entry)),
                Err(e) => tracing::warn!(pattern = %entry.pattern, error = %e, "invalid trigger pattern, dropping"),
            }
        }
        *self.entries.write().await = compiled;
    }

    /// First match wins (§4.4 step 3), case-insensitive.
    pub async fn match_message(&self, message: &str) -> Option<TriggerEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, entry)| entry.clone())
    }
}

/// One entry of an `auto_execute` intent plan.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoExecuteStep {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// The fast local classifier's verdict (§4.4 step 8).
#[derive(Debug, Clone)]
pub enum Intent {
    Prompt,
    Help,
    Restart,
    Emoji,
    DisableLayer(Layer),
    EnableLayer(Layer),
    AutoExecute(Vec<AutoExecuteStep>),
}

/// A fast local model used only for intent classification, distinct from
/// the (possibly much larger) LLM the Agent Engine drives (§4.4 step 8
/// "call a fast local LLM to classify the query").
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<Intent, String>;
}

/// Degrades to `Prompt` (hand everything to the agent engine) when no real
/// local classifier is wired up; a conservative default, not a denial like
/// the Sentinel's (misclassifying as "just a prompt" is safe — it reaches
/// the full agent loop rather than silently dropping the message).
pub struct AlwaysPromptClassifier;

#[async_trait]
impl IntentClassifier for AlwaysPromptClassifier {
    async fn classify(&self, _message: &str) -> Result<Intent, String> {
        Ok(Intent::Prompt)
    }
}

const TRIVIAL_MAX_WORDS: usize = 4;
const ACTION_VERBS: &[&str] = &[
    "run", "create", "analyze", "search", "find", "show", "list", "get", "execute", "calculate",
];
const COMMAND_VERBS: &[&str] = &[
    "add", "install", "update", "remove", "delete", "create", "start", "stop", "restart",
    "enable", "disable",
];
const TRIVIAL_GREETING: &str = "Hey! What can I help you with?";
const RECENT_MESSAGES_CAPACITY: usize = 5;

fn is_trivial_short_circuit(message: &str, has_prior_context: bool) -> bool {
    let words: Vec<&str> = message.split_whitespace().collect();
    if words.len() > TRIVIAL_MAX_WORDS || has_prior_context {
        return false;
    }
    let lower = message.to_lowercase();
    !ACTION_VERBS.iter().any(|v| lower.contains(v))
}

fn starts_with_command_verb(message: &str) -> bool {
    let lower = message.trim().to_lowercase();
    COMMAND_VERBS
        .iter()
        .any(|v| lower.starts_with(v) && {
            lower[v.len()..].chars().next().map_or(true, |c| c.is_whitespace())
        })
}

/// Per-session state consulted read-only by step 1 (§SPEC_FULL §4.4
/// supplement: "a rolling last N user messages ring used only to decide the
/// 'no prior context' condition").
pub struct NexusState {
    recent_user_messages: RwLock<VecDeque<String>>,
}

impl Default for NexusState {
    fn default() -> Self {
        Self {
            recent_user_messages: RwLock::new(VecDeque::with_capacity(RECENT_MESSAGES_CAPACITY)),
        }
    }
}

impl NexusState {
    pub fn new() -> Self {
        Self::default()
    }

    async fn has_prior_context(&self) -> bool {
        !self.recent_user_messages.read().await.is_empty()
    }

    async fn record(&self, message: &str) {
        let mut ring = self.recent_user_messages.write().await;
        if ring.len() == RECENT_MESSAGES_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(message.to_string());
    }
}

/// The Nexus Regulator (§4.4, §2 L4): owns the trigger registry and layer
/// state, and dispatches one user message at a time into an event stream.
pub struct NexusRegulator {
    triggers: Arc<TriggerRegistry>,
    layers: Arc<NexusLayerState>,
    classifier: Arc<dyn IntentClassifier>,
    agent: Arc<dyn AgentEngine>,
    tool_executor: Arc<ToolExecutor>,
    llm: Arc<dyn LlmClient>,
    state: Arc<NexusState>,
}

impl NexusRegulator {
    pub fn new(
        agent: Arc<dyn AgentEngine>,
        tool_executor: Arc<ToolExecutor>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            triggers: Arc::new(TriggerRegistry::new()),
            layers: Arc::new(NexusLayerState::default()),
            classifier: Arc::new(AlwaysPromptClassifier),
            agent,
            tool_executor,
            llm,
            state: Arc::new(NexusState::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn triggers(&self) -> &Arc<TriggerRegistry> {
        &self.triggers
    }

    pub fn layers(&self) -> &Arc<NexusLayerState> {
        &self.layers
    }

    /// Runs the nine-step dispatch algorithm (§4.4) for one user message,
    /// returning a channel the caller drains for the event sequence.
    /// `system_events` is the asynchronous system-event queue step 2/9
    /// multiplex against; pass an already-closed channel when there is none
    /// pending for this request.
    pub fn dispatch(
        self: &Arc<Self>,
        request_id: String,
        messages: Vec<Message>,
        user_message: String,
        mut system_events: mpsc::Receiver<ProtocolEvent>,
    ) -> mpsc::Receiver<ProtocolEvent> {
        let (tx, rx) = mpsc::channel(128);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_dispatch(request_id, messages, user_message, &mut system_events, &tx)
                .await;
            let _ = tx.send(ProtocolEvent::Done).await;
        });
        rx
    }

    async fn run_dispatch(
        &self,
        request_id: String,
        mut messages: Vec<Message>,
        user_message: String,
        system_events: &mut mpsc::Receiver<ProtocolEvent>,
        tx: &mpsc::Sender<ProtocolEvent>,
    ) {
        // Step 1: trivial conversational short-circuit.
        let has_prior_context = self.state.has_prior_context().await;
        if is_trivial_short_circuit(&user_message, has_prior_context) {
            self.state.record(&user_message).await;
            let _ = tx
                .send(ProtocolEvent::Token {
                    content: TRIVIAL_GREETING.to_string(),
                })
                .await;
            return;
        }
        self.state.record(&user_message).await;

        // Step 2: drain any already-queued system events for this request
        // without blocking on further ones.
        while let Ok(event) = system_events.try_recv() {
            let _ = tx.send(event).await;
        }

        // Step 3: trigger match, first wins.
        if let Some(trigger) = self.triggers.match_message(&user_message).await {
            if self
                .dispatch_trigger(&request_id, trigger, &mut messages, tx)
                .await
            {
                return;
            }
        } else if starts_with_command_verb(&user_message) {
            // Step 7.
            tracing::warn!(message = %user_message, request_id, "potential trigger miss");
        }

        // Step 8: intent classifier fallback.
        match self.classifier.classify(&user_message).await {
            Ok(Intent::Prompt) => {}
            Ok(intent) => {
                self.dispatch_intent(&request_id, intent, tx).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "intent classifier failed, falling through to agent handover");
            }
        }

        // Step 9: agent handover, multiplexing the token stream against the
        // system-event queue.
        self.agent_handover(messages, system_events, tx).await;
    }

    /// Steps 4-6: act on a matched trigger. Returns `true` if the dispatch
    /// sequence is complete (no further steps should run).
    async fn dispatch_trigger(
        &self,
        request_id: &str,
        trigger: TriggerEntry,
        messages: &mut Vec<Message>,
        tx: &mpsc::Sender<ProtocolEvent>,
    ) -> bool {
        match trigger.action_type {
            ActionType::UiLayer => {
                let layer_name = trigger
                    .action_data
                    .get("layer")
                    .and_then(|v| v.as_str())
                    .unwrap_or("chat");
                let Some(layer) = Layer::parse(layer_name) else {
                    let _ = tx
                        .send(ProtocolEvent::SystemStatus {
                            message: format!("unknown layer: {layer_name}"),
                        })
                        .await;
                    return true;
                };
                let state = self.layers.get(layer).await;
                if !state.active {
                    let _ = tx
                        .send(ProtocolEvent::SystemStatus {
                            message: format!("{layer_name} layer is inactive"),
                        })
                        .await;
                } else {
                    let _ = tx
                        .send(ProtocolEvent::LayerUpdate {
                            layer: layer_name.to_string(),
                            active: state.active,
                            opacity: state.opacity,
                            visible: state.visible,
                        })
                        .await;
                }
                true
            }
            ActionType::Diagnostic => {
                let call_id = uuid::Uuid::new_v4().to_string();
                let tool = trigger
                    .action_data
                    .get("tool")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&trigger.description)
                    .to_string();
                let _ = tx
                    .send(ProtocolEvent::ToolStart {
                        call_id: call_id.clone(),
                        tool: tool.clone(),
                    })
                    .await;
                let output = trigger
                    .action_data
                    .get("output")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&trigger.description)
                    .to_string();
                let _ = tx
                    .send(ProtocolEvent::ToolEnd {
                        call_id,
                        tool,
                        ok: true,
                        output,
                    })
                    .await;
                true
            }
            ActionType::ToolCall | ActionType::ControlUi | ActionType::Menu => {
                let call_id = uuid::Uuid::new_v4().to_string();
                let tool_name = trigger
                    .action_data
                    .get("tool")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let _ = tx
                    .send(ProtocolEvent::ToolStart {
                        call_id: call_id.clone(),
                        tool: tool_name.clone(),
                    })
                    .await;

                let output = match trigger.action_type {
                    ActionType::ToolCall => {
                        match build_internal_call(&tool_name, trigger.action_data.get("args")) {
                            Ok(call) => {
                                let envelope = self
                                    .tool_executor
                                    .execute(ToolCall::Internal(call), request_id)
                                    .await
                                    .0;
                                format_envelope(&envelope)
                            }
                            Err(e) => e,
                        }
                    }
                    _ => trigger
                        .action_data
                        .get("output")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&trigger.description)
                        .to_string(),
                };

                let _ = tx
                    .send(ProtocolEvent::ToolEnd {
                        call_id,
                        tool: tool_name.clone(),
                        ok: true,
                        output: output.clone(),
                    })
                    .await;

                // Inject a synthesized system-role message into the
                // conversation so the LLM, if invoked next, is aware of
                // what just happened, then fall through to the classifier
                // and agent handover rather than stopping here.
                messages.push(Message::system(format!(
                    "[trigger:{tool_name}] {output}"
                )));
                false
            }
            ActionType::SystemPrompt => {
                messages.push(Message::system(
                    trigger
                        .action_data
                        .get("prompt")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&trigger.description)
                        .to_string(),
                ));
                false
            }
            ActionType::Macro | ActionType::SwitchMode => {
                let _ = tx
                    .send(ProtocolEvent::ControlUi {
                        action: trigger.description.clone(),
                        output: trigger
                            .action_data
                            .get("output")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .await;
                true
            }
        }
    }

    async fn dispatch_intent(
        &self,
        request_id: &str,
        intent: Intent,
        tx: &mpsc::Sender<ProtocolEvent>,
    ) {
        match intent {
            Intent::Prompt => unreachable!("Prompt is handled by the caller before this point"),
            Intent::Help => {
                let _ = tx
                    .send(ProtocolEvent::Token {
                        content: "Ask me to run a tool, search your notes, or just chat."
                            .to_string(),
                    })
                    .await;
            }
            Intent::Restart => {
                let _ = tx
                    .send(ProtocolEvent::ControlUi {
                        action: "restart".to_string(),
                        output: "restart requested".to_string(),
                    })
                    .await;
            }
            Intent::Emoji => {
                let state = self.layers.get(Layer::Emoji).await;
                let _ = tx
                    .send(ProtocolEvent::LayerUpdate {
                        layer: "emoji".to_string(),
                        active: state.active,
                        opacity: state.opacity,
                        visible: state.visible,
                    })
                    .await;
            }
            Intent::DisableLayer(layer) => {
                self.layers.set_active(layer, false).await;
                let _ = tx
                    .send(ProtocolEvent::SystemStatus {
                        message: format!("{layer:?} layer disabled"),
                    })
                    .await;
            }
            Intent::EnableLayer(layer) => {
                self.layers.set_active(layer, true).await;
                let _ = tx
                    .send(ProtocolEvent::SystemStatus {
                        message: format!("{layer:?} layer enabled"),
                    })
                    .await;
            }
            Intent::AutoExecute(steps) => {
                for step in steps {
                    let call_id = uuid::Uuid::new_v4().to_string();
                    let _ = tx
                        .send(ProtocolEvent::ToolStart {
                            call_id: call_id.clone(),
                            tool: step.tool.clone(),
                        })
                        .await;
                    let output = match build_internal_call(&step.tool, Some(&step.args)) {
                        Ok(call) => {
                            let envelope = self
                                .tool_executor
                                .execute(ToolCall::Internal(call), request_id)
                                .await
                                .0;
                            format_envelope(&envelope)
                        }
                        Err(e) => e,
                    };
                    let _ = tx
                        .send(ProtocolEvent::ToolEnd {
                            call_id,
                            tool: step.tool,
                            ok: true,
                            output,
                        })
                        .await;
                }
            }
        }
    }

    /// Step 9: races the agent's token stream against the system-event
    /// queue, scheduling the next await on whichever source didn't just
    /// produce, until the agent stream finishes (§4.4, §9 "bounded-channel
    /// select, not two awaitable futures racing").
    async fn agent_handover(
        &self,
        messages: Vec<Message>,
        system_events: &mut mpsc::Receiver<ProtocolEvent>,
        tx: &mpsc::Sender<ProtocolEvent>,
    ) {
        let system_prompt = self.agent.get_system_prompt(Some(&messages)).await;
        let mut full_messages = vec![Message::system(system_prompt)];
        full_messages.extend(messages);

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<MessageChunk>(128);
        let llm = Arc::clone(&self.llm);
        let agent_task = tokio::spawn(async move { stream_agent(llm.as_ref(), &full_messages, chunk_tx).await });

        let mut agent_done = false;
        let mut chunks_done = false;
        loop {
            if agent_done && chunks_done {
                break;
            }
            tokio::select! {
                chunk = chunk_rx.recv(), if !chunks_done => {
                    match chunk {
                        Some(c) => {
                            let _ = tx.send(ProtocolEvent::Token { content: c.content }).await;
                        }
                        None => chunks_done = true,
                    }
                }
                event = system_events.recv(), if !agent_done => {
                    if let Some(event) = event {
                        let _ = tx.send(event).await;
                    }
                }
                else => {}
            }
            if !agent_done && agent_task.is_finished() {
                agent_done = true;
            }
        }

        if let Ok(Err(e)) = agent_task.await {
            let _ = tx.send(ProtocolEvent::NexusError { message: e }).await;
        }
    }
}

/// Parses a trigger/auto-execute `{tool, args}` pair into a typed
/// [`InternalToolCall`]. Unknown tool names (e.g. an MCP tool a trigger
/// wants to invoke) are rejected here — trigger-driven calls only ever
/// target internal tools in this implementation, matching §4.4's worked
/// example (`get_system_status`).
fn build_internal_call(tool: &str, args: Option<&Value>) -> Result<InternalToolCall, String> {
    let args = args.cloned().unwrap_or(Value::Null);
    let mut tagged = args;
    if let Value::Object(ref mut map) = tagged {
        map.insert("tool".to_string(), Value::String(tool.to_string()));
    } else {
        tagged = serde_json::json!({ "tool": tool });
    }
    serde_json::from_value(tagged)
        .map_err(|e| format!("unknown or malformed internal tool '{tool}': {e}"))
}

fn format_envelope(envelope: &crate::tool_executor::ToolResultEnvelope) -> String {
    if envelope.ok {
        envelope
            .result
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default()
    } else {
        envelope.error.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::mcp::McpRegistry;
    use crate::memory_client::{HttpIngestSink, MemoryClient};
    use crate::state_store::SqliteStateStore;

    fn test_regulator(reply: &str) -> Arc<NexusRegulator> {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStateStore::new(dir.path().join("state.db")).unwrap());
        let mcp = Arc::new(McpRegistry::new());
        let memory = Arc::new(MemoryClient::new(
            Arc::clone(&store),
            Arc::new(HttpIngestSink::new("")),
        ));
        let tool_executor = Arc::new(ToolExecutor::new(Arc::clone(&mcp), memory));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlm::new(reply));
        let agent = Arc::new(crate::agent::ReactEngine::new(
            Arc::clone(&llm),
            Arc::clone(&tool_executor),
            mcp,
            store,
        ));
        Arc::new(NexusRegulator::new(agent, tool_executor, llm))
    }

    async fn collect(rx: &mut mpsc::Receiver<ProtocolEvent>) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, ProtocolEvent::Done);
            out.push(event);
            if done {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn trivial_short_circuit_emits_fixed_greeting_and_stops() {
        let regulator = test_regulator("should not be reached");
        let (_etx, erx) = mpsc::channel(1);
        let mut rx = regulator.dispatch("req-1".into(), vec![], "hi".into(), erx);
        let events = collect(&mut rx).await;
        assert!(matches!(
            &events[0],
            ProtocolEvent::Token { content } if content == TRIVIAL_GREETING
        ));
        assert!(matches!(events.last(), Some(ProtocolEvent::Done)));
        assert_eq!(events.len(), 2, "greeting then done, no agent call");
    }

    #[tokio::test]
    async fn trigger_hit_emits_tool_start_and_tool_end() {
        let regulator = test_regulator("unused");
        regulator
            .triggers()
            .load(vec![TriggerEntry::new(
                "^status$",
                ActionType::ToolCall,
                serde_json::json!({"tool": "get_system_status"}),
                "report system status",
            )])
            .await;
        let (_etx, erx) = mpsc::channel(1);
        let mut rx = regulator.dispatch("req-2".into(), vec![], "status".into(), erx);
        let events = collect(&mut rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::ToolStart { tool, .. } if tool == "get_system_status")));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::ToolEnd { tool, ok: true, .. } if tool == "get_system_status")));
    }

    #[tokio::test]
    async fn no_trigger_falls_through_to_agent_handover() {
        let regulator = test_regulator("final answer from agent");
        let (_etx, erx) = mpsc::channel(1);
        let mut rx = regulator.dispatch(
            "req-3".into(),
            vec![],
            "tell me something interesting about rust ownership".into(),
            erx,
        );
        let events = collect(&mut rx).await;
        assert!(events.iter().any(
            |e| matches!(e, ProtocolEvent::Token { content } if content.contains("final answer"))
        ));
    }

    #[tokio::test]
    async fn ui_layer_trigger_reports_inactive_layer_as_status() {
        let regulator = test_regulator("unused");
        regulator.layers().set_active(Layer::Emoji, false).await;
        regulator
            .triggers()
            .load(vec![TriggerEntry::new(
                "^emoji$",
                ActionType::UiLayer,
                serde_json::json!({"layer": "emoji"}),
                "toggle emoji layer",
            )])
            .await;
        let (_etx, erx) = mpsc::channel(1);
        let mut rx = regulator.dispatch("req-4".into(), vec![], "emoji".into(), erx);
        let events = collect(&mut rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ProtocolEvent::SystemStatus { message } if message.contains("inactive"))));
    }
}
