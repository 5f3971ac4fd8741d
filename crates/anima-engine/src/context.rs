use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use anima_core::event::EventBus;
use anima_core::types::{ChatMessage, CognitiveMode, RunId, SessionId};

/// Ambient, run-scoped state visible to every node in one graph execution.
///
/// The common fields are typed; `scratch` is the explicit extension map for
/// loop-scoped keys (the scratchpad accumulator and similar). A context is
/// owned by exactly one run and never shared across concurrent runs.
pub struct RunContext {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub user_id: String,
    pub mode: CognitiveMode,
    pub history: Vec<ChatMessage>,
    pub cancel: CancellationToken,
    pub events: Arc<EventBus>,
    scratch: HashMap<String, Value>,
}

impl RunContext {
    pub fn new(session_id: SessionId, user_id: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            session_id,
            user_id: user_id.into(),
            mode: CognitiveMode::default(),
            history: Vec::new(),
            cancel: CancellationToken::new(),
            events: Arc::new(EventBus::default()),
            scratch: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: CognitiveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn scratch(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    pub fn set_scratch(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    pub fn take_scratch(&mut self, key: &str) -> Option<Value> {
        self.scratch.remove(key)
    }

    /// Resolve an unconnected input slot from the ambient fields by
    /// well-known name, falling back to the scratch extension map.
    pub fn ambient(&self, slot: &str) -> Option<Value> {
        match slot {
            "session_id" => Some(Value::String(self.session_id.0.clone())),
            "user_id" => Some(Value::String(self.user_id.clone())),
            "mode" => Some(Value::String(self.mode.as_str().to_string())),
            "history" => serde_json::to_value(&self.history).ok(),
            _ => self.scratch.get(slot).cloned(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("mode", &self.mode)
            .field("history_len", &self.history.len())
            .field("scratch_keys", &self.scratch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ambient_resolves_typed_fields() {
        let ctx = RunContext::new(SessionId::from_str("sess-1"), "ada")
            .with_mode(CognitiveMode::Drift);

        assert_eq!(ctx.ambient("session_id"), Some(json!("sess-1")));
        assert_eq!(ctx.ambient("user_id"), Some(json!("ada")));
        assert_eq!(ctx.ambient("mode"), Some(json!("drift")));
        assert_eq!(ctx.ambient("unset_key"), None);
    }

    #[test]
    fn ambient_falls_back_to_scratch() {
        let mut ctx = RunContext::new(SessionId::new(), "ada");
        ctx.set_scratch("react.iteration", json!(4));
        assert_eq!(ctx.ambient("react.iteration"), Some(json!(4)));
    }

    #[test]
    fn scratch_take_removes() {
        let mut ctx = RunContext::new(SessionId::new(), "ada");
        ctx.set_scratch("tmp", json!("x"));
        assert_eq!(ctx.take_scratch("tmp"), Some(json!("x")));
        assert!(ctx.scratch("tmp").is_none());
    }

    #[test]
    fn history_is_ambient() {
        let ctx = RunContext::new(SessionId::new(), "ada")
            .with_history(vec![ChatMessage::user("hi")]);
        let history = ctx.ambient("history").unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);
    }
}
