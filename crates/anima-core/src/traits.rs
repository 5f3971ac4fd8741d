use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::desire::{Desire, OutcomeReview, Plan};
use crate::error::Result;
use crate::types::{ChatMessage, ErrorClass, ScratchpadEntry};

/// Options for a single model call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Response from the model router.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
}

/// Model router — resolves a logical role ("persona", "planner", "coder")
/// to a concrete inference backend and calls it. The registry behind this
/// trait lives outside the cognition core.
pub trait ModelRouter: Send + Sync + 'static {
    fn call_model(
        &self,
        role: &str,
        messages: Vec<ChatMessage>,
        options: CallOptions,
    ) -> BoxFuture<'_, Result<ModelResponse>>;
}

/// What the high-capability backend returned for a stuck or exhausted loop:
/// either a direct answer (`reasoning` with no alternative) or a suggested
/// new approach to feed back into the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationOutcome {
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub reasoning: String,
    #[serde(default)]
    pub alternative_approach: Option<String>,
    pub success: bool,
}

/// Escalation backend — slow, high-capability fallback for loops that
/// stalled or ran out of iterations.
pub trait EscalationBackend: Send + Sync + 'static {
    fn escalate(
        &self,
        goal: &str,
        scratchpad: &[ScratchpadEntry],
        error_class: ErrorClass,
        notes: &str,
    ) -> BoxFuture<'_, Result<EscalationOutcome>>;
}

/// Desire persistence. All operations are keyed by desire id with
/// append-or-replace-whole-document semantics; there is no partial-field
/// patching at this layer.
pub trait DesireStore: Send + Sync + 'static {
    fn save_desire(&self, desire: &Desire) -> BoxFuture<'_, Result<()>>;

    fn save_plan(&self, desire_id: &str, plan: &Plan) -> BoxFuture<'_, Result<()>>;

    fn save_outcome_review(
        &self,
        desire_id: &str,
        review: &OutcomeReview,
    ) -> BoxFuture<'_, Result<()>>;

    fn append_scratchpad_entry(
        &self,
        desire_id: &str,
        entry: &ScratchpadEntry,
    ) -> BoxFuture<'_, Result<()>>;

    fn load_desire(&self, desire_id: &str) -> BoxFuture<'_, Result<Desire>>;

    fn list_desires(&self) -> BoxFuture<'_, Result<Vec<Desire>>>;
}
