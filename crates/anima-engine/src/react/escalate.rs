use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use anima_core::config::EscalationConfig;
use anima_core::error::{AnimaError, Result};
use anima_core::event::EngineEvent;
use anima_core::traits::EscalationBackend;
use anima_core::types::{ErrorClass, ScratchpadEntry};

use crate::context::RunContext;
use crate::definition::{NodeDefinition, NodeExec, NodeOutput};
use crate::message::Message;
use crate::registry::NodeRegistry;
use crate::slot::{SlotSpec, SlotType};

/// Delegates a stalled or exhausted goal to the high-capability backend.
///
/// A direct answer fires `resolved`; a suggested new approach fires
/// `retry_hint` so the graph can feed it back into the loop as a fresh
/// thought. Backend failure resolves to a plain-language `message` composed
/// from the last diagnosis and suggestion — never a raw fault.
struct Escalation {
    backend: Arc<dyn EscalationBackend>,
    timeout_secs: u64,
}

fn plain_language_fallback(diagnosis: &str, suggestion: &str) -> String {
    let mut message =
        String::from("I wasn't able to finish this on my own, even after asking for help.");
    if !diagnosis.is_empty() {
        message.push_str(&format!(" What happened: {}.", diagnosis.trim_end_matches('.')));
    }
    if !suggestion.is_empty() {
        message.push_str(&format!(" {}", suggestion));
    }
    message
}

impl NodeExec for Escalation {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(AnimaError::Cancelled);
            }

            let Some(goal) = inputs.get("goal").map(|v| Message::from_value(v).text().to_string())
            else {
                return Ok(NodeOutput::failure("escalation got no goal"));
            };
            let scratchpad: Vec<ScratchpadEntry> = inputs
                .get("scratchpad")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            let error_class = inputs
                .get("error_class")
                .map(|v| ErrorClass::parse(Message::from_value(v).text()))
                .unwrap_or_default();
            let diagnosis = inputs
                .get("diagnosis")
                .map(|v| Message::from_value(v).text().to_string())
                .unwrap_or_default();
            let suggestion = inputs
                .get("suggestion")
                .map(|v| Message::from_value(v).text().to_string())
                .unwrap_or_default();

            info!(
                goal = %goal,
                error_class = error_class.as_str(),
                entries = scratchpad.len(),
                "Escalating to high-capability backend"
            );
            ctx.events.publish(EngineEvent::EscalationStarted {
                run_id: ctx.run_id.clone(),
                error_class: error_class.as_str().to_string(),
            });

            let call = self
                .backend
                .escalate(&goal, &scratchpad, error_class, &diagnosis);
            let outcome = match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(outcome)) if outcome.success => outcome,
                Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                    warn!("Escalation backend could not help, composing fallback message");
                    ctx.events.publish(EngineEvent::EscalationResolved {
                        run_id: ctx.run_id.clone(),
                        resolved: false,
                    });
                    return Ok(NodeOutput::failure("escalation backend failed")
                        .with("message", json!(plain_language_fallback(&diagnosis, &suggestion))));
                }
            };

            let mut out = NodeOutput::ok()
                .with("reasoning", json!(outcome.reasoning.clone()))
                .with("suggestions", json!(outcome.suggestions.clone()));

            match outcome.alternative_approach {
                Some(alternative) => {
                    // Not an answer — a fresh thought to feed back into the loop.
                    ctx.events.publish(EngineEvent::EscalationResolved {
                        run_id: ctx.run_id.clone(),
                        resolved: false,
                    });
                    out.insert("retry_hint", json!(alternative));
                }
                None => {
                    ctx.events.publish(EngineEvent::EscalationResolved {
                        run_id: ctx.run_id.clone(),
                        resolved: true,
                    });
                    out.insert("resolved", json!({ "content": outcome.reasoning }));
                }
            }
            Ok(out)
        })
    }
}

/// Register the escalation node against a concrete backend. Kept separate
/// from [`super::register_react_nodes`] because the backend is an external
/// collaborator with its own, much longer, time budget.
pub fn register_escalation_node(
    registry: &mut NodeRegistry,
    backend: Arc<dyn EscalationBackend>,
    config: &EscalationConfig,
) -> Result<()> {
    registry.register(
        NodeDefinition::new(
            "escalation",
            "react",
            Arc::new(Escalation {
                backend,
                timeout_secs: config.timeout_secs,
            }),
        )
        .with_input(SlotSpec::required("goal", SlotType::Any))
        .with_input(SlotSpec::optional("scratchpad", SlotType::Array))
        .with_input(SlotSpec::optional("error_class", SlotType::String))
        .with_input(SlotSpec::optional("diagnosis", SlotType::String))
        .with_input(SlotSpec::optional("suggestion", SlotType::String))
        .with_output(SlotSpec::optional("resolved", SlotType::LlmResponse))
        .with_output(SlotSpec::optional("retry_hint", SlotType::String))
        .with_output(SlotSpec::optional("message", SlotType::String))
        .with_output(SlotSpec::optional("reasoning", SlotType::String))
        .with_output(SlotSpec::optional("suggestions", SlotType::Array))
        .with_output(SlotSpec::optional("success", SlotType::Boolean))
        .with_output(SlotSpec::optional("error", SlotType::String)),
    )?;
    Ok(())
}
