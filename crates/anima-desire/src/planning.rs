use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use anima_core::desire::{Desire, Plan, PlanStep};
use anima_core::error::Result;
use anima_core::traits::{CallOptions, ModelRouter};
use anima_core::types::ChatMessage;

use anima_engine::context::RunContext;
use anima_engine::definition::{NodeDefinition, NodeExec, NodeOutput};
use anima_engine::registry::NodeRegistry;
use anima_engine::slot::{SlotSpec, SlotType};

const PLANNER_SYSTEM_PROMPT: &str = "You are the planning faculty of a personal companion. \
Produce a concrete, ordered plan for the desire you are given. \
Respond with JSON only: {\"steps\": [{\"description\": \"...\", \"skill\": null, \"depends_on\": []}]}";

/// The model often wraps JSON in prose or code fences; take the outermost
/// object it produced.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end >= start).then(|| &raw[start..=end])
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    steps: Vec<PlanStep>,
}

fn next_version(desire: &Desire) -> u32 {
    desire
        .plan
        .iter()
        .chain(desire.plan_history.iter())
        .map(|p| p.version)
        .max()
        .unwrap_or(0)
        + 1
}

fn planner_prompt(desire: &Desire) -> String {
    let mut prompt = format!("Desire: {}\n", desire.title);
    if let Some(critique) = &desire.user_critique {
        prompt.push_str(&format!("\nCritique to address:\n{}\n", critique));
    }
    if let Some(review) = &desire.review {
        if !review.next_attempt_suggestions.is_empty() {
            prompt.push_str("\nSuggestions from the last attempt:\n");
            for suggestion in &review.next_attempt_suggestions {
                prompt.push_str(&format!("- {}\n", suggestion));
            }
        }
    }
    if !desire.plan_history.is_empty() {
        prompt.push_str(&format!(
            "\nThis is attempt {} — earlier plans did not get there.\n",
            desire.plan_history.len() + 2
        ));
    }
    prompt
}

/// Generates the next plan version for a desire via the `planner` role.
/// Model and parse errors are expected failures.
struct PlanGenerator {
    router: Arc<dyn ModelRouter>,
    timeout_secs: u64,
}

impl NodeExec for PlanGenerator {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(anima_core::error::AnimaError::Cancelled);
            }
            let Some(raw) = inputs.get("desire") else {
                return Ok(NodeOutput::failure("plan_generator got no desire"));
            };
            let desire: Desire = match serde_json::from_value(raw.clone()) {
                Ok(d) => d,
                Err(e) => {
                    return Ok(NodeOutput::failure(format!("malformed desire document: {}", e)))
                }
            };

            let role = properties.get_str("role").unwrap_or("planner");
            let messages = vec![
                ChatMessage::system(PLANNER_SYSTEM_PROMPT),
                ChatMessage::user(planner_prompt(&desire)),
            ];

            debug!(desire_id = %desire.id, role, "Requesting plan");
            let call = self.router.call_model(role, messages, CallOptions::default());
            let response = match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(desire_id = %desire.id, error = %e, "Planner call failed");
                    return Ok(NodeOutput::failure(e.to_string()));
                }
                Err(_) => {
                    return Ok(NodeOutput::failure(format!(
                        "planner timed out after {}s",
                        self.timeout_secs
                    )))
                }
            };

            let Some(body) = extract_json(&response.content) else {
                return Ok(NodeOutput::failure("planner returned no JSON object"));
            };
            let raw_plan: RawPlan = match serde_json::from_str(body) {
                Ok(p) => p,
                Err(e) => {
                    return Ok(NodeOutput::failure(format!("unparseable plan: {}", e)))
                }
            };

            let plan = Plan::new(next_version(&desire), raw_plan.steps);
            Ok(NodeOutput::ok().with("plan", serde_json::to_value(&plan)?))
        })
    }
}

/// Structural validation gate. A well-formed plan passes through `output0`;
/// a malformed one fires `output1` with the reason, and `valid` is false.
struct PlanValidator;

impl NodeExec for PlanValidator {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(raw) = inputs.get("plan") else {
                return Ok(NodeOutput::new()
                    .with("valid", json!(false))
                    .with("output1", json!({ "error": "plan_validator got no plan" })));
            };
            let plan: Plan = match serde_json::from_value(raw.clone()) {
                Ok(p) => p,
                Err(e) => {
                    return Ok(NodeOutput::new()
                        .with("valid", json!(false))
                        .with("output1", json!({ "error": format!("malformed plan: {}", e) })));
                }
            };

            match plan.validate() {
                Ok(()) => Ok(NodeOutput::new()
                    .with("valid", json!(true))
                    .with("output0", raw.clone())),
                Err(e) => Ok(NodeOutput::new()
                    .with("valid", json!(false))
                    .with("output1", json!({ "error": e.to_string() }))),
            }
        })
    }
}

/// Register the plan generator against the model router boundary.
pub fn register_plan_generator(
    registry: &mut NodeRegistry,
    router: Arc<dyn ModelRouter>,
    timeout_secs: u64,
) -> Result<()> {
    registry.register(
        NodeDefinition::new(
            "plan_generator",
            "desire",
            Arc::new(PlanGenerator {
                router,
                timeout_secs,
            }),
        )
        .with_input(SlotSpec::required("desire", SlotType::Object))
        .with_output(SlotSpec::optional("plan", SlotType::Object))
        .with_output(SlotSpec::optional("success", SlotType::Boolean))
        .with_output(SlotSpec::optional("error", SlotType::String))
        .with_default("role", json!("planner")),
    )?;
    Ok(())
}

pub(crate) fn register_plan_validator(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(
        NodeDefinition::new("plan_validator", "desire", Arc::new(PlanValidator))
            .with_input(SlotSpec::required("plan", SlotType::Object))
            .with_output(SlotSpec::optional("output0", SlotType::Object))
            .with_output(SlotSpec::optional("output1", SlotType::Object))
            .with_output(SlotSpec::optional("valid", SlotType::Boolean)),
    )?;
    Ok(())
}
