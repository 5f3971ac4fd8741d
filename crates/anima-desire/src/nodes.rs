use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use anima_core::desire::{Desire, DesireStatus, DesireUpdate, Plan, RejectionRecord, Verdict};
use anima_core::error::{AnimaError, Result};
use anima_core::traits::DesireStore;

use anima_engine::context::RunContext;
use anima_engine::definition::{NodeDefinition, NodeExec, NodeOutput};
use anima_engine::registry::NodeRegistry;
use anima_engine::slot::{SlotSpec, SlotType};

use crate::planning::register_plan_validator;
use crate::updater::DesireUpdater;

fn parse_desire(value: &Value) -> std::result::Result<Desire, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("malformed desire document: {}", e))
}

/// Loads a desire from the store by id. A missing desire is an expected
/// failure the graph can route; store faults abort the run.
struct DesireLoader {
    updater: Arc<DesireUpdater>,
}

impl NodeExec for DesireLoader {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(desire_id) = inputs.get_str("desire_id") else {
                return Ok(NodeOutput::failure("desire_loader got no desire_id"));
            };
            match self.updater.store().load_desire(desire_id).await {
                Ok(desire) => Ok(NodeOutput::ok().with("desire", serde_json::to_value(&desire)?)),
                Err(AnimaError::DesireNotFound(id)) => {
                    Ok(NodeOutput::failure(format!("desire not found: {}", id)))
                }
                Err(e) => Err(e),
            }
        })
    }
}

/// Merges free-text user critique and prior review lessons into the
/// desire's critique field before replanning. Does not mutate status and
/// does not persist — the updater is the single mutation point.
struct DesireEnricher;

impl NodeExec for DesireEnricher {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(raw) = inputs.get("desire") else {
                return Ok(NodeOutput::failure("desire_enricher got no desire"));
            };
            let mut desire = match parse_desire(raw) {
                Ok(d) => d,
                Err(e) => return Ok(NodeOutput::failure(e)),
            };

            let mut parts: Vec<String> = Vec::new();
            if let Some(existing) = &desire.user_critique {
                parts.push(existing.clone());
            }
            if let Some(critique) = inputs.get_str("critique") {
                if !critique.trim().is_empty() {
                    parts.push(critique.trim().to_string());
                }
            }
            if let Some(review) = &desire.review {
                for lesson in &review.lessons {
                    parts.push(format!("Lesson from last attempt: {}", lesson));
                }
            }

            let merged = parts.join("\n");
            if !merged.is_empty() {
                desire.user_critique = Some(merged.clone());
            }
            debug!(desire_id = %desire.id, critique_len = merged.len(), "Desire enriched");

            Ok(NodeOutput::ok()
                .with("desire", serde_json::to_value(&desire)?)
                .with("critique", json!(merged)))
        })
    }
}

/// Thin node wrapper over [`DesireUpdater::update`]. Illegal transitions,
/// invalid plans, and missing desires come back failure-shaped; storage
/// faults abort the run.
struct DesireUpdaterNode {
    updater: Arc<DesireUpdater>,
}

impl NodeExec for DesireUpdaterNode {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let desire_id = inputs
                .get_str("desire_id")
                .map(String::from)
                .or_else(|| {
                    inputs
                        .get("desire")
                        .and_then(|d| d.get("id"))
                        .and_then(Value::as_str)
                        .map(String::from)
                });
            let Some(desire_id) = desire_id else {
                return Ok(NodeOutput::failure("desire_updater got no desire id"));
            };

            let mut update = DesireUpdate::default();
            if let Some(raw) = inputs.get_str("status") {
                match DesireStatus::parse(raw) {
                    Some(status) => update.status = Some(status),
                    None => {
                        return Ok(NodeOutput::failure(format!("unknown status '{}'", raw)))
                    }
                }
            }
            if let Some(raw) = inputs.get("plan") {
                match serde_json::from_value::<Plan>(raw.clone()) {
                    Ok(plan) => update.plan = Some(plan),
                    Err(e) => {
                        return Ok(NodeOutput::failure(format!("malformed plan: {}", e)))
                    }
                }
            }
            if let Some(raw) = inputs.get("review") {
                match serde_json::from_value(raw.clone()) {
                    Ok(review) => update.review = Some(review),
                    Err(e) => {
                        return Ok(NodeOutput::failure(format!("malformed review: {}", e)))
                    }
                }
            }
            if let Some(raw) = inputs.get("rejection") {
                match serde_json::from_value::<RejectionRecord>(raw.clone()) {
                    Ok(rejection) => update.rejection = Some(rejection),
                    Err(e) => {
                        return Ok(NodeOutput::failure(format!("malformed rejection: {}", e)))
                    }
                }
            }
            if let Some(critique) = inputs.get_str("critique") {
                update.critique = Some(critique.to_string());
            }

            match self.updater.update(&desire_id, update).await {
                Ok(desire) => {
                    Ok(NodeOutput::ok().with("desire", serde_json::to_value(&desire)?))
                }
                Err(
                    e @ (AnimaError::InvalidTransition { .. }
                    | AnimaError::InvalidPlan(_)
                    | AnimaError::DesireNotFound(_)),
                ) => Ok(NodeOutput::failure(e.to_string())),
                Err(e) => Err(e),
            }
        })
    }
}

/// Maps the closed verdict set to exactly one of three branches:
/// `output0` terminal (completed/continue/abandon), `output1` retry,
/// `output2` escalate. Missing or unparseable verdicts fail safe to the
/// escalate branch, and a retry past the budget is coerced there too.
struct VerdictRouter {
    updater: Arc<DesireUpdater>,
}

impl NodeExec for VerdictRouter {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let review = inputs.get("review").cloned().unwrap_or(Value::Null);
            let raw_verdict = review.get("verdict").and_then(Value::as_str);
            let verdict = Verdict::parse(raw_verdict);

            let desire = inputs.get("desire").and_then(|v| parse_desire(v).ok());
            let (verdict, coerced) = match &desire {
                Some(desire) => self.updater.effective_verdict(desire, verdict),
                None => (verdict, false),
            };

            let payload = json!({
                "desire": inputs.get("desire").cloned().unwrap_or(Value::Null),
                "review": review,
                "verdict": verdict.as_str(),
                "coerced": coerced,
            });

            debug!(verdict = verdict.as_str(), route = verdict.route(), coerced, "Verdict routed");
            Ok(NodeOutput::new()
                .with("verdict", json!(verdict.as_str()))
                .with(format!("output{}", verdict.route()), payload))
        })
    }
}

/// Register the lifecycle nodes against the single updater instance. The
/// plan generator reaches the model boundary and registers separately in
/// [`crate::planning`].
pub fn register_desire_nodes(
    registry: &mut NodeRegistry,
    updater: Arc<DesireUpdater>,
) -> Result<()> {
    registry.register(
        NodeDefinition::new(
            "desire_loader",
            "desire",
            Arc::new(DesireLoader {
                updater: updater.clone(),
            }),
        )
        .with_input(SlotSpec::required("desire_id", SlotType::String))
        .with_output(SlotSpec::optional("desire", SlotType::Object))
        .with_output(SlotSpec::optional("success", SlotType::Boolean))
        .with_output(SlotSpec::optional("error", SlotType::String)),
    )?;
    registry.register(
        NodeDefinition::new("desire_enricher", "desire", Arc::new(DesireEnricher))
            .with_input(SlotSpec::required("desire", SlotType::Object))
            .with_input(SlotSpec::optional("critique", SlotType::String))
            .with_output(SlotSpec::optional("desire", SlotType::Object))
            .with_output(SlotSpec::optional("critique", SlotType::String)),
    )?;
    registry.register(
        NodeDefinition::new(
            "desire_updater",
            "desire",
            Arc::new(DesireUpdaterNode {
                updater: updater.clone(),
            }),
        )
        .with_input(SlotSpec::optional("desire_id", SlotType::String))
        .with_input(SlotSpec::optional("desire", SlotType::Object))
        .with_input(SlotSpec::optional("status", SlotType::String))
        .with_input(SlotSpec::optional("plan", SlotType::Object))
        .with_input(SlotSpec::optional("review", SlotType::Object))
        .with_input(SlotSpec::optional("rejection", SlotType::Object))
        .with_input(SlotSpec::optional("critique", SlotType::String))
        .with_output(SlotSpec::optional("desire", SlotType::Object))
        .with_output(SlotSpec::optional("success", SlotType::Boolean))
        .with_output(SlotSpec::optional("error", SlotType::String)),
    )?;
    registry.register(
        NodeDefinition::new("verdict_router", "desire", Arc::new(VerdictRouter { updater }))
            .with_input(SlotSpec::optional("review", SlotType::Object))
            .with_input(SlotSpec::optional("desire", SlotType::Object))
            .with_output(SlotSpec::optional("output0", SlotType::Object))
            .with_output(SlotSpec::optional("output1", SlotType::Object))
            .with_output(SlotSpec::optional("output2", SlotType::Object))
            .with_output(SlotSpec::optional("verdict", SlotType::String)),
    )?;
    register_plan_validator(registry)?;
    Ok(())
}
