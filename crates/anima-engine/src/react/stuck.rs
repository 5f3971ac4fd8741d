use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::warn;

use anima_core::config::ReactConfig;
use anima_core::error::Result;
use anima_core::event::EngineEvent;
use anima_core::types::{ErrorClass, ScratchpadEntry};

use crate::context::RunContext;
use crate::definition::{NodeDefinition, NodeExec, NodeOutput};
use crate::registry::NodeRegistry;
use crate::slot::{SlotSpec, SlotType};

/// Scans the scratchpad tail for consecutive failure observations and, among
/// those failures, repeated identical actions. When both hold the node
/// signals stuck on `output0` with a diagnosis and suggestion; otherwise the
/// scratchpad passes through `output1`.
struct StuckDetector;

fn tail_failures(entries: &[ScratchpadEntry]) -> Vec<&ScratchpadEntry> {
    entries
        .iter()
        .rev()
        .take_while(|e| e.is_failure())
        .collect()
}

fn repeated_action(failures: &[&ScratchpadEntry]) -> Option<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in failures {
        *counts.entry(entry.action.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .max_by_key(|(_, n)| *n)
        .map(|(action, n)| (action.to_string(), n))
}

impl NodeExec for StuckDetector {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(raw) = inputs.get("scratchpad") else {
                return Ok(NodeOutput::failure("stuck_detector got no scratchpad"));
            };
            let entries: Vec<ScratchpadEntry> = match serde_json::from_value(raw.clone()) {
                Ok(entries) => entries,
                Err(e) => {
                    return Ok(NodeOutput::failure(format!(
                        "stuck_detector could not read scratchpad: {}",
                        e
                    )))
                }
            };
            let threshold = properties
                .get_u64("failure_threshold")
                .unwrap_or(3)
                .max(1) as usize;

            let failures = tail_failures(&entries);
            let is_stuck = failures.len() >= threshold;
            let repeat = repeated_action(&failures);
            let is_repeating = repeat.is_some();

            let mut out = NodeOutput::new()
                .with("is_stuck", json!(is_stuck))
                .with("is_repeating", json!(is_repeating));

            if is_stuck && is_repeating {
                let (action, count) = repeat.unwrap_or_default();
                let diagnosis = format!(
                    "{} consecutive failures, with '{}' attempted {} times",
                    failures.len(),
                    action,
                    count
                );
                let suggestion = format!(
                    "Stop repeating '{}' — it has failed {} times in a row. \
                     Try a different approach to make progress.",
                    action, count
                );
                warn!(diagnosis = %diagnosis, "Loop is stuck");
                ctx.events.publish(EngineEvent::StuckDetected {
                    run_id: ctx.run_id.clone(),
                    diagnosis: diagnosis.clone(),
                });
                out.insert("diagnosis", json!(diagnosis.clone()));
                out.insert("suggestion", json!(suggestion.clone()));
                out.insert("error_class", json!(ErrorClass::RepeatedFailure.as_str()));
                out.insert(
                    "output0",
                    json!({
                        "diagnosis": diagnosis,
                        "suggestion": suggestion,
                        "error_class": ErrorClass::RepeatedFailure.as_str(),
                    }),
                );
            } else {
                out.insert("output1", raw.clone());
            }
            Ok(out)
        })
    }
}

pub(super) fn register(registry: &mut NodeRegistry, config: &ReactConfig) -> Result<()> {
    registry.register(
        NodeDefinition::new("stuck_detector", "react", Arc::new(StuckDetector))
            .with_input(SlotSpec::required("scratchpad", SlotType::Array))
            .with_output(SlotSpec::optional("output0", SlotType::Object))
            .with_output(SlotSpec::optional("output1", SlotType::Array))
            .with_output(SlotSpec::optional("is_stuck", SlotType::Boolean))
            .with_output(SlotSpec::optional("is_repeating", SlotType::Boolean))
            .with_output(SlotSpec::optional("diagnosis", SlotType::String))
            .with_output(SlotSpec::optional("suggestion", SlotType::String))
            .with_output(SlotSpec::optional("error_class", SlotType::String))
            .with_default("failure_threshold", json!(config.failure_threshold)),
    )?;
    Ok(())
}
