use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use anima_core::config::ReactConfig;
use anima_core::error::Result;
use anima_core::event::EngineEvent;
use anima_core::types::ScratchpadEntry;

use crate::context::RunContext;
use crate::definition::{NodeDefinition, NodeExec, NodeOutput};
use crate::message::Message;
use crate::registry::NodeRegistry;
use crate::slot::{SlotSpec, SlotType};

use super::{SCRATCH_ITERATION, SCRATCH_SCRATCHPAD};

/// Increments the loop counter and compares against the bound.
///
/// `has_exceeded_max` is true once the *next* pass would overrun the bound:
/// fed `{iteration: 9, max_iterations: 10}` it stays false, fed
/// `{iteration: 10, max_iterations: 10}` it turns true. The `trigger` slot
/// exists for loop back-edges to land on; its value is ignored.
struct IterationCounter;

impl NodeExec for IterationCounter {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let iteration = inputs
                .get_u64("iteration")
                .or_else(|| ctx.scratch(SCRATCH_ITERATION).and_then(Value::as_u64))
                .unwrap_or(0);
            let max_iterations = inputs
                .get_u64("max_iterations")
                .or_else(|| properties.get_u64("max_iterations"))
                .unwrap_or(10);

            let next = iteration + 1;
            let has_exceeded_max = next > max_iterations;
            let should_continue = !has_exceeded_max;

            ctx.set_scratch(SCRATCH_ITERATION, json!(next));
            ctx.events.publish(EngineEvent::LoopIteration {
                run_id: ctx.run_id.clone(),
                iteration: next as u32,
            });
            debug!(iteration = next, max_iterations, should_continue, "Loop pass");

            Ok(NodeOutput::new()
                .with("iteration", json!(next))
                .with("should_continue", json!(should_continue))
                .with("has_exceeded_max", json!(has_exceeded_max)))
        })
    }
}

/// Inspects the latest observation for the termination marker. Fires
/// `output0` with the final answer when found, passes the observation
/// through `output1` otherwise.
struct CompletionChecker;

impl NodeExec for CompletionChecker {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(observation) = inputs.get("observation") else {
                return Ok(NodeOutput::failure("completion_checker got no observation"));
            };
            let marker = properties
                .get_str("completion_marker")
                .unwrap_or("TASK_COMPLETE");
            let text = Message::from_value(observation).text().to_string();

            if text.contains(marker) {
                let final_answer = text.replace(marker, "").trim().to_string();
                Ok(NodeOutput::new()
                    .with("is_complete", json!(true))
                    .with("output0", json!(final_answer.clone()))
                    .with("final_answer", json!(final_answer)))
            } else {
                Ok(NodeOutput::new()
                    .with("is_complete", json!(false))
                    .with("output1", observation.clone()))
            }
        })
    }
}

/// Appends one observe→think→act record to the run's scratchpad
/// accumulator. A failure-shaped observation marks the entry failed unless
/// the `failed` input says otherwise.
struct ScratchpadRecord;

impl NodeExec for ScratchpadRecord {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(observation) = inputs.get("observation") else {
                return Ok(NodeOutput::failure("scratchpad_record got no observation"));
            };
            let message = Message::from_value(observation);
            let failed = inputs.get_bool("failed").unwrap_or(message.is_failure());
            let thought = inputs
                .get("thought")
                .map(|v| Message::from_value(v).text().to_string())
                .unwrap_or_default();
            let action = inputs
                .get("action")
                .map(|v| Message::from_value(v).text().to_string())
                .unwrap_or_default();
            let iteration = ctx
                .scratch(SCRATCH_ITERATION)
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;

            let mut entry = ScratchpadEntry::new(iteration, thought, action, message.text());
            entry.failed = failed;

            let mut pad: Vec<ScratchpadEntry> = ctx
                .scratch(SCRATCH_SCRATCHPAD)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            pad.push(entry.clone());
            let value = serde_json::to_value(&pad)?;
            ctx.set_scratch(SCRATCH_SCRATCHPAD, value.clone());

            Ok(NodeOutput::new()
                .with("scratchpad", value)
                .with("entry", serde_json::to_value(&entry)?))
        })
    }
}

pub(super) fn register(registry: &mut NodeRegistry, config: &ReactConfig) -> Result<()> {
    registry.register(
        NodeDefinition::new("iteration_counter", "react", Arc::new(IterationCounter))
            .with_input(SlotSpec::optional("trigger", SlotType::Any))
            .with_input(SlotSpec::optional("iteration", SlotType::Number))
            .with_input(SlotSpec::optional("max_iterations", SlotType::Number))
            .with_output(SlotSpec::optional("iteration", SlotType::Number))
            .with_output(SlotSpec::optional("should_continue", SlotType::Boolean))
            .with_output(SlotSpec::optional("has_exceeded_max", SlotType::Boolean))
            .with_default("max_iterations", json!(config.max_iterations))
            .bounding_iteration(),
    )?;
    registry.register(
        NodeDefinition::new("completion_checker", "react", Arc::new(CompletionChecker))
            .with_input(SlotSpec::required("observation", SlotType::Any))
            .with_output(SlotSpec::optional("output0", SlotType::String))
            .with_output(SlotSpec::optional("output1", SlotType::Any))
            .with_output(SlotSpec::optional("is_complete", SlotType::Boolean))
            .with_output(SlotSpec::optional("final_answer", SlotType::String))
            .with_default("completion_marker", json!(config.completion_marker)),
    )?;
    registry.register(
        NodeDefinition::new("scratchpad_record", "react", Arc::new(ScratchpadRecord))
            .with_input(SlotSpec::optional("thought", SlotType::Any))
            .with_input(SlotSpec::optional("action", SlotType::Any))
            .with_input(SlotSpec::required("observation", SlotType::Any))
            .with_input(SlotSpec::optional("failed", SlotType::Boolean))
            .with_output(SlotSpec::optional("scratchpad", SlotType::Array))
            .with_output(SlotSpec::optional("entry", SlotType::Object)),
    )?;
    Ok(())
}
