use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use anima_core::error::Result;

use crate::context::RunContext;
use crate::definition::{NodeDefinition, NodeExec, NodeOutput};
use crate::message::truthy;
use crate::registry::NodeRegistry;
use crate::slot::{SlotSpec, SlotType};

/// Routes `value` to `output0` when `condition` is truthy, `output1`
/// otherwise. Exactly one output slot fires.
struct Branch;

impl NodeExec for Branch {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        _properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let condition = inputs.get("condition").cloned().unwrap_or(Value::Bool(false));
            let taken = truthy(&condition);
            let value = inputs.get("value").cloned().unwrap_or(condition);
            let mut out = NodeOutput::new().with("taken", Value::Bool(taken));
            if taken {
                out.insert("output0", value);
            } else {
                out.insert("output1", value);
            }
            Ok(out)
        })
    }
}

/// Routes `value` to one of `output0..output2` by matching `selector`
/// against the `cases` property; unmatched selectors take `default_route`.
struct Switch;

impl NodeExec for Switch {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        _ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let selector = inputs
                .get("selector")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();

            let cases: Vec<String> = properties
                .get("cases")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();

            let route = cases
                .iter()
                .position(|c| *c == selector)
                .or_else(|| {
                    properties
                        .get_u64("default_route")
                        .map(|r| r as usize)
                })
                .unwrap_or(cases.len().min(2));

            let value = inputs.get("value").cloned().unwrap_or(Value::Null);
            let mut out = NodeOutput::new().with("route", json!(route));
            out.insert(format!("output{}", route.min(2)), value);
            Ok(out)
        })
    }
}

/// Writes `value` into the context scratch map under the `key` property.
struct SetScratch;

impl NodeExec for SetScratch {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(key) = properties.get_str("key") else {
                return Ok(NodeOutput::failure("set_scratch requires a 'key' property"));
            };
            let value = inputs.get("value").cloned().unwrap_or(Value::Null);
            ctx.set_scratch(key.to_string(), value.clone());
            Ok(NodeOutput::new().with("value", value))
        })
    }
}

/// Reads a scratch key, falling back to the `default` property.
struct GetScratch;

impl NodeExec for GetScratch {
    fn execute<'a>(
        &'a self,
        _inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let Some(key) = properties.get_str("key") else {
                return Ok(NodeOutput::failure("get_scratch requires a 'key' property"));
            };
            let value = ctx
                .scratch(key)
                .cloned()
                .or_else(|| properties.get("default").cloned())
                .unwrap_or(Value::Null);
            Ok(NodeOutput::new().with("value", value))
        })
    }
}

/// Register the routing and scratch nodes every graph may use.
pub fn register_builtin_nodes(registry: &mut NodeRegistry) -> Result<()> {
    registry.register(
        NodeDefinition::new("branch", "flow", Arc::new(Branch))
            .with_input(SlotSpec::required("condition", SlotType::Any))
            .with_input(SlotSpec::optional("value", SlotType::Any))
            .with_output(SlotSpec::optional("output0", SlotType::Any))
            .with_output(SlotSpec::optional("output1", SlotType::Any))
            .with_output(SlotSpec::optional("taken", SlotType::Boolean)),
    )?;
    registry.register(
        NodeDefinition::new("switch", "flow", Arc::new(Switch))
            .with_input(SlotSpec::required("selector", SlotType::Any))
            .with_input(SlotSpec::optional("value", SlotType::Any))
            .with_output(SlotSpec::optional("output0", SlotType::Any))
            .with_output(SlotSpec::optional("output1", SlotType::Any))
            .with_output(SlotSpec::optional("output2", SlotType::Any))
            .with_output(SlotSpec::optional("route", SlotType::Number))
            .with_default("cases", json!([])),
    )?;
    registry.register(
        NodeDefinition::new("set_scratch", "context", Arc::new(SetScratch))
            .with_input(SlotSpec::optional("value", SlotType::Any))
            .with_output(SlotSpec::optional("value", SlotType::Any)),
    )?;
    registry.register(
        NodeDefinition::new("get_scratch", "context", Arc::new(GetScratch))
            .with_output(SlotSpec::optional("value", SlotType::Any)),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_core::types::SessionId;

    fn ctx() -> RunContext {
        RunContext::new(SessionId::new(), "ada")
    }

    fn inputs(pairs: &[(&str, Value)]) -> NodeOutput {
        let mut out = NodeOutput::new();
        for (k, v) in pairs {
            out.insert(k.to_string(), v.clone());
        }
        out
    }

    #[tokio::test]
    async fn branch_routes_exclusively() {
        let mut ctx = ctx();
        let out = Branch
            .execute(
                &inputs(&[("condition", json!(true)), ("value", json!("payload"))]),
                &mut ctx,
                &NodeOutput::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.get("output0"), Some(&json!("payload")));
        assert!(out.get("output1").is_none());

        let out = Branch
            .execute(
                &inputs(&[("condition", json!(false)), ("value", json!("payload"))]),
                &mut ctx,
                &NodeOutput::new(),
            )
            .await
            .unwrap();
        assert!(out.get("output0").is_none());
        assert_eq!(out.get("output1"), Some(&json!("payload")));
    }

    #[tokio::test]
    async fn branch_treats_failure_shape_as_false() {
        let mut ctx = ctx();
        let out = Branch
            .execute(
                &inputs(&[("condition", json!({"success": false, "error": "x"}))]),
                &mut ctx,
                &NodeOutput::new(),
            )
            .await
            .unwrap();
        assert!(out.get("output1").is_some());
    }

    #[tokio::test]
    async fn switch_matches_cases_in_order() {
        let mut ctx = ctx();
        let properties = inputs(&[("cases", json!(["retry", "escalate"]))]);
        let out = Switch
            .execute(
                &inputs(&[("selector", json!("escalate")), ("value", json!(1))]),
                &mut ctx,
                &properties,
            )
            .await
            .unwrap();
        assert_eq!(out.get("output1"), Some(&json!(1)));
        assert!(out.get("output0").is_none());
    }

    #[tokio::test]
    async fn switch_unmatched_takes_default_route() {
        let mut ctx = ctx();
        let properties = inputs(&[
            ("cases", json!(["a", "b"])),
            ("default_route", json!(2)),
        ]);
        let out = Switch
            .execute(
                &inputs(&[("selector", json!("zzz")), ("value", json!("v"))]),
                &mut ctx,
                &properties,
            )
            .await
            .unwrap();
        assert_eq!(out.get("output2"), Some(&json!("v")));
    }

    #[tokio::test]
    async fn scratch_nodes_roundtrip() {
        let mut ctx = ctx();
        let properties = inputs(&[("key", json!("memo"))]);
        SetScratch
            .execute(&inputs(&[("value", json!(7))]), &mut ctx, &properties)
            .await
            .unwrap();

        let out = GetScratch
            .execute(&NodeOutput::new(), &mut ctx, &properties)
            .await
            .unwrap();
        assert_eq!(out.get("value"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn get_scratch_without_key_is_expected_failure() {
        let mut ctx = ctx();
        let out = GetScratch
            .execute(&NodeOutput::new(), &mut ctx, &NodeOutput::new())
            .await
            .unwrap();
        assert!(out.is_failure());
    }

    #[test]
    fn reregistration_is_rejected() {
        let mut registry = NodeRegistry::new();
        register_builtin_nodes(&mut registry).unwrap();
        assert!(registry.get("branch").is_some());
        assert!(registry.get("switch").is_some());
        assert!(register_builtin_nodes(&mut registry).is_err());
    }
}
