use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use anima_core::error::Result;

use crate::context::RunContext;
use crate::slot::SlotSpec;

/// Output map produced by one node execution, keyed by output slot name.
///
/// Expected failures are data, not faults: [`NodeOutput::failure`] shapes
/// `{success: false, error}` and the graph's own topology decides where it
/// flows. Only `Err` from [`NodeExec::execute`] aborts the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOutput(Map<String, Value>);

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// An output marked successful.
    pub fn ok() -> Self {
        Self::new().with("success", Value::Bool(true))
    }

    /// The failure shape: `{success: false, error}`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::new()
            .with("success", Value::Bool(false))
            .with("error", Value::String(error.into()))
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_failure(&self) -> bool {
        self.get_bool("success") == Some(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for NodeOutput {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Executable behavior of a node kind.
///
/// Contract: a pure function of the input snapshot, the run context, and
/// the merged properties. Side effects are permitted but must tolerate
/// at-most-once invocation per traversal pass. Expected failures come back
/// as failure-shaped `Ok` values; `Err` is reserved for faults that must
/// abort the whole run.
pub trait NodeExec: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>>;
}

/// Immutable description of a node kind: slot schema, defaults, and the
/// execute operation. Many instances share one definition; a definition
/// never holds per-run state.
#[derive(Clone)]
pub struct NodeDefinition {
    pub kind: String,
    pub category: String,
    pub inputs: Vec<SlotSpec>,
    pub outputs: Vec<SlotSpec>,
    pub defaults: NodeOutput,
    /// Marks nodes that bound loop iteration. Every declared back-edge must
    /// close a cycle through at least one of these.
    pub bounds_iteration: bool,
    exec: Arc<dyn NodeExec>,
}

impl NodeDefinition {
    pub fn new(
        kind: impl Into<String>,
        category: impl Into<String>,
        exec: Arc<dyn NodeExec>,
    ) -> Self {
        Self {
            kind: kind.into(),
            category: category.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            defaults: NodeOutput::new(),
            bounds_iteration: false,
            exec,
        }
    }

    pub fn with_input(mut self, spec: SlotSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn with_output(mut self, spec: SlotSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key, value);
        self
    }

    pub fn bounding_iteration(mut self) -> Self {
        self.bounds_iteration = true;
        self
    }

    pub fn input(&self, name: &str) -> Option<&SlotSpec> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&SlotSpec> {
        self.outputs.iter().find(|s| s.name == name)
    }

    pub fn exec(&self) -> &Arc<dyn NodeExec> {
        &self.exec
    }

    /// Definition defaults overridden by instance properties.
    pub fn merged_properties(&self, overrides: &Map<String, Value>) -> NodeOutput {
        let mut merged = self.defaults.clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

impl std::fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("kind", &self.kind)
            .field("category", &self.category)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("bounds_iteration", &self.bounds_iteration)
            .finish()
    }
}
