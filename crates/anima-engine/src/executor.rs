use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use anima_core::config::EngineConfig;
use anima_core::error::{AnimaError, Result};
use anima_core::event::EngineEvent;
use anima_core::types::RunId;

use crate::context::RunContext;
use crate::definition::NodeOutput;
use crate::graph::Graph;
use crate::registry::NodeRegistry;

/// Result of one node execution (or skip) within a run.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    pub kind: String,
    pub success: bool,
    pub skipped: bool,
    pub elapsed_ms: u64,
    /// Which traversal pass this was for the instance (1-based).
    pub visit: usize,
    pub outputs: NodeOutput,
}

/// Why the run stopped dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    /// Per-node results in execution order; loop passes append one record
    /// per visit.
    pub records: Vec<NodeRecord>,
    pub total_elapsed_ms: u64,
    /// Outputs of the last executed node that fired nothing downstream.
    pub final_output: Option<NodeOutput>,
    pub outcome: RunOutcome,
}

impl RunResult {
    /// The most recent outputs produced by a node instance.
    pub fn outputs_of(&self, node_id: &str) -> Option<&NodeOutput> {
        self.records
            .iter()
            .rev()
            .find(|r| r.node_id == node_id && !r.skipped)
            .map(|r| &r.outputs)
    }

    /// How many times a node instance actually executed.
    pub fn visits(&self, node_id: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.node_id == node_id && !r.skipped)
            .count()
    }
}

/// The graph execution engine.
///
/// Callers validate graphs against the registry at load time
/// ([`Graph::validate`]); `execute` assumes a validated graph and reports
/// structural surprises as faults rather than re-validating per run.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Execute a graph against a run-scoped context.
    ///
    /// Nodes run one at a time in dependency order over forward links.
    /// Conditional outputs that stay unpopulated do not fire their links;
    /// downstream nodes whose required inputs never arrive are skipped.
    /// A fired back-edge delivers its value to the loop entry and resets
    /// the loop body for a fresh pass — the same instances re-fire as a new
    /// logical iteration. Expected failures (`{success:false, error}`) are
    /// ordinary data; faults (`Err`, structural absence, timeout, visit cap)
    /// abort the run.
    pub async fn execute(&self, graph: &Graph, mut ctx: RunContext) -> Result<RunResult> {
        let start = Instant::now();
        let run_id = ctx.run_id.clone();
        let events = ctx.events.clone();

        events.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
            graph: graph.name.clone(),
        });
        info!(run_id = %run_id, graph = %graph.name, nodes = graph.nodes.len(), "Run started");

        let order = graph.topo_order();
        if order.len() != graph.nodes.len() {
            let err = AnimaError::GraphValidation(format!(
                "graph '{}' has an undeclared cycle (was it validated?)",
                graph.name
            ));
            events.publish(EngineEvent::RunFailed {
                run_id: run_id.clone(),
                error: err.to_string(),
            });
            return Err(err);
        }
        let index_of: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        // Fired outputs per node, back-edge deliveries, and bookkeeping.
        let mut outputs: HashMap<String, NodeOutput> = HashMap::new();
        let mut delivered: HashMap<(String, String), serde_json::Value> = HashMap::new();
        let mut visits: HashMap<String, usize> = HashMap::new();
        let mut skip_recorded: HashSet<String> = HashSet::new();
        let mut records: Vec<NodeRecord> = Vec::new();
        let mut final_candidate: Option<NodeOutput> = None;
        let mut last_executed: Option<NodeOutput> = None;
        let mut outcome = RunOutcome::Completed;

        let mut pending: BTreeSet<usize> = (0..order.len()).collect();

        while let Some(idx) = pending.pop_first() {
            if ctx.is_cancelled() {
                warn!(run_id = %run_id, "Run cancelled, stopping dispatch");
                events.publish(EngineEvent::RunCancelled {
                    run_id: run_id.clone(),
                });
                outcome = RunOutcome::Cancelled;
                break;
            }

            let node_id = order[idx];
            let instance = graph
                .node(node_id)
                .ok_or_else(|| AnimaError::GraphValidation(format!("unknown node '{}'", node_id)))?;
            let def = self
                .registry
                .get(&instance.kind)
                .ok_or_else(|| AnimaError::NodeNotFound(instance.kind.clone()))?;

            // Gather inputs: linked slots from fired upstream outputs (or
            // back-edge deliveries), unconnected slots from ambient context.
            let mut inputs = NodeOutput::new();
            let mut runnable = true;
            for spec in &def.inputs {
                let link = graph
                    .links
                    .iter()
                    .find(|l| l.to_node == node_id && l.to_slot == spec.name);
                match link {
                    Some(l) if l.back_edge => {
                        let key = (node_id.to_string(), spec.name.clone());
                        if let Some(v) = delivered.get(&key) {
                            inputs.insert(spec.name.clone(), v.clone());
                        } else if let Some(v) = ctx.ambient(&spec.name) {
                            // First pass: nothing has travelled the back-edge
                            // yet, so the slot resolves like an unconnected one.
                            inputs.insert(spec.name.clone(), v);
                        } else if spec.required {
                            runnable = false;
                        }
                    }
                    Some(l) => {
                        match outputs.get(&l.from_node).and_then(|o| o.get(&l.from_slot)) {
                            Some(v) => inputs.insert(spec.name.clone(), v.clone()),
                            None => {
                                // Upstream did not fire this slot in the
                                // current pass — conditional route not taken.
                                if spec.required {
                                    runnable = false;
                                }
                            }
                        }
                    }
                    None => match ctx.ambient(&spec.name) {
                        Some(v) => inputs.insert(spec.name.clone(), v),
                        None if spec.required => {
                            let err = AnimaError::MissingInput {
                                node: node_id.to_string(),
                                slot: spec.name.clone(),
                            };
                            error!(run_id = %run_id, node_id, slot = %spec.name, "Required input absent");
                            events.publish(EngineEvent::RunFailed {
                                run_id: run_id.clone(),
                                error: err.to_string(),
                            });
                            return Err(err);
                        }
                        None => {}
                    },
                }
            }

            if !runnable {
                if skip_recorded.insert(node_id.to_string()) {
                    debug!(run_id = %run_id, node_id, "Node skipped (branch not taken)");
                    events.publish(EngineEvent::NodeSkipped {
                        run_id: run_id.clone(),
                        node_id: node_id.to_string(),
                    });
                    records.push(NodeRecord {
                        node_id: node_id.to_string(),
                        kind: instance.kind.clone(),
                        success: true,
                        skipped: true,
                        elapsed_ms: 0,
                        visit: *visits.get(node_id).unwrap_or(&0),
                        outputs: NodeOutput::new(),
                    });
                }
                continue;
            }

            let visit = visits.entry(node_id.to_string()).or_insert(0);
            *visit += 1;
            let visit = *visit;
            if visit > self.config.max_node_visits {
                let err = AnimaError::VisitCapExceeded {
                    node: node_id.to_string(),
                    visits: visit,
                };
                events.publish(EngineEvent::RunFailed {
                    run_id: run_id.clone(),
                    error: err.to_string(),
                });
                return Err(err);
            }

            events.publish(EngineEvent::NodeStarted {
                run_id: run_id.clone(),
                node_id: node_id.to_string(),
            });
            let properties = def.merged_properties(&instance.properties);
            let node_start = Instant::now();
            let executed = timeout(
                Duration::from_secs(self.config.node_timeout_secs),
                def.exec().execute(&inputs, &mut ctx, &properties),
            )
            .await;
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            let out = match executed {
                Ok(Ok(out)) => out,
                Ok(Err(e)) => {
                    error!(run_id = %run_id, node_id, error = %e, "Node fault, aborting run");
                    events.publish(EngineEvent::RunFailed {
                        run_id: run_id.clone(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
                Err(_) => {
                    let err = AnimaError::NodeTimeout {
                        node: node_id.to_string(),
                        timeout_secs: self.config.node_timeout_secs,
                    };
                    error!(run_id = %run_id, node_id, "Node timed out, aborting run");
                    events.publish(EngineEvent::RunFailed {
                        run_id: run_id.clone(),
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            };

            let success = !out.is_failure();
            debug!(run_id = %run_id, node_id, success, elapsed_ms, visit, "Node finished");
            events.publish(EngineEvent::NodeFinished {
                run_id: run_id.clone(),
                node_id: node_id.to_string(),
                success,
                elapsed_ms,
            });
            records.push(NodeRecord {
                node_id: node_id.to_string(),
                kind: instance.kind.clone(),
                success,
                skipped: false,
                elapsed_ms,
                visit,
                outputs: out.clone(),
            });

            // Fire outgoing links whose source slot was populated.
            let mut fired_any = false;
            for link in graph.links.iter().filter(|l| l.from_node == node_id) {
                let Some(value) = out.get(&link.from_slot) else {
                    continue;
                };
                fired_any = true;
                if link.back_edge {
                    // A new logical iteration: deliver the value and reset
                    // the loop body so the same instances re-fire.
                    delivered.insert(
                        (link.to_node.clone(), link.to_slot.clone()),
                        value.clone(),
                    );
                    let to_idx = index_of[link.to_node.as_str()];
                    for i in to_idx..=idx {
                        let body_id = order[i];
                        outputs.remove(body_id);
                        skip_recorded.remove(body_id);
                        pending.insert(i);
                    }
                }
            }
            outputs.insert(node_id.to_string(), out.clone());

            if fired_any {
                last_executed = Some(out);
            } else {
                final_candidate = Some(out.clone());
                last_executed = Some(out);
            }
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        if outcome == RunOutcome::Completed {
            events.publish(EngineEvent::RunCompleted {
                run_id: run_id.clone(),
                total_elapsed_ms,
            });
            info!(run_id = %run_id, total_elapsed_ms, "Run completed");
        }

        Ok(RunResult {
            run_id,
            records,
            total_elapsed_ms,
            final_output: final_candidate.or(last_executed),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NodeDefinition, NodeExec};
    use crate::slot::{SlotSpec, SlotType};
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::Mutex;

    use anima_core::types::SessionId;

    /// Emits its `value` property and logs its `tag` property.
    struct Emit {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl NodeExec for Emit {
        fn execute<'a>(
            &'a self,
            _inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move {
                if let Some(tag) = properties.get_str("tag") {
                    self.log.lock().unwrap().push(tag.to_string());
                }
                let value = properties.get("value").cloned().unwrap_or(json!("x"));
                Ok(NodeOutput::new().with("value", value))
            })
        }
    }

    /// Forwards its input, logging the tag.
    struct Relay {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl NodeExec for Relay {
        fn execute<'a>(
            &'a self,
            inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move {
                if let Some(tag) = properties.get_str("tag") {
                    self.log.lock().unwrap().push(tag.to_string());
                }
                let value = inputs.get("value").cloned().unwrap_or(json!(null));
                Ok(NodeOutput::new().with("value", value))
            })
        }
    }

    /// Captures the full input snapshot it was handed.
    struct Probe {
        seen: Arc<Mutex<Option<NodeOutput>>>,
    }

    impl NodeExec for Probe {
        fn execute<'a>(
            &'a self,
            inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            _properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move {
                *self.seen.lock().unwrap() = Some(inputs.clone());
                Ok(NodeOutput::ok())
            })
        }
    }

    /// Counts up to a limit, firing `again` (back-edge) until it is done.
    struct CountTo;

    impl NodeExec for CountTo {
        fn execute<'a>(
            &'a self,
            inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move {
                let count = inputs.get_u64("count").unwrap_or(0);
                let limit = properties.get_u64("limit").unwrap_or(3);
                let next = count + 1;
                let mut out = NodeOutput::new().with("count", json!(next));
                if next < limit {
                    out.insert("again", json!(next));
                } else {
                    out.insert("done", json!(next));
                }
                Ok(out)
            })
        }
    }

    /// Routes on a boolean condition.
    struct Gate;

    impl NodeExec for Gate {
        fn execute<'a>(
            &'a self,
            inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            _properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move {
                let cond = inputs.get_bool("condition").unwrap_or(false);
                let value = inputs.get("value").cloned().unwrap_or(json!(null));
                let mut out = NodeOutput::new();
                if cond {
                    out.insert("output0", value);
                } else {
                    out.insert("output1", value);
                }
                Ok(out)
            })
        }
    }

    struct AlwaysFails;

    impl NodeExec for AlwaysFails {
        fn execute<'a>(
            &'a self,
            _inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            _properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async { Ok(NodeOutput::failure("expected failure")) })
        }
    }

    struct Faults;

    impl NodeExec for Faults {
        fn execute<'a>(
            &'a self,
            _inputs: &'a NodeOutput,
            _ctx: &'a mut RunContext,
            _properties: &'a NodeOutput,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async {
                Err(AnimaError::GraphValidation("boom".to_string()))
            })
        }
    }

    struct Harness {
        registry: Arc<NodeRegistry>,
        log: Arc<Mutex<Vec<String>>>,
        seen: Arc<Mutex<Option<NodeOutput>>>,
    }

    fn harness() -> Harness {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(None));
        let mut registry = NodeRegistry::new();
        registry
            .register(
                NodeDefinition::new("emit", "test", Arc::new(Emit { log: log.clone() }))
                    .with_output(SlotSpec::optional("value", SlotType::Any)),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("relay", "test", Arc::new(Relay { log: log.clone() }))
                    .with_input(SlotSpec::required("value", SlotType::Any))
                    .with_output(SlotSpec::optional("value", SlotType::Any)),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("probe", "test", Arc::new(Probe { seen: seen.clone() }))
                    .with_input(SlotSpec::optional("value", SlotType::Any))
                    .with_input(SlotSpec::optional("user_id", SlotType::String))
                    .with_output(SlotSpec::optional("success", SlotType::Boolean)),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("count_to", "test", Arc::new(CountTo))
                    .with_input(SlotSpec::optional("count", SlotType::Number))
                    .with_output(SlotSpec::optional("count", SlotType::Number))
                    .with_output(SlotSpec::optional("again", SlotType::Number))
                    .with_output(SlotSpec::optional("done", SlotType::Number))
                    .with_default("limit", json!(3))
                    .bounding_iteration(),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("gate", "test", Arc::new(Gate))
                    .with_input(SlotSpec::required("condition", SlotType::Any))
                    .with_input(SlotSpec::optional("value", SlotType::Any))
                    .with_output(SlotSpec::optional("output0", SlotType::Any))
                    .with_output(SlotSpec::optional("output1", SlotType::Any)),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("always_fails", "test", Arc::new(AlwaysFails))
                    .with_output(SlotSpec::optional("success", SlotType::Boolean))
                    .with_output(SlotSpec::optional("error", SlotType::String)),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("faults", "test", Arc::new(Faults))
                    .with_output(SlotSpec::optional("success", SlotType::Boolean)),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("needs_input", "test", Arc::new(CountTo))
                    .with_input(SlotSpec::required("count", SlotType::Number))
                    .with_output(SlotSpec::optional("count", SlotType::Number)),
            )
            .unwrap();
        Harness {
            registry: Arc::new(registry),
            log,
            seen,
        }
    }

    fn engine(h: &Harness) -> Engine {
        Engine::new(h.registry.clone(), EngineConfig::default())
    }

    fn ctx() -> RunContext {
        RunContext::new(SessionId::from_str("sess"), "ada")
    }

    #[tokio::test]
    async fn linear_chain_visits_every_node_once_in_order() {
        let h = harness();
        let graph = Graph::new("chain")
            .add_node_with("a", "emit", props(&[("tag", json!("a"))]))
            .add_node_with("b", "relay", props(&[("tag", json!("b"))]))
            .add_node_with("c", "relay", props(&[("tag", json!("c"))]))
            .link("a", "value", "b", "value")
            .link("b", "value", "c", "value");
        graph.validate(&h.registry).unwrap();

        let result = engine(&h).execute(&graph, ctx()).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.records.len(), 3);
        assert!(result.records.iter().all(|r| r.success && !r.skipped));
        assert_eq!(*h.log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(result.visits("a"), 1);
        assert_eq!(result.visits("b"), 1);
        assert_eq!(result.visits("c"), 1);
    }

    #[tokio::test]
    async fn diamond_order_is_dependency_consistent() {
        let h = harness();
        let graph = Graph::new("diamond")
            .add_node_with("d", "relay", props(&[("tag", json!("d"))]))
            .add_node_with("b", "relay", props(&[("tag", json!("b"))]))
            .add_node_with("c", "relay", props(&[("tag", json!("c"))]))
            .add_node_with("a", "emit", props(&[("tag", json!("a"))]))
            .link("a", "value", "b", "value")
            .link("a", "value", "c", "value")
            .link("b", "value", "d", "value");
        graph.validate(&h.registry).unwrap();

        let result = engine(&h).execute(&graph, ctx()).await.unwrap();
        assert_eq!(result.records.len(), 4);

        let log = h.log.lock().unwrap();
        let pos = |t: &str| log.iter().position(|x| x == t).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
    }

    #[tokio::test]
    async fn untaken_branch_is_skipped() {
        let h = harness();
        let graph = Graph::new("cond")
            .add_node_with("cond", "emit", props(&[("value", json!(false))]))
            .add_node("gate", "gate")
            .add_node_with("yes", "relay", props(&[("tag", json!("yes"))]))
            .add_node_with("no", "relay", props(&[("tag", json!("no"))]))
            .link("cond", "value", "gate", "condition")
            .link("gate", "output0", "yes", "value")
            .link("gate", "output1", "no", "value");
        graph.validate(&h.registry).unwrap();

        let result = engine(&h).execute(&graph, ctx()).await.unwrap();

        assert_eq!(*h.log.lock().unwrap(), vec!["no"]);
        let skipped: Vec<_> = result
            .records
            .iter()
            .filter(|r| r.skipped)
            .map(|r| r.node_id.as_str())
            .collect();
        assert_eq!(skipped, vec!["yes"]);
    }

    #[tokio::test]
    async fn unconnected_optional_slot_falls_back_to_context() {
        let h = harness();
        let graph = Graph::new("ambient").add_node("p", "probe");
        graph.validate(&h.registry).unwrap();

        engine(&h).execute(&graph, ctx()).await.unwrap();

        let seen = h.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get_str("user_id"), Some("ada"));
        assert!(seen.get("value").is_none());
    }

    #[tokio::test]
    async fn missing_required_input_is_a_fault() {
        let h = harness();
        let graph = Graph::new("hole").add_node("n", "needs_input");
        graph.validate(&h.registry).unwrap();

        let err = engine(&h).execute(&graph, ctx()).await.unwrap_err();
        assert!(matches!(err, AnimaError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn failure_shaped_output_does_not_abort() {
        let h = harness();
        let graph = Graph::new("soft-fail").add_node("f", "always_fails");
        graph.validate(&h.registry).unwrap();

        let result = engine(&h).execute(&graph, ctx()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.records.len(), 1);
        assert!(!result.records[0].success);
        assert_eq!(
            result.final_output.unwrap().get_str("error"),
            Some("expected failure")
        );
    }

    #[tokio::test]
    async fn node_fault_aborts_the_run() {
        let h = harness();
        let graph = Graph::new("hard-fail").add_node("f", "faults");
        graph.validate(&h.registry).unwrap();

        let err = engine(&h).execute(&graph, ctx()).await.unwrap_err();
        assert!(matches!(err, AnimaError::GraphValidation(_)));
    }

    #[tokio::test]
    async fn self_loop_terminates_at_its_bound() {
        let h = harness();
        let graph = Graph::new("loop")
            .add_node_with("counter", "count_to", props(&[("limit", json!(5))]))
            .add_node_with("exit", "relay", props(&[("tag", json!("exit"))]))
            .link("counter", "done", "exit", "value")
            .link_back("counter", "again", "counter", "count");
        graph.validate(&h.registry).unwrap();

        let result = engine(&h).execute(&graph, ctx()).await.unwrap();

        assert_eq!(result.visits("counter"), 5);
        assert_eq!(result.visits("exit"), 1);
        assert_eq!(
            result.final_output.unwrap().get("value"),
            Some(&json!(5))
        );
    }

    #[tokio::test]
    async fn loop_body_refires_per_iteration() {
        let h = harness();
        // counter -> work, work closes the loop back into counter.
        let graph = Graph::new("loop-body")
            .add_node_with("counter", "count_to", props(&[("limit", json!(3))]))
            .add_node_with("work", "relay", props(&[("tag", json!("work"))]))
            .add_node_with("exit", "relay", props(&[("tag", json!("exit"))]))
            .link("counter", "again", "work", "value")
            .link("counter", "done", "exit", "value")
            .link_back("work", "value", "counter", "count");
        graph.validate(&h.registry).unwrap();

        let result = engine(&h).execute(&graph, ctx()).await.unwrap();

        // limit 3: work runs for counts 1 and 2, then `done` fires at 3.
        assert_eq!(result.visits("counter"), 3);
        assert_eq!(result.visits("work"), 2);
        assert_eq!(result.visits("exit"), 1);
    }

    #[tokio::test]
    async fn runaway_loop_hits_the_visit_cap() {
        let h = harness();
        let graph = Graph::new("runaway")
            .add_node_with("counter", "count_to", props(&[("limit", json!(1_000_000))]))
            .link_back("counter", "again", "counter", "count");
        graph.validate(&h.registry).unwrap();

        let config = EngineConfig {
            max_node_visits: 5,
            ..Default::default()
        };
        let err = Engine::new(h.registry.clone(), config)
            .execute(&graph, ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AnimaError::VisitCapExceeded { .. }));
    }

    #[tokio::test]
    async fn cancelled_context_stops_dispatch() {
        let h = harness();
        let graph = Graph::new("cancelled").add_node("a", "emit");
        graph.validate(&h.registry).unwrap();

        let ctx = ctx();
        ctx.cancel.cancel();
        let result = engine(&h).execute(&graph, ctx).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert!(result.records.is_empty());
    }

    fn props(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}
