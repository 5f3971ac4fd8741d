use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use anima_core::error::{AnimaError, Result};

use crate::registry::NodeRegistry;

/// One placed node in a graph: a definition reference plus property
/// overrides under a stable instance id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A directed connection from one node's output slot to another's input slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub from_node: String,
    pub from_slot: String,
    pub to_node: String,
    pub to_slot: String,
    /// Marks the closing link of a loop. Back-edges re-feed an earlier node
    /// with a fresh logical iteration and are excluded from readiness
    /// ordering.
    #[serde(default)]
    pub back_edge: bool,
}

/// A graph of node instances and directed links. Structure is validated
/// once at load, not per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn add_node(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.nodes.push(NodeInstance {
            id: id.into(),
            kind: kind.into(),
            properties: Map::new(),
        });
        self
    }

    pub fn add_node_with(
        mut self,
        id: impl Into<String>,
        kind: impl Into<String>,
        properties: Map<String, Value>,
    ) -> Self {
        self.nodes.push(NodeInstance {
            id: id.into(),
            kind: kind.into(),
            properties,
        });
        self
    }

    pub fn link(
        mut self,
        from_node: impl Into<String>,
        from_slot: impl Into<String>,
        to_node: impl Into<String>,
        to_slot: impl Into<String>,
    ) -> Self {
        self.links.push(Link {
            from_node: from_node.into(),
            from_slot: from_slot.into(),
            to_node: to_node.into(),
            to_slot: to_slot.into(),
            back_edge: false,
        });
        self
    }

    /// Declare the closing link of a loop.
    pub fn link_back(
        mut self,
        from_node: impl Into<String>,
        from_slot: impl Into<String>,
        to_node: impl Into<String>,
        to_slot: impl Into<String>,
    ) -> Self {
        self.links.push(Link {
            from_node: from_node.into(),
            from_slot: from_slot.into(),
            to_node: to_node.into(),
            to_slot: to_slot.into(),
            back_edge: true,
        });
        self
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Validate the graph against a registry: instance ids unique, kinds
    /// registered, link endpoints and slots exist with compatible types, at
    /// most one link per input slot, no undeclared cycles, and every
    /// declared back-edge closes a cycle through an iteration-bounding node.
    pub fn validate(&self, registry: &NodeRegistry) -> Result<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(AnimaError::GraphValidation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if registry.get(&node.kind).is_none() {
                return Err(AnimaError::NodeNotFound(node.kind.clone()));
            }
        }

        let mut seen_inputs = HashSet::new();
        for link in &self.links {
            let from = self.node(&link.from_node).ok_or_else(|| {
                AnimaError::GraphValidation(format!(
                    "link references unknown node '{}'",
                    link.from_node
                ))
            })?;
            let to = self.node(&link.to_node).ok_or_else(|| {
                AnimaError::GraphValidation(format!(
                    "link references unknown node '{}'",
                    link.to_node
                ))
            })?;

            // Kinds were checked above, so these lookups cannot fail.
            let from_def = registry.get(&from.kind).unwrap_or_else(|| unreachable!());
            let to_def = registry.get(&to.kind).unwrap_or_else(|| unreachable!());

            let out_slot = from_def.output(&link.from_slot).ok_or_else(|| {
                AnimaError::GraphValidation(format!(
                    "node '{}' ({}) has no output slot '{}'",
                    link.from_node, from.kind, link.from_slot
                ))
            })?;
            let in_slot = to_def.input(&link.to_slot).ok_or_else(|| {
                AnimaError::GraphValidation(format!(
                    "node '{}' ({}) has no input slot '{}'",
                    link.to_node, to.kind, link.to_slot
                ))
            })?;

            if !in_slot.slot_type.accepts(out_slot.slot_type) {
                return Err(AnimaError::GraphValidation(format!(
                    "type mismatch on {}.{} -> {}.{}: {:?} does not accept {:?}",
                    link.from_node,
                    link.from_slot,
                    link.to_node,
                    link.to_slot,
                    in_slot.slot_type,
                    out_slot.slot_type
                )));
            }

            if !seen_inputs.insert((link.to_node.as_str(), link.to_slot.as_str())) {
                return Err(AnimaError::GraphValidation(format!(
                    "input slot {}.{} has more than one incoming link",
                    link.to_node, link.to_slot
                )));
            }
        }

        self.check_cycles()?;
        self.check_back_edges(registry)?;
        Ok(())
    }

    /// Forward links only. Back-edges are excluded from the ordering and
    /// must carry the loop instead.
    pub fn forward_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| !l.back_edge)
    }

    pub fn back_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| l.back_edge)
    }

    /// Topological order over forward links. Callable only after
    /// validation has ruled out undeclared cycles.
    pub fn topo_order(&self) -> Vec<&str> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for link in self.forward_links() {
            if let Some(d) = in_degree.get_mut(link.to_node.as_str()) {
                *d += 1;
            }
        }

        // Seed in declaration order so ties resolve deterministically.
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.as_str()] == 0)
            .map(|n| n.id.as_str())
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for link in self.forward_links().filter(|l| l.from_node == id) {
                if let Some(d) = in_degree.get_mut(link.to_node.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(link.to_node.as_str());
                    }
                }
            }
        }
        order
    }

    fn check_cycles(&self) -> Result<()> {
        let order = self.topo_order();
        if order.len() != self.nodes.len() {
            let ordered: HashSet<&str> = order.into_iter().collect();
            let stuck: Vec<&str> = self
                .nodes
                .iter()
                .map(|n| n.id.as_str())
                .filter(|id| !ordered.contains(id))
                .collect();
            return Err(AnimaError::GraphValidation(format!(
                "undeclared cycle through [{}]; mark the closing link back_edge",
                stuck.join(", ")
            )));
        }
        Ok(())
    }

    /// Every back-edge must actually close a cycle (its target must reach
    /// its source through forward links) and that cycle must pass through a
    /// node whose definition bounds iteration. Loops without a bound are
    /// rejected here, at load — not discovered as hangs at runtime.
    fn check_back_edges(&self, registry: &NodeRegistry) -> Result<()> {
        for link in self.back_links() {
            let reaches_source = self.forward_reachable(&link.to_node);
            if !reaches_source.contains(link.from_node.as_str()) {
                return Err(AnimaError::GraphValidation(format!(
                    "back-edge {}.{} -> {}.{} does not close a loop",
                    link.from_node, link.from_slot, link.to_node, link.to_slot
                )));
            }

            let reaches_back = self.reverse_reachable(&link.from_node);
            let body: Vec<&NodeInstance> = self
                .nodes
                .iter()
                .filter(|n| {
                    reaches_source.contains(n.id.as_str()) && reaches_back.contains(n.id.as_str())
                })
                .collect();

            let bounded = body.iter().any(|n| {
                registry
                    .get(&n.kind)
                    .is_some_and(|def| def.bounds_iteration)
            });
            if !bounded {
                return Err(AnimaError::GraphValidation(format!(
                    "loop closed by {}.{} -> {}.{} has no iteration-bounding node",
                    link.from_node, link.from_slot, link.to_node, link.to_slot
                )));
            }
        }
        Ok(())
    }

    fn forward_reachable<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for link in self.forward_links().filter(|l| l.from_node == id) {
                queue.push_back(link.to_node.as_str());
            }
        }
        seen
    }

    fn reverse_reachable<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for link in self.forward_links().filter(|l| l.to_node == id) {
                queue.push_back(link.from_node.as_str());
            }
        }
        seen
    }
}
