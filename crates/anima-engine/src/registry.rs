use std::collections::HashMap;
use std::sync::Arc;

use anima_core::error::{AnimaError, Result};

use crate::definition::NodeDefinition;

/// Mapping from node kind to its immutable definition. Pure data plus one
/// execute operation each; no per-run state lives here.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    defs: HashMap<String, Arc<NodeDefinition>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: NodeDefinition) -> Result<()> {
        if self.defs.contains_key(&def.kind) {
            return Err(AnimaError::DuplicateNode(def.kind));
        }
        self.defs.insert(def.kind.clone(), Arc::new(def));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<NodeDefinition>> {
        self.defs.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.defs.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
