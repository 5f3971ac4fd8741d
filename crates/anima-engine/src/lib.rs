pub mod builtin;
pub mod context;
pub mod definition;
pub mod executor;
pub mod graph;
pub mod message;
pub mod model;
pub mod react;
pub mod registry;
pub mod slot;

pub use builtin::register_builtin_nodes;
pub use context::RunContext;
pub use definition::{NodeDefinition, NodeExec, NodeOutput};
pub use executor::{Engine, NodeRecord, RunOutcome, RunResult};
pub use graph::{Graph, Link, NodeInstance};
pub use message::Message;
pub use model::register_model_nodes;
pub use react::{register_escalation_node, register_react_nodes, LoopOutcome};
pub use registry::NodeRegistry;
pub use slot::{SlotSpec, SlotType};
