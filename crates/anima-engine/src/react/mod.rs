//! The bounded observe→think→act loop, expressed as ordinary registry
//! nodes: an iteration counter, a scratchpad recorder, a completion
//! checker, a stuck detector, and an escalation node. Composed inside a
//! graph they implement a loop that terminates as `completed`,
//! `exhausted`, or `escalated-resolved`.

mod escalate;
mod iteration;
mod stuck;

pub use escalate::register_escalation_node;

use anima_core::config::ReactConfig;
use anima_core::error::Result;

use crate::registry::NodeRegistry;

/// Scratch keys the loop nodes share within one run.
pub(crate) const SCRATCH_ITERATION: &str = "react.iteration";
pub(crate) const SCRATCH_SCRATCHPAD: &str = "react.scratchpad";

/// Terminal states of one loop instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The completion checker found the termination marker.
    Completed,
    /// The iteration limit was reached without completion.
    Exhausted,
    /// Escalation produced a final answer.
    EscalatedResolved,
}

impl LoopOutcome {
    /// Classify how a loop ended from the flags its nodes produced.
    pub fn classify(is_complete: bool, has_exceeded_max: bool, escalation_resolved: bool) -> Self {
        if is_complete {
            Self::Completed
        } else if escalation_resolved {
            Self::EscalatedResolved
        } else if has_exceeded_max {
            Self::Exhausted
        } else {
            // The loop is still live; callers only classify after it stops,
            // so treat this as exhaustion of whatever bound stopped it.
            Self::Exhausted
        }
    }
}

/// Register the iteration counter, completion checker, and stuck detector.
/// The escalation node needs a backend and registers separately.
pub fn register_react_nodes(registry: &mut NodeRegistry, config: &ReactConfig) -> Result<()> {
    iteration::register(registry, config)?;
    stuck::register(registry, config)?;
    Ok(())
}
