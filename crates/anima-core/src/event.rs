use crate::types::RunId;

/// Engine event broadcast to all subscribers. This is both the progress
/// feed for front ends and the boundary the audit sink consumes.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A graph run started.
    RunStarted { run_id: RunId, graph: String },
    /// A node began executing.
    NodeStarted { run_id: RunId, node_id: String },
    /// A node finished (success covers failure-shaped outputs too — those
    /// are data, not faults).
    NodeFinished {
        run_id: RunId,
        node_id: String,
        success: bool,
        elapsed_ms: u64,
    },
    /// A node was skipped because its upstream branch did not fire.
    NodeSkipped { run_id: RunId, node_id: String },
    /// The run completed.
    RunCompleted { run_id: RunId, total_elapsed_ms: u64 },
    /// The run aborted on a fault.
    RunFailed { run_id: RunId, error: String },
    /// The run was cancelled cooperatively.
    RunCancelled { run_id: RunId },
    /// The iteration controller advanced.
    LoopIteration { run_id: RunId, iteration: u32 },
    /// The stuck detector fired.
    StuckDetected { run_id: RunId, diagnosis: String },
    /// An escalation call was dispatched.
    EscalationStarted { run_id: RunId, error_class: String },
    /// The escalation backend answered.
    EscalationResolved { run_id: RunId, resolved: bool },
    /// A desire changed status.
    DesireTransition {
        desire_id: String,
        from: String,
        to: String,
    },
    /// A desire recorded a rejection.
    DesireRejected {
        desire_id: String,
        reason: String,
        source: String,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
