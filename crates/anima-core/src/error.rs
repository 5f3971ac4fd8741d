use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnimaError {
    // Model routing errors
    #[error("Model call failed for role '{role}': {message}")]
    ModelRequest { role: String, message: String },

    #[error("Model call timed out after {timeout_secs}s for role '{role}'")]
    ModelTimeout { role: String, timeout_secs: u64 },

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    // Escalation errors
    #[error("Escalation backend failed: {0}")]
    Escalation(String),

    #[error("Escalation timed out after {0}s")]
    EscalationTimeout(u64),

    // Graph errors
    #[error("Graph validation failed: {0}")]
    GraphValidation(String),

    #[error("Node kind not registered: {0}")]
    NodeNotFound(String),

    #[error("Node kind already registered: {0}")]
    DuplicateNode(String),

    #[error("Required input '{slot}' missing on node '{node}'")]
    MissingInput { node: String, slot: String },

    #[error("Node '{node}' timed out after {timeout_secs}s")]
    NodeTimeout { node: String, timeout_secs: u64 },

    #[error("Node visit cap exceeded on '{node}' ({visits} visits)")]
    VisitCapExceeded { node: String, visits: usize },

    #[error("Run cancelled")]
    Cancelled,

    // Desire errors
    #[error("Illegal desire transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Desire not found: {0}")]
    DesireNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnimaError>;
