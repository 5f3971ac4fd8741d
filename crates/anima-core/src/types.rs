use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one graph run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique session identifier (one chat surface with the companion).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which mode of thinking a run belongs to. Ambient context field; graphs
/// may branch on it but most nodes never look at it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CognitiveMode {
    /// Direct response to the user.
    #[default]
    Focus,
    /// Background idle thought.
    Drift,
    /// Self-review of past behavior.
    Reflect,
}

impl CognitiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Drift => "drift",
            Self::Reflect => "reflect",
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A flat chat message as consumed by the model router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Classification attached to an escalation request so the backend knows
/// what kind of wall the loop hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RepeatedFailure,
    IterationExhausted,
    ModelError,
    #[default]
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepeatedFailure => "repeated_failure",
            Self::IterationExhausted => "iteration_exhausted",
            Self::ModelError => "model_error",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "repeated_failure" => Self::RepeatedFailure,
            "iteration_exhausted" => Self::IterationExhausted,
            "model_error" => Self::ModelError,
            _ => Self::Unknown,
        }
    }
}

/// One record in the observe→think→act trail of a run or desire.
/// Append-only within a run; persisted externally for desires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub iteration: u32,
    pub thought: String,
    pub action: String,
    pub observation: String,
    /// Marked by the recording node when the observation was a failure.
    #[serde(default)]
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
}

impl ScratchpadEntry {
    pub fn new(
        iteration: u32,
        thought: impl Into<String>,
        action: impl Into<String>,
        observation: impl Into<String>,
    ) -> Self {
        Self {
            iteration,
            thought: thought.into(),
            action: action.into(),
            observation: observation.into(),
            failed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        iteration: u32,
        thought: impl Into<String>,
        action: impl Into<String>,
        observation: impl Into<String>,
    ) -> Self {
        Self {
            failed: true,
            ..Self::new(iteration, thought, action, observation)
        }
    }

    /// Lifecycle audit entry, recorded by the desire updater.
    pub fn audit(message: impl Into<String>) -> Self {
        Self {
            iteration: 0,
            thought: message.into(),
            action: "lifecycle".to_string(),
            observation: String::new(),
            failed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failed
    }
}
