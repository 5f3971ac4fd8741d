use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnimaError, Result};

/// Top-level Anima configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub react: ReactConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub desires: DesireConfig,
}

/// Graph executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-node execution timeout in seconds. Ordinary loop iterations live
    /// on the tens-of-seconds scale.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Hard backstop on how many times a single node instance may re-fire
    /// across loop passes within one run.
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: usize,
    /// Event bus capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout_secs(),
            max_node_visits: default_max_node_visits(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_node_timeout_secs() -> u64 {
    30
}

fn default_max_node_visits() -> usize {
    100
}

fn default_event_capacity() -> usize {
    256
}

/// Iteration controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactConfig {
    /// Maximum observe→think→act passes before the loop is exhausted.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Consecutive failure observations before the stuck detector fires.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    /// Marker the completion checker looks for in observations.
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            failure_threshold: default_failure_threshold(),
            completion_marker: default_completion_marker(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_failure_threshold() -> usize {
    3
}

fn default_completion_marker() -> String {
    "TASK_COMPLETE".to_string()
}

/// Escalation backend configuration. The backend is a slow, high-capability
/// fallback — its budget is minutes, not seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_escalation_timeout_secs")]
    pub timeout_secs: u64,
    /// Logical role the model registry resolves for escalation calls.
    #[serde(default = "default_escalation_role")]
    pub model_role: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_escalation_timeout_secs(),
            model_role: default_escalation_role(),
        }
    }
}

fn default_escalation_timeout_secs() -> u64 {
    300
}

fn default_escalation_role() -> String {
    "escalation".to_string()
}

/// Desire lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesireConfig {
    /// Review-sourced retries allowed before a retry verdict is coerced to
    /// escalation.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Path to the desire store database.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for DesireConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            db_path: default_db_path(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_db_path() -> String {
    "anima/desires.db".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AnimaError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| AnimaError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Reject configurations that would disable the loop bound or the
    /// stuck detector outright.
    pub fn validate(&self) -> Result<()> {
        if self.react.max_iterations == 0 {
            return Err(AnimaError::Config(
                "react.max_iterations must be greater than 0".to_string(),
            ));
        }
        if self.react.failure_threshold == 0 {
            return Err(AnimaError::Config(
                "react.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.engine.node_timeout_secs == 0 {
            return Err(AnimaError::Config(
                "engine.node_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.engine.max_node_visits == 0 {
            return Err(AnimaError::Config(
                "engine.max_node_visits must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
