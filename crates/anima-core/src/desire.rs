use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AnimaError, Result};
use crate::types::ScratchpadEntry;

/// Lifecycle status of a desire. Transitions not listed in
/// [`DesireStatus::can_transition`] are illegal and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesireStatus {
    Nascent,
    Pending,
    Evaluating,
    Planning,
    Reviewing,
    Approved,
    Executing,
    Completed,
    Rejected,
    Abandoned,
    Failed,
}

impl DesireStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Abandoned | Self::Failed
        )
    }

    /// The explicit transition table. Forward chain
    /// nascent→pending→evaluating→planning→reviewing→approved→executing→completed,
    /// the retry cycle executing→reviewing→planning, and side exits to the
    /// terminal rejection statuses from any non-terminal state.
    pub fn can_transition(self, next: DesireStatus) -> bool {
        use DesireStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Rejected | Abandoned | Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Nascent, Pending)
                | (Pending, Evaluating)
                | (Evaluating, Planning)
                | (Planning, Reviewing)
                | (Reviewing, Approved)
                | (Reviewing, Planning)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, Reviewing)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nascent => "nascent",
            Self::Pending => "pending",
            Self::Evaluating => "evaluating",
            Self::Planning => "planning",
            Self::Reviewing => "reviewing",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
    }
}

impl std::fmt::Display for DesireStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    /// Skill or tool the step intends to use, if any.
    #[serde(default)]
    pub skill: Option<String>,
    /// Indices of steps that must run before this one.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// A versioned, ordered plan attached to a desire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(version: u32, steps: Vec<PlanStep>) -> Self {
        Self { version, steps }
    }

    /// Structural well-formedness: non-empty steps, non-blank descriptions,
    /// no self-dependency, dependency indices in range.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AnimaError::InvalidPlan("plan has no steps".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.description.trim().is_empty() {
                return Err(AnimaError::InvalidPlan(format!(
                    "step {} has an empty description",
                    i
                )));
            }
            for &dep in &step.depends_on {
                if dep == i {
                    return Err(AnimaError::InvalidPlan(format!(
                        "step {} depends on itself",
                        i
                    )));
                }
                if dep >= self.steps.len() {
                    return Err(AnimaError::InvalidPlan(format!(
                        "step {} depends on missing step {}",
                        i, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Closed verdict set produced by an outcome review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Completed,
    Continue,
    Abandon,
    Retry,
    Escalate,
}

impl Verdict {
    /// Parse a raw verdict string. Anything unknown or absent fails safe
    /// toward human attention, never toward silent completion.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("completed") => Self::Completed,
            Some("continue") => Self::Continue,
            Some("abandon") => Self::Abandon,
            Some("retry") => Self::Retry,
            Some("escalate") => Self::Escalate,
            _ => Self::Escalate,
        }
    }

    /// Which of the three router branches this verdict selects:
    /// 0 terminal, 1 retry, 2 escalate.
    pub fn route(&self) -> usize {
        match self {
            Self::Completed | Self::Continue | Self::Abandon => 0,
            Self::Retry => 1,
            Self::Escalate => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Continue => "continue",
            Self::Abandon => "abandon",
            Self::Retry => "retry",
            Self::Escalate => "escalate",
        }
    }
}

/// Review of one execution attempt, produced by the reviewer and consumed
/// by the verdict router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReview {
    pub verdict: Verdict,
    /// 0.0 to 1.0.
    pub success_score: f64,
    pub reasoning: String,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default)]
    pub next_attempt_suggestions: Vec<String>,
}

/// Where a rejection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionSource {
    Review,
    User,
    System,
}

impl RejectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::User => "user",
            Self::System => "system",
        }
    }
}

/// A recorded rejection. Only review-sourced rejections leave the desire
/// eligible for another attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub reason: String,
    pub source: RejectionSource,
    pub can_retry: bool,
    pub timestamp: DateTime<Utc>,
}

impl RejectionRecord {
    pub fn new(reason: impl Into<String>, source: RejectionSource) -> Self {
        Self {
            reason: reason.into(),
            source,
            can_retry: source == RejectionSource::Review,
            timestamp: Utc::now(),
        }
    }
}

/// A unit of autonomous goal-directed work. Owns zero or one active plan
/// and one outcome review at a time; prior plans and reviews are retained
/// in history. Never deleted — only transitioned to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Desire {
    pub id: String,
    pub title: String,
    pub status: DesireStatus,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub review: Option<OutcomeReview>,
    #[serde(default)]
    pub rejections: Vec<RejectionRecord>,
    #[serde(default)]
    pub plan_history: Vec<Plan>,
    #[serde(default)]
    pub user_critique: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single mutation against a desire. Fields are independent; the updater
/// applies whichever are present as one logical update.
#[derive(Debug, Clone, Default)]
pub struct DesireUpdate {
    pub status: Option<DesireStatus>,
    pub plan: Option<Plan>,
    pub review: Option<OutcomeReview>,
    pub rejection: Option<RejectionRecord>,
    pub critique: Option<String>,
}

impl DesireUpdate {
    pub fn status(status: DesireStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn plan(plan: Plan) -> Self {
        Self {
            plan: Some(plan),
            ..Default::default()
        }
    }

    pub fn review(review: OutcomeReview) -> Self {
        Self {
            review: Some(review),
            ..Default::default()
        }
    }

    pub fn rejection(rejection: RejectionRecord) -> Self {
        Self {
            rejection: Some(rejection),
            ..Default::default()
        }
    }
}

impl Desire {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            status: DesireStatus::Nascent,
            plan: None,
            review: None,
            rejections: Vec::new(),
            plan_history: Vec::new(),
            user_critique: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// How many eligible retries this desire has consumed.
    pub fn retry_count(&self) -> usize {
        self.rejections.iter().filter(|r| r.can_retry).count()
    }

    /// Apply one update, returning the mutated desire and the audit trail
    /// entries describing what changed. Transition legality is checked
    /// here, centrally — callers cannot bypass the table.
    pub fn apply(mut self, update: DesireUpdate) -> Result<(Desire, Vec<ScratchpadEntry>)> {
        let mut audit = Vec::new();
        let now = Utc::now();

        if let Some(next) = update.status {
            if !self.status.can_transition(next) {
                return Err(AnimaError::InvalidTransition {
                    from: self.status.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }
            audit.push(ScratchpadEntry::audit(format!(
                "status {} -> {}",
                self.status, next
            )));
            self.status = next;
            if next.is_terminal() {
                self.completed_at = Some(now);
            }
        }

        if let Some(critique) = update.critique {
            self.user_critique = Some(critique);
        }

        if let Some(plan) = update.plan {
            plan.validate()?;
            if let Some(old) = self.plan.take() {
                self.plan_history.push(old);
            }
            audit.push(ScratchpadEntry::audit(format!(
                "plan v{} attached ({} steps)",
                plan.version,
                plan.steps.len()
            )));
            self.plan = Some(plan);
            // The pending critique has now been addressed by the new plan.
            self.user_critique = None;
        }

        if let Some(review) = update.review {
            audit.push(ScratchpadEntry::audit(format!(
                "review recorded: verdict {}, score {:.2}",
                review.verdict.as_str(),
                review.success_score
            )));
            self.review = Some(review);
        }

        if let Some(rejection) = update.rejection {
            audit.push(ScratchpadEntry::audit(format!(
                "rejected ({}): {}",
                rejection.source.as_str(),
                rejection.reason
            )));
            self.rejections.push(rejection);
        }

        self.updated_at = now;
        Ok((self, audit))
    }
}
