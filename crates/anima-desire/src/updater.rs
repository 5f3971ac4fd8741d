use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use anima_core::config::DesireConfig;
use anima_core::desire::{Desire, DesireUpdate, Verdict};
use anima_core::error::Result;
use anima_core::event::{EngineEvent, EventBus};
use anima_core::traits::DesireStore;

/// The single mutation point for desires.
///
/// Every change goes through [`DesireUpdater::update`]: it takes the
/// per-desire write lock, loads the document, applies the update through
/// the transition table, and persists the desire together with any attached
/// plan, review, and audit entries as one logical update. Concurrent
/// updates to the same desire id serialize; different ids proceed
/// independently.
pub struct DesireUpdater {
    store: Arc<dyn DesireStore>,
    events: Arc<EventBus>,
    max_retries: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DesireUpdater {
    pub fn new(store: Arc<dyn DesireStore>, events: Arc<EventBus>, config: &DesireConfig) -> Self {
        Self {
            store,
            events,
            max_retries: config.max_retries,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn DesireStore> {
        &self.store
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    async fn lock_for(&self, desire_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(desire_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create and persist a new desire in its nascent state.
    pub async fn create(&self, title: impl Into<String>) -> Result<Desire> {
        let desire = Desire::new(title);
        self.store.save_desire(&desire).await?;
        info!(desire_id = %desire.id, title = %desire.title, "Desire created");
        Ok(desire)
    }

    /// Apply one update to a stored desire.
    pub async fn update(&self, desire_id: &str, update: DesireUpdate) -> Result<Desire> {
        let lock = self.lock_for(desire_id).await;
        let _guard = lock.lock().await;

        let desire = self.store.load_desire(desire_id).await?;
        let from = desire.status;

        let has_plan = update.plan.is_some();
        let has_review = update.review.is_some();
        let rejection = update.rejection.clone();

        let (desire, audit) = desire.apply(update)?;

        self.store.save_desire(&desire).await?;
        if has_plan {
            if let Some(plan) = &desire.plan {
                self.store.save_plan(desire_id, plan).await?;
            }
        }
        if has_review {
            if let Some(review) = &desire.review {
                self.store.save_outcome_review(desire_id, review).await?;
            }
        }
        for entry in &audit {
            self.store.append_scratchpad_entry(desire_id, entry).await?;
        }

        if desire.status != from {
            info!(
                desire_id,
                from = from.as_str(),
                to = desire.status.as_str(),
                "Desire transitioned"
            );
            self.events.publish(EngineEvent::DesireTransition {
                desire_id: desire_id.to_string(),
                from: from.as_str().to_string(),
                to: desire.status.as_str().to_string(),
            });
        }
        if let Some(rejection) = rejection {
            self.events.publish(EngineEvent::DesireRejected {
                desire_id: desire_id.to_string(),
                reason: rejection.reason,
                source: rejection.source.as_str().to_string(),
            });
        }

        Ok(desire)
    }

    /// Apply the retry budget: a retry verdict on a desire that has already
    /// consumed its budget is coerced to escalation. Returns the effective
    /// verdict and whether coercion happened.
    pub fn effective_verdict(&self, desire: &Desire, verdict: Verdict) -> (Verdict, bool) {
        if verdict == Verdict::Retry && desire.retry_count() >= self.max_retries {
            warn!(
                desire_id = %desire.id,
                retries = desire.retry_count(),
                max_retries = self.max_retries,
                "Retry budget exhausted, escalating instead"
            );
            (Verdict::Escalate, true)
        } else {
            (verdict, false)
        }
    }
}
