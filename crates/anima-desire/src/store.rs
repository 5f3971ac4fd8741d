use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use anima_core::desire::{Desire, OutcomeReview, Plan};
use anima_core::error::{AnimaError, Result};
use anima_core::traits::DesireStore;
use anima_core::types::ScratchpadEntry;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS desires (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        status TEXT NOT NULL,
        document TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_desires_status
        ON desires(status, updated_at);

    CREATE TABLE IF NOT EXISTS plans (
        desire_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        document TEXT NOT NULL,
        PRIMARY KEY (desire_id, version)
    );

    CREATE TABLE IF NOT EXISTS outcome_reviews (
        desire_id TEXT PRIMARY KEY,
        document TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS scratchpad (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        desire_id TEXT NOT NULL,
        document TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_scratchpad_desire
        ON scratchpad(desire_id, id);
";

/// SQLite-backed desire store. Documents are stored whole — saves replace
/// the full row, scratchpad entries append; there is no partial-field
/// patching at this layer.
pub struct SqliteDesireStore {
    conn: Mutex<Connection>,
}

impl SqliteDesireStore {
    /// Open or create the desire database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AnimaError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| AnimaError::Database(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| AnimaError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| AnimaError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Desire store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| AnimaError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| AnimaError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// The full scratchpad trail for a desire, oldest first.
    pub fn load_scratchpad(&self, desire_id: &str) -> Result<Vec<ScratchpadEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AnimaError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT document FROM scratchpad WHERE desire_id = ?1 ORDER BY id ASC")
            .map_err(|e| AnimaError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![desire_id], |row| row.get::<_, String>(0))
            .map_err(|e| AnimaError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let doc = row.map_err(|e| AnimaError::Database(e.to_string()))?;
            entries.push(serde_json::from_str(&doc)?);
        }
        Ok(entries)
    }

    /// All stored plan versions for a desire, oldest first.
    pub fn load_plans(&self, desire_id: &str) -> Result<Vec<Plan>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AnimaError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT document FROM plans WHERE desire_id = ?1 ORDER BY version ASC")
            .map_err(|e| AnimaError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![desire_id], |row| row.get::<_, String>(0))
            .map_err(|e| AnimaError::Database(e.to_string()))?;

        let mut plans = Vec::new();
        for row in rows {
            let doc = row.map_err(|e| AnimaError::Database(e.to_string()))?;
            plans.push(serde_json::from_str(&doc)?);
        }
        Ok(plans)
    }
}

impl DesireStore for SqliteDesireStore {
    fn save_desire(&self, desire: &Desire) -> BoxFuture<'_, Result<()>> {
        let document = serde_json::to_string(desire);
        let id = desire.id.clone();
        let title = desire.title.clone();
        let status = desire.status.as_str();
        let updated_at = desire.updated_at.to_rfc3339();

        Box::pin(async move {
            let document = document?;
            let conn = self
                .conn
                .lock()
                .map_err(|e| AnimaError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO desires (id, title, status, document, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     status = excluded.status,
                     document = excluded.document,
                     updated_at = excluded.updated_at",
                params![id, title, status, document, updated_at],
            )
            .map_err(|e| AnimaError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn save_plan(&self, desire_id: &str, plan: &Plan) -> BoxFuture<'_, Result<()>> {
        let desire_id = desire_id.to_string();
        let version = plan.version;
        let document = serde_json::to_string(plan);

        Box::pin(async move {
            let document = document?;
            let conn = self
                .conn
                .lock()
                .map_err(|e| AnimaError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO plans (desire_id, version, document) VALUES (?1, ?2, ?3)
                 ON CONFLICT(desire_id, version) DO UPDATE SET document = excluded.document",
                params![desire_id, version, document],
            )
            .map_err(|e| AnimaError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn save_outcome_review(
        &self,
        desire_id: &str,
        review: &OutcomeReview,
    ) -> BoxFuture<'_, Result<()>> {
        let desire_id = desire_id.to_string();
        let document = serde_json::to_string(review);

        Box::pin(async move {
            let document = document?;
            let conn = self
                .conn
                .lock()
                .map_err(|e| AnimaError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO outcome_reviews (desire_id, document) VALUES (?1, ?2)
                 ON CONFLICT(desire_id) DO UPDATE SET document = excluded.document",
                params![desire_id, document],
            )
            .map_err(|e| AnimaError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn append_scratchpad_entry(
        &self,
        desire_id: &str,
        entry: &ScratchpadEntry,
    ) -> BoxFuture<'_, Result<()>> {
        let desire_id = desire_id.to_string();
        let document = serde_json::to_string(entry);
        let timestamp = entry.timestamp.to_rfc3339();

        Box::pin(async move {
            let document = document?;
            let conn = self
                .conn
                .lock()
                .map_err(|e| AnimaError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO scratchpad (desire_id, document, timestamp) VALUES (?1, ?2, ?3)",
                params![desire_id, document, timestamp],
            )
            .map_err(|e| AnimaError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn load_desire(&self, desire_id: &str) -> BoxFuture<'_, Result<Desire>> {
        let desire_id = desire_id.to_string();

        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AnimaError::Database(e.to_string()))?;
            let document: Option<String> = conn
                .query_row(
                    "SELECT document FROM desires WHERE id = ?1",
                    params![desire_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(AnimaError::Database(other.to_string())),
                })?;

            match document {
                Some(doc) => Ok(serde_json::from_str(&doc)?),
                None => Err(AnimaError::DesireNotFound(desire_id)),
            }
        })
    }

    fn list_desires(&self) -> BoxFuture<'_, Result<Vec<Desire>>> {
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| AnimaError::Database(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT document FROM desires ORDER BY updated_at DESC")
                .map_err(|e| AnimaError::Database(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| AnimaError::Database(e.to_string()))?;

            let mut desires = Vec::new();
            for row in rows {
                let doc = row.map_err(|e| AnimaError::Database(e.to_string()))?;
                desires.push(serde_json::from_str(&doc)?);
            }
            Ok(desires)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_core::desire::{DesireStatus, PlanStep, Verdict};

    fn sample_plan(version: u32) -> Plan {
        Plan::new(
            version,
            vec![
                PlanStep {
                    description: "gather references".to_string(),
                    skill: Some("web_search".to_string()),
                    depends_on: vec![],
                },
                PlanStep {
                    description: "draft the piece".to_string(),
                    skill: None,
                    depends_on: vec![0],
                },
            ],
        )
    }

    #[tokio::test]
    async fn desire_roundtrip_is_field_for_field() {
        let store = SqliteDesireStore::in_memory().unwrap();

        let mut desire = Desire::new("write a poem");
        desire.status = DesireStatus::Planning;
        desire.plan = Some(sample_plan(2));
        desire.plan_history = vec![sample_plan(1)];
        desire.review = Some(OutcomeReview {
            verdict: Verdict::Retry,
            success_score: 0.3,
            reasoning: "rhyme scheme fell apart".to_string(),
            lessons: vec!["fewer couplets".to_string()],
            next_attempt_suggestions: vec!["try free verse".to_string()],
        });
        desire.user_critique = Some("make it shorter".to_string());

        store.save_desire(&desire).await.unwrap();
        let loaded = store.load_desire(&desire.id).await.unwrap();

        assert_eq!(loaded.status, desire.status);
        assert_eq!(loaded.plan_history.len(), desire.plan_history.len());
        assert_eq!(loaded.review, desire.review);
        assert_eq!(loaded, desire);
    }

    #[tokio::test]
    async fn save_is_replace_whole_document() {
        let store = SqliteDesireStore::in_memory().unwrap();
        let mut desire = Desire::new("first title");
        store.save_desire(&desire).await.unwrap();

        desire.title = "second title".to_string();
        store.save_desire(&desire).await.unwrap();

        let loaded = store.load_desire(&desire.id).await.unwrap();
        assert_eq!(loaded.title, "second title");
        assert_eq!(store.list_desires().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_desire_is_not_found() {
        let store = SqliteDesireStore::in_memory().unwrap();
        let err = store.load_desire("no-such-id").await.unwrap_err();
        assert!(matches!(err, AnimaError::DesireNotFound(_)));
    }

    #[tokio::test]
    async fn scratchpad_appends_in_order() {
        let store = SqliteDesireStore::in_memory().unwrap();
        let desire = Desire::new("keep a journal");
        store.save_desire(&desire).await.unwrap();

        for i in 1..=3 {
            let entry = ScratchpadEntry::new(i, format!("thought {}", i), "act", "obs");
            store.append_scratchpad_entry(&desire.id, &entry).await.unwrap();
        }

        let entries = store.load_scratchpad(&desire.id).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].iteration, 1);
        assert_eq!(entries[2].iteration, 3);
    }

    #[tokio::test]
    async fn plans_keep_every_version() {
        let store = SqliteDesireStore::in_memory().unwrap();
        let desire = Desire::new("versioned work");
        store.save_desire(&desire).await.unwrap();

        store.save_plan(&desire.id, &sample_plan(1)).await.unwrap();
        store.save_plan(&desire.id, &sample_plan(2)).await.unwrap();

        let plans = store.load_plans(&desire.id).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].version, 1);
        assert_eq!(plans[1].version, 2);
    }

    #[tokio::test]
    async fn review_save_replaces() {
        let store = SqliteDesireStore::in_memory().unwrap();
        let desire = Desire::new("reviewed work");
        store.save_desire(&desire).await.unwrap();

        let review = OutcomeReview {
            verdict: Verdict::Completed,
            success_score: 0.9,
            reasoning: "good".to_string(),
            lessons: vec![],
            next_attempt_suggestions: vec![],
        };
        store.save_outcome_review(&desire.id, &review).await.unwrap();
        store.save_outcome_review(&desire.id, &review).await.unwrap();
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desires.db");

        let desire = Desire::new("durable");
        {
            let store = SqliteDesireStore::open(&path).unwrap();
            store.save_desire(&desire).await.unwrap();
        }

        let store = SqliteDesireStore::open(&path).unwrap();
        let loaded = store.load_desire(&desire.id).await.unwrap();
        assert_eq!(loaded.title, "durable");
    }
}
