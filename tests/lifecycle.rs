//! End-to-end lifecycle pass: a desire flows through
//! loader → planner → validator → updater as a graph run.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use anima_core::config::{AppConfig, DesireConfig};
use anima_core::desire::{Desire, DesireStatus, DesireUpdate};
use anima_core::error::Result;
use anima_core::event::EventBus;
use anima_core::traits::{CallOptions, DesireStore, ModelResponse, ModelRouter};
use anima_core::types::{ChatMessage, SessionId};

use anima_desire::planning::register_plan_generator;
use anima_desire::{register_desire_nodes, DesireUpdater, SqliteDesireStore};
use anima_engine::{Engine, Graph, NodeRegistry, RunContext};

struct ScriptedPlanner {
    reply: &'static str,
}

impl ModelRouter for ScriptedPlanner {
    fn call_model(
        &self,
        _role: &str,
        _messages: Vec<ChatMessage>,
        _options: CallOptions,
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let reply = self.reply.to_string();
        Box::pin(async move { Ok(ModelResponse { content: reply }) })
    }
}

struct Fixture {
    engine: Engine,
    updater: Arc<DesireUpdater>,
}

async fn fixture(planner_reply: &'static str) -> (Fixture, Desire) {
    let store = Arc::new(SqliteDesireStore::in_memory().unwrap());
    let events = Arc::new(EventBus::default());
    let updater = Arc::new(DesireUpdater::new(
        store,
        events,
        &DesireConfig::default(),
    ));

    let mut registry = NodeRegistry::new();
    register_desire_nodes(&mut registry, updater.clone()).unwrap();
    register_plan_generator(&mut registry, Arc::new(ScriptedPlanner { reply: planner_reply }), 10)
        .unwrap();

    // A desire that has reached planning.
    let desire = updater.create("learn the harmonica").await.unwrap();
    for status in [
        DesireStatus::Pending,
        DesireStatus::Evaluating,
        DesireStatus::Planning,
    ] {
        updater
            .update(&desire.id, DesireUpdate::status(status))
            .await
            .unwrap();
    }
    let desire = updater.store().load_desire(&desire.id).await.unwrap();

    let config = AppConfig::default();
    let engine = Engine::new(Arc::new(registry), config.engine);
    (Fixture { engine, updater }, desire)
}

fn planning_graph() -> Graph {
    Graph::new("plan-and-attach")
        .add_node("loader", "desire_loader")
        .add_node("planner", "plan_generator")
        .add_node("validator", "plan_validator")
        .add_node("updater", "desire_updater")
        .link("loader", "desire", "planner", "desire")
        .link("planner", "plan", "validator", "plan")
        .link("validator", "output0", "updater", "plan")
}

#[tokio::test]
async fn valid_plan_is_attached_to_the_desire() {
    let (fixture, desire) =
        fixture(r#"{"steps": [{"description": "buy a harmonica"}, {"description": "practice daily", "depends_on": [0]}]}"#)
            .await;

    let graph = planning_graph();
    graph.validate(fixture.engine.registry()).unwrap();

    let mut ctx = RunContext::new(SessionId::new(), "ada");
    ctx.set_scratch("desire_id", json!(desire.id));

    let result = fixture.engine.execute(&graph, ctx).await.unwrap();
    assert!(result.records.iter().all(|r| r.success), "{:?}", result.records);

    let stored = fixture.updater.store().load_desire(&desire.id).await.unwrap();
    let plan = stored.plan.expect("plan should be attached");
    assert_eq!(plan.version, 1);
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(stored.status, DesireStatus::Planning);
}

#[tokio::test]
async fn zero_step_plan_is_not_attached_and_status_is_unchanged() {
    let (fixture, desire) = fixture(r#"{"steps": []}"#).await;

    let graph = planning_graph();
    graph.validate(fixture.engine.registry()).unwrap();

    let mut ctx = RunContext::new(SessionId::new(), "ada");
    ctx.set_scratch("desire_id", json!(desire.id));

    let result = fixture.engine.execute(&graph, ctx).await.unwrap();

    let validator = result.outputs_of("validator").unwrap();
    assert_eq!(validator.get_bool("valid"), Some(false));

    let stored = fixture.updater.store().load_desire(&desire.id).await.unwrap();
    assert!(stored.plan.is_none(), "a null plan must not be attached");
    assert_eq!(stored.status, DesireStatus::Planning, "status must be unchanged");
}

#[tokio::test]
async fn retry_enrichment_feeds_lessons_into_the_next_plan_prompt() {
    // The enricher folds review lessons into the critique; a later plan
    // attach clears it.
    let (fixture, desire) = fixture(r#"{"steps": [{"description": "slow it down"}]}"#).await;

    let graph = Graph::new("enrich-then-plan")
        .add_node("loader", "desire_loader")
        .add_node("enricher", "desire_enricher")
        .add_node("planner", "plan_generator")
        .add_node("validator", "plan_validator")
        .add_node("updater", "desire_updater")
        .link("loader", "desire", "enricher", "desire")
        .link("enricher", "desire", "planner", "desire")
        .link("planner", "plan", "validator", "plan")
        .link("validator", "output0", "updater", "plan");
    graph.validate(fixture.engine.registry()).unwrap();

    let mut ctx = RunContext::new(SessionId::new(), "ada");
    ctx.set_scratch("desire_id", json!(desire.id));
    ctx.set_scratch("critique", json!("the tempo was off"));

    let result = fixture.engine.execute(&graph, ctx).await.unwrap();
    assert!(result.records.iter().all(|r| r.success));

    let enriched = result.outputs_of("enricher").unwrap();
    assert!(enriched
        .get_str("critique")
        .unwrap()
        .contains("the tempo was off"));

    // The attach cleared the critique: it has been addressed by the plan.
    let stored = fixture.updater.store().load_desire(&desire.id).await.unwrap();
    assert!(stored.plan.is_some());
    assert!(stored.user_critique.is_none());
}
