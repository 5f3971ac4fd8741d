use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tracing::info;
use tracing_subscriber::EnvFilter;

use anima_core::config::AppConfig;
use anima_core::error::AnimaError;
use anima_core::event::EventBus;
use anima_core::traits::{
    CallOptions, EscalationBackend, EscalationOutcome, ModelResponse, ModelRouter,
};
use anima_core::types::{ChatMessage, ErrorClass, ScratchpadEntry, SessionId};

use anima_desire::{register_desire_nodes, DesireUpdater, SqliteDesireStore};
use anima_desire::planning::register_plan_generator;
use anima_engine::{
    register_builtin_nodes, register_escalation_node, register_model_nodes, register_react_nodes,
    Engine, Graph, NodeRegistry, RunContext,
};

#[derive(Parser)]
#[command(name = "anima", version, about = "Cognition core for the Anima companion platform")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "anima.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a graph file against the node registry
    Validate {
        /// Path to the graph JSON file
        graph: PathBuf,
    },
    /// Execute a graph file and print the final output
    Run {
        /// Path to the graph JSON file
        graph: PathBuf,
        /// Initial scratch values, key=value
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// Session ID (auto-generated if not provided)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Inspect the desire store
    Desires {
        #[command(subcommand)]
        action: DesireAction,
    },
}

#[derive(Subcommand)]
enum DesireAction {
    /// List all desires with their statuses
    List,
    /// Show one desire as JSON, with its scratchpad trail
    Show { id: String },
}

/// The model registry lives outside this binary; graphs that reach the
/// model boundary get a clear expected failure instead of a hang.
struct UnconfiguredRouter;

impl ModelRouter for UnconfiguredRouter {
    fn call_model(
        &self,
        role: &str,
        _messages: Vec<ChatMessage>,
        _options: CallOptions,
    ) -> BoxFuture<'_, anima_core::error::Result<ModelResponse>> {
        let role = role.to_string();
        Box::pin(async move {
            Err(AnimaError::ModelRequest {
                role,
                message: "no model router configured in the CLI".to_string(),
            })
        })
    }
}

struct UnconfiguredBackend;

impl EscalationBackend for UnconfiguredBackend {
    fn escalate(
        &self,
        _goal: &str,
        _scratchpad: &[ScratchpadEntry],
        _error_class: ErrorClass,
        _notes: &str,
    ) -> BoxFuture<'_, anima_core::error::Result<EscalationOutcome>> {
        Box::pin(async {
            Err(AnimaError::Escalation(
                "no escalation backend configured in the CLI".to_string(),
            ))
        })
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        Ok(AppConfig::load(path)?)
    } else {
        Ok(AppConfig::default())
    }
}

fn build_registry(config: &AppConfig) -> anyhow::Result<(NodeRegistry, Arc<DesireUpdater>)> {
    let store = Arc::new(SqliteDesireStore::open(PathBuf::from(&config.desires.db_path).as_path())?);
    let events = Arc::new(EventBus::new(config.engine.event_capacity));
    let updater = Arc::new(DesireUpdater::new(store, events, &config.desires));

    let mut registry = NodeRegistry::new();
    register_builtin_nodes(&mut registry)?;
    register_react_nodes(&mut registry, &config.react)?;
    register_escalation_node(&mut registry, Arc::new(UnconfiguredBackend), &config.escalation)?;
    register_model_nodes(
        &mut registry,
        Arc::new(UnconfiguredRouter),
        config.engine.node_timeout_secs,
    )?;
    register_desire_nodes(&mut registry, updater.clone())?;
    register_plan_generator(
        &mut registry,
        Arc::new(UnconfiguredRouter),
        config.engine.node_timeout_secs,
    )?;
    Ok((registry, updater))
}

fn load_graph(path: &PathBuf) -> anyhow::Result<Graph> {
    let raw = std::fs::read_to_string(path)?;
    Ok(Graph::from_json(&raw)?)
}

async fn cmd_validate(config: &AppConfig, path: &PathBuf) -> anyhow::Result<()> {
    let (registry, _) = build_registry(config)?;
    let graph = load_graph(path)?;
    graph.validate(&registry)?;
    println!(
        "{}: ok ({} nodes, {} links)",
        graph.name,
        graph.nodes.len(),
        graph.links.len()
    );
    Ok(())
}

async fn cmd_run(
    config: &AppConfig,
    path: &PathBuf,
    vars: &[String],
    session: Option<&str>,
) -> anyhow::Result<()> {
    let (registry, _) = build_registry(config)?;
    let graph = load_graph(path)?;
    graph.validate(&registry)?;

    let session_id = session
        .map(SessionId::from_str)
        .unwrap_or_default();
    let mut ctx = RunContext::new(session_id, "operator");
    for var in vars {
        let Some((key, value)) = var.split_once('=') else {
            anyhow::bail!("--var expects key=value, got '{}'", var);
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        ctx.set_scratch(key.to_string(), value);
    }

    let engine = Engine::new(Arc::new(registry), config.engine.clone());
    let result = engine.execute(&graph, ctx).await?;

    for record in &result.records {
        let state = if record.skipped {
            "skipped"
        } else if record.success {
            "ok"
        } else {
            "failed"
        };
        println!(
            "  {:<24} {:<8} {:>6}ms (visit {})",
            record.node_id, state, record.elapsed_ms, record.visit
        );
    }
    println!("total: {}ms ({:?})", result.total_elapsed_ms, result.outcome);
    if let Some(output) = result.final_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

async fn cmd_desires(config: &AppConfig, action: &DesireAction) -> anyhow::Result<()> {
    let store = SqliteDesireStore::open(PathBuf::from(&config.desires.db_path).as_path())?;
    match action {
        DesireAction::List => {
            use anima_core::traits::DesireStore;
            let desires = store.list_desires().await?;
            if desires.is_empty() {
                println!("no desires recorded");
                return Ok(());
            }
            for desire in desires {
                println!(
                    "{}  {:<10}  v{:<3} {}",
                    desire.id,
                    desire.status.as_str(),
                    desire.plan.as_ref().map(|p| p.version).unwrap_or(0),
                    desire.title
                );
            }
        }
        DesireAction::Show { id } => {
            use anima_core::traits::DesireStore;
            let desire = store.load_desire(id).await?;
            println!("{}", serde_json::to_string_pretty(&desire)?);
            let trail = store.load_scratchpad(id)?;
            for entry in trail {
                println!(
                    "  [{}] #{} {} / {} -> {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.iteration,
                    entry.action,
                    entry.thought,
                    entry.observation
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    info!(config = %cli.config.display(), "Anima starting");

    match &cli.command {
        Commands::Validate { graph } => cmd_validate(&config, graph).await,
        Commands::Run {
            graph,
            vars,
            session,
        } => cmd_run(&config, graph, vars, session.as_deref()).await,
        Commands::Desires { action } => cmd_desires(&config, action).await,
    }
}
