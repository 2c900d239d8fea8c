//! Fleet bootstrap
//!
//! Wires the control core to an in-memory simulated world so the whole loop
//! runs offline: scripted LLM (empty, so planning degrades to the
//! deterministic fallback), sim adapters with a small staged overworld, and
//! a SQLite audit trail. Swap the factory and client to point the same core
//! at a real server.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use voxel_agency::adapter::{AgentAdapter, SimAdapter, StaticBlueprints};
use voxel_agency::catalog::{GameCatalog, StaticCatalog};
use voxel_agency::config::FleetConfig;
use voxel_agency::fleet::{AdapterFactory, FleetOrchestrator};
use voxel_agency::llm::ScriptedLlm;
use voxel_agency::metrics::FleetMetrics;
use voxel_agency::model::Position;
use voxel_agency::store::SqliteStore;

/// Builds one simulated adapter per agent, each with a small staged world
/// around the base: trees, stone, a storage chest.
struct SimFleetFactory {
    catalog: Arc<dyn GameCatalog>,
}

impl AdapterFactory for SimFleetFactory {
    fn create(&self, agent_id: &str) -> Arc<dyn AgentAdapter> {
        let adapter = Arc::new(SimAdapter::new(agent_id, self.catalog.clone()));
        let staged = adapter.clone();
        tokio::spawn(async move {
            staged
                .stage_block("oak_log", Position::new(6.0, 64.0, 2.0))
                .await;
            staged
                .stage_block("oak_log", Position::new(8.0, 64.0, -3.0))
                .await;
            staged
                .stage_block("oak_log", Position::new(11.0, 64.0, 5.0))
                .await;
            staged
                .stage_block("stone", Position::new(14.0, 63.0, 0.0))
                .await;
            staged
                .stage_block("stone", Position::new(15.0, 63.0, 1.0))
                .await;
            staged
                .stage_block("chest", Position::new(1.0, 64.0, 1.0))
                .await;
        });
        adapter
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voxel_agency=info"));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config = Arc::new(FleetConfig::from_env());
    info!(bots = config.fleet.bot_count, "voxel agency starting");

    let db_path =
        std::env::var("VOXEL_DB_PATH").unwrap_or_else(|_| "voxel_agency.db".to_string());
    let store = Arc::new(SqliteStore::new(&db_path).await?);
    let metrics = FleetMetrics::new();
    let catalog: Arc<dyn GameCatalog> = Arc::new(StaticCatalog::basic_overworld());
    let blueprints = Arc::new(StaticBlueprints::new());
    // no model endpoint wired here: planning exercises the deterministic
    // fallback end to end
    let llm = Arc::new(ScriptedLlm::new());
    let factory = Arc::new(SimFleetFactory {
        catalog: catalog.clone(),
    });

    let fleet = FleetOrchestrator::start(
        config,
        store.clone(),
        metrics.clone(),
        catalog,
        blueprints,
        llm,
        factory,
    )
    .await?;

    info!(run_id = %fleet.run_id(), "fleet running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    fleet.stop().await;
    let snapshot = metrics.snapshot();
    info!(
        subgoals_ok = snapshot.subgoals_succeeded,
        subgoals_failed = snapshot.subgoals_failed,
        planner_fallback = snapshot.planner_fallback,
        "run summary"
    );
    Ok(())
}
