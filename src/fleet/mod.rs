//! Fleet Orchestrator
//!
//! Owns the shared services and the controller lifecycle: builds the rate
//! limiter, lock manager and admission limiters once, spawns one controller
//! per agent with a start stagger, keeps the fleet gauges fresh, and tears
//! everything down in order on stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::adapter::{AgentAdapter, BlueprintSource};
use crate::catalog::GameCatalog;
use crate::config::FleetConfig;
use crate::controller::{AgentController, ControllerDeps, ControllerStatus};
use crate::coord::{ExplorerLimiter, LockManager, RateLimiter, SkillLimiter};
use crate::emit_event;
use crate::events::FleetEvent;
use crate::llm::LlmClient;
use crate::metrics::FleetMetrics;
use crate::planner::PlannerService;
use crate::skills::SkillEngine;
use crate::store::Store;

const GAUGE_PERIOD_MS: u64 = 2_000;

/// Creates one adapter handle per agent; the implementation decides what
/// kind of client sits behind it.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, agent_id: &str) -> Arc<dyn AgentAdapter>;
}

pub struct FleetOrchestrator {
    run_id: String,
    controllers: Vec<Arc<AgentController>>,
    gauge_task: Option<JoinHandle<()>>,
    store: Arc<dyn Store>,
}

impl FleetOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        config: Arc<FleetConfig>,
        store: Arc<dyn Store>,
        metrics: Arc<FleetMetrics>,
        catalog: Arc<dyn GameCatalog>,
        blueprints: Arc<dyn BlueprintSource>,
        llm: Arc<dyn LlmClient>,
        adapters: Arc<dyn AdapterFactory>,
    ) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        store.open_run(&run_id).await?;
        info!(run_id = %run_id, bots = config.fleet.bot_count, "fleet starting");

        let rate_limiter = Arc::new(RateLimiter::new(
            config.planner.llm_per_bot_hourly_cap,
            config.planner.llm_global_hourly_cap,
        ));
        let locks = Arc::new(
            LockManager::new(config.coordination.lock_lease_ms as i64)
                .with_store(store.clone()),
        );
        let explorers = Arc::new(ExplorerLimiter::new(
            config.coordination.max_concurrent_explorers as usize,
        ));
        let skill_limiter = Arc::new(SkillLimiter::new(
            config.skills.max_concurrent_skills as usize,
        ));
        let engine = Arc::new(SkillEngine::new(
            locks,
            explorers,
            config.coordination.lock_heartbeat_ms,
        ));
        let planner = Arc::new(
            PlannerService::new(
                llm,
                rate_limiter,
                catalog.clone(),
                config.planner.clone(),
                config.base_position(),
            )
            .with_store(store.clone())
            .with_metrics(metrics.clone()),
        );

        let mut controllers = Vec::new();
        for index in 0..config.fleet.bot_count {
            let agent_id = format!("bot-{}", index);
            store.register_bot(&run_id, &agent_id).await?;
            let deps = ControllerDeps {
                agent_id,
                run_id: run_id.clone(),
                adapter: adapters.create(&format!("bot-{}", index)),
                catalog: catalog.clone(),
                blueprints: blueprints.clone(),
                planner: planner.clone(),
                engine: engine.clone(),
                skill_limiter: skill_limiter.clone(),
                store: store.clone(),
                metrics: metrics.clone(),
                config: config.clone(),
            };
            controllers.push(AgentController::launch(deps).await);
            if index + 1 < config.fleet.bot_count {
                tokio::time::sleep(Duration::from_millis(config.fleet.bot_start_stagger_ms))
                    .await;
            }
        }

        let gauge_task = Some(Self::spawn_gauges(controllers.clone(), metrics));
        emit_event!(FleetEvent::StatusUpdate(format!(
            "fleet up with {} bots",
            controllers.len()
        )));

        Ok(Self {
            run_id,
            controllers,
            gauge_task,
            store,
        })
    }

    fn spawn_gauges(
        controllers: Vec<Arc<AgentController>>,
        metrics: Arc<FleetMetrics>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(GAUGE_PERIOD_MS));
            loop {
                interval.tick().await;
                let mut connected = 0u64;
                let mut busy = 0u64;
                for controller in &controllers {
                    match controller.status().await {
                        ControllerStatus::Disconnected => {}
                        ControllerStatus::Executing => {
                            connected += 1;
                            busy += 1;
                        }
                        _ => connected += 1,
                    }
                }
                metrics.set_fleet_gauges(connected, busy);
            }
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn controllers(&self) -> &[Arc<AgentController>] {
        &self.controllers
    }

    /// Ordered shutdown: gauges first, then every controller, then the run
    /// row. No skill dispatches once this begins.
    pub async fn stop(mut self) {
        if let Some(handle) = self.gauge_task.take() {
            handle.abort();
        }
        join_all(self.controllers.iter().map(|c| c.stop())).await;
        if let Err(e) = self.store.close_run(&self.run_id).await {
            tracing::warn!(error = %e, "failed to close run row");
        }
        emit_event!(FleetEvent::StatusUpdate("fleet stopped".to_string()));
        info!(run_id = %self.run_id, "fleet stopped");
    }
}
