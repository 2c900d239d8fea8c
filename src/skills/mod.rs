//! Skill Engine
//!
//! Dispatches subgoals to their deterministic handlers. The engine owns the
//! cross-agent discipline around a skill run: resource locks with heartbeat
//! renewal, exploration admission, and wrapping stray handler errors into
//! structured failures. Handlers themselves live in `handlers`.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::adapter::{AgentAdapter, BlueprintSource};
use crate::catalog::GameCatalog;
use crate::coord::{ExplorerLimiter, LockManager};
use crate::model::{FailureCode, Position, SkillResult, Subgoal, SubgoalName};

/// Everything a handler may touch while running one subgoal.
pub struct SkillContext {
    pub agent_id: String,
    pub adapter: Arc<dyn AgentAdapter>,
    pub catalog: Arc<dyn GameCatalog>,
    pub blueprints: Arc<dyn BlueprintSource>,
    pub base: Position,
    pub base_radius: f64,
}

pub struct SkillEngine {
    locks: Arc<LockManager>,
    explorers: Arc<ExplorerLimiter>,
    lock_heartbeat_ms: u64,
}

impl SkillEngine {
    pub fn new(
        locks: Arc<LockManager>,
        explorers: Arc<ExplorerLimiter>,
        lock_heartbeat_ms: u64,
    ) -> Self {
        Self {
            locks,
            explorers,
            lock_heartbeat_ms,
        }
    }

    /// Resource key a subgoal must hold while it runs, if any.
    fn lock_key_for(subgoal: &Subgoal) -> Option<String> {
        match subgoal.name {
            SubgoalName::Collect => subgoal
                .str_param("block")
                .or_else(|| subgoal.str_param("item"))
                .map(|target| format!("resource:{}", target)),
            SubgoalName::BuildBlueprint => {
                let anchor = subgoal.params.get("anchor")?.as_object()?;
                let x = anchor.get("x")?.as_i64()?;
                let y = anchor.get("y")?.as_i64()?;
                let z = anchor.get("z")?.as_i64()?;
                Some(format!("build:{},{},{}", x, y, z))
            }
            SubgoalName::Deposit | SubgoalName::Withdraw => Some("storage:base".to_string()),
            _ => None,
        }
    }

    pub async fn execute(&self, ctx: &SkillContext, subgoal: &Subgoal) -> SkillResult {
        if subgoal.name == SubgoalName::Explore
            && !self.explorers.try_enter(&ctx.agent_id).await
        {
            return SkillResult::failure(
                FailureCode::DependsOnItem,
                "exploration slots full",
                true,
            );
        }

        let lock_key = Self::lock_key_for(subgoal);
        if let Some(key) = &lock_key {
            if !self.locks.acquire(key, &ctx.agent_id).await {
                if subgoal.name == SubgoalName::Explore {
                    self.explorers.leave(&ctx.agent_id).await;
                }
                return SkillResult::failure(
                    FailureCode::DependsOnItem,
                    format!("resource locked: {}", key),
                    true,
                );
            }
        }

        let ticker = lock_key.as_ref().map(|key| {
            let locks = self.locks.clone();
            let key = key.clone();
            let owner = ctx.agent_id.clone();
            let period = Duration::from_millis(self.lock_heartbeat_ms.max(100));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await; // immediate first tick
                loop {
                    interval.tick().await;
                    if !locks.heartbeat(&key, &owner).await {
                        warn!(key = %key, owner = %owner, "lock heartbeat lost");
                        break;
                    }
                }
            })
        });

        debug!(agent = %ctx.agent_id, subgoal = %subgoal.name, "dispatching skill");
        let result = match handlers::run(ctx, subgoal).await {
            Ok(result) => result,
            Err(e) => SkillResult::failure(FailureCode::DependsOnItem, e.to_string(), false),
        };

        if let Some(handle) = ticker {
            handle.abort();
        }
        if let Some(key) = &lock_key {
            self.locks.release(key, &ctx.agent_id).await;
        }
        if subgoal.name == SubgoalName::Explore {
            self.explorers.leave(&ctx.agent_id).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{SimAdapter, StaticBlueprints};
    use crate::catalog::StaticCatalog;

    async fn context(agent_id: &str) -> SkillContext {
        let catalog: Arc<dyn GameCatalog> = Arc::new(StaticCatalog::basic_overworld());
        let adapter = Arc::new(SimAdapter::new(agent_id, catalog.clone()));
        adapter.connect().await.unwrap();
        SkillContext {
            agent_id: agent_id.to_string(),
            adapter,
            catalog,
            blueprints: Arc::new(StaticBlueprints::new()),
            base: Position::new(0.0, 64.0, 0.0),
            base_radius: 16.0,
        }
    }

    fn engine() -> SkillEngine {
        SkillEngine::new(
            Arc::new(LockManager::new(30_000)),
            Arc::new(ExplorerLimiter::new(2)),
            10_000,
        )
    }

    #[test]
    fn test_lock_keys() {
        let collect = Subgoal::new(SubgoalName::Collect).with_param("block", "oak_log");
        assert_eq!(
            SkillEngine::lock_key_for(&collect).as_deref(),
            Some("resource:oak_log")
        );

        let deposit = Subgoal::new(SubgoalName::Deposit);
        assert_eq!(
            SkillEngine::lock_key_for(&deposit).as_deref(),
            Some("storage:base")
        );

        let build = Subgoal::new(SubgoalName::BuildBlueprint).with_param(
            "anchor",
            serde_json::json!({"x": 1, "y": 64, "z": -3}),
        );
        assert_eq!(
            SkillEngine::lock_key_for(&build).as_deref(),
            Some("build:1,64,-3")
        );

        let goto = Subgoal::new(SubgoalName::Goto);
        assert_eq!(SkillEngine::lock_key_for(&goto), None);

        // a float anchor produces no build lock
        let loose = Subgoal::new(SubgoalName::BuildBlueprint).with_param(
            "anchor",
            serde_json::json!({"x": 1.5, "y": 64.0, "z": -3.0}),
        );
        assert_eq!(SkillEngine::lock_key_for(&loose), None);
    }

    #[tokio::test]
    async fn test_locked_resource_refuses_with_retryable_failure() {
        let engine = engine();
        let ctx = context("bot-b").await;
        // another agent holds the resource
        assert!(engine.locks.acquire("resource:oak_log", "bot-a").await);

        let subgoal = Subgoal::new(SubgoalName::Collect)
            .with_param("block", "oak_log")
            .with_param("count", 1);
        let result = engine.execute(&ctx, &subgoal).await;
        match result {
            SkillResult::Failure {
                code, retryable, ..
            } => {
                assert_eq!(code, FailureCode::DependsOnItem);
                assert!(retryable);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lock_released_after_run() {
        let engine = engine();
        let ctx = context("bot-a").await;
        let subgoal = Subgoal::new(SubgoalName::Collect)
            .with_param("block", "oak_log")
            .with_param("count", 1);
        // no oak_log staged: the handler fails, but the lock must still be
        // released afterwards
        let _ = engine.execute(&ctx, &subgoal).await;
        assert_eq!(engine.locks.owner_of("resource:oak_log").await, None);
    }
}
