//! Reflex Monitor
//!
//! Fast-path reactions that must not wait for the planner: adapter events
//! become triggers immediately, and a 1 Hz probe watches for nightfall,
//! inventory pressure and stalled movement. Attached on spawn, detached on
//! stop or reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::TaskState;
use crate::adapter::{AdapterEvent, AgentAdapter};
use crate::config::ReflexOptions;
use crate::emit_event;
use crate::events::FleetEvent;
use crate::model::{now_ms, Position, Trigger};

const PROBE_PERIOD_MS: u64 = 1_000;
const NIGHT_START_TICK: u32 = 13_000;
const NIGHT_END_TICK: u32 = 23_000;
const LOW_HEALTH_FLEE_THRESHOLD: f64 = 8.0;
const INVENTORY_FULL_FREE_SLOTS: u32 = 2;
const STALL_MOVEMENT_PER_TICK: f64 = 0.25;

pub struct ReflexMonitor {
    handles: Vec<JoinHandle<()>>,
}

impl ReflexMonitor {
    /// Wire the event pump and the periodic probe for one agent.
    pub fn attach(
        agent_id: String,
        adapter: Arc<dyn AgentAdapter>,
        state: Arc<Mutex<TaskState>>,
        cfg: ReflexOptions,
        base: Position,
    ) -> Self {
        let events = Self::spawn_event_pump(
            agent_id.clone(),
            adapter.clone(),
            state.clone(),
            cfg.clone(),
            base,
        );
        let probe = Self::spawn_probe(agent_id, adapter, state, cfg);
        Self {
            handles: vec![events, probe],
        }
    }

    pub fn detach(self) {
        for handle in self.handles {
            handle.abort();
        }
    }

    fn spawn_event_pump(
        agent_id: String,
        adapter: Arc<dyn AgentAdapter>,
        state: Arc<Mutex<TaskState>>,
        cfg: ReflexOptions,
        base: Position,
    ) -> JoinHandle<()> {
        let mut rx = adapter.events();
        tokio::spawn(async move {
            let mut last_flee_ms: i64 = 0;
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(agent = %agent_id, skipped, "reflex event pump lagged");
                        continue;
                    }
                    Err(_) => break,
                };
                match event {
                    AdapterEvent::Hurt { health } => {
                        raise(&state, &agent_id, Trigger::Attacked).await;
                        // immediate reflex: drop whatever we were holding down
                        let _ = adapter.clear_controls().await;
                        let now = now_ms();
                        if health <= LOW_HEALTH_FLEE_THRESHOLD
                            && now - last_flee_ms >= cfg.flee_dedup_ms as i64
                        {
                            last_flee_ms = now;
                            info!(agent = %agent_id, health, "low health, fleeing to base");
                            let _ = adapter.set_path_goal(base, 3.0).await;
                        }
                    }
                    AdapterEvent::Died => {
                        let mut task = state.lock().await;
                        task.queue.clear();
                        task.invalidate_speculative();
                        task.pending_triggers.raise(Trigger::Death);
                        drop(task);
                        emit_event!(FleetEvent::TriggerRaised {
                            bot_id: agent_id.clone(),
                            trigger: Trigger::Death,
                        });
                        info!(agent = %agent_id, "death event, queue cleared");
                    }
                    AdapterEvent::Kicked { reason } => {
                        debug!(agent = %agent_id, reason, "kicked");
                        raise(&state, &agent_id, Trigger::Reconnect).await;
                    }
                    AdapterEvent::ConnectionEnded { reason } => {
                        debug!(agent = %agent_id, reason, "connection ended");
                        raise(&state, &agent_id, Trigger::Reconnect).await;
                    }
                    AdapterEvent::Spawned => {}
                }
            }
        })
    }

    fn spawn_probe(
        agent_id: String,
        adapter: Arc<dyn AgentAdapter>,
        state: Arc<Mutex<TaskState>>,
        cfg: ReflexOptions,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(PROBE_PERIOD_MS));
            let mut last_nightfall_ms: i64 = 0;
            let mut last_position: Option<Position> = None;
            let mut stall_ticks: u32 = 0;
            loop {
                interval.tick().await;
                if !adapter.is_connected() {
                    last_position = None;
                    stall_ticks = 0;
                    continue;
                }

                if let Ok(tick) = adapter.time_of_day().await {
                    let now = now_ms();
                    if (NIGHT_START_TICK..=NIGHT_END_TICK).contains(&tick)
                        && now - last_nightfall_ms >= cfg.nightfall_dedup_ms as i64
                    {
                        last_nightfall_ms = now;
                        raise(&state, &agent_id, Trigger::Nightfall).await;
                    }
                }

                if let Ok(free) = adapter.empty_inventory_slots().await {
                    if free <= INVENTORY_FULL_FREE_SLOTS {
                        raise(&state, &agent_id, Trigger::InventoryFull).await;
                    }
                }

                // stalled-movement watch, only meaningful mid-execution
                let busy = state.lock().await.busy;
                if busy
                    && adapter.pathfinding_active()
                    && !adapter.is_mining()
                    && !adapter.is_building()
                {
                    if let Ok(position) = adapter.position().await {
                        let moved = last_position
                            .map(|prev| position.distance_to(&prev))
                            .unwrap_or(f64::MAX);
                        last_position = Some(position);
                        if moved < STALL_MOVEMENT_PER_TICK {
                            stall_ticks += 1;
                            if stall_ticks >= cfg.stall_ticks {
                                stall_ticks = 0;
                                raise(&state, &agent_id, Trigger::Stuck).await;
                            }
                        } else {
                            stall_ticks = 0;
                        }
                    }
                } else {
                    last_position = None;
                    stall_ticks = 0;
                }
            }
        })
    }
}

async fn raise(state: &Arc<Mutex<TaskState>>, agent_id: &str, trigger: Trigger) {
    let newly = state.lock().await.pending_triggers.raise(trigger);
    if newly {
        debug!(agent = agent_id, %trigger, "trigger raised");
        emit_event!(FleetEvent::TriggerRaised {
            bot_id: agent_id.to_string(),
            trigger,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SimAdapter;
    use crate::catalog::{GameCatalog, StaticCatalog};

    async fn setup() -> (Arc<SimAdapter>, Arc<Mutex<TaskState>>, ReflexMonitor) {
        let catalog: Arc<dyn GameCatalog> = Arc::new(StaticCatalog::basic_overworld());
        let adapter = Arc::new(SimAdapter::new("bot-0", catalog));
        adapter.connect().await.unwrap();
        let state = Arc::new(Mutex::new(TaskState::new(20, now_ms())));
        let monitor = ReflexMonitor::attach(
            "bot-0".to_string(),
            adapter.clone(),
            state.clone(),
            ReflexOptions::default(),
            Position::new(0.0, 64.0, 0.0),
        );
        (adapter, state, monitor)
    }

    #[tokio::test]
    async fn test_hurt_raises_attacked() {
        let (adapter, state, monitor) = setup().await;
        adapter.set_health(15.0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.lock().await.pending_triggers.contains(Trigger::Attacked));
        monitor.detach();
    }

    #[tokio::test]
    async fn test_death_clears_queue() {
        let (adapter, state, monitor) = setup().await;
        {
            let mut task = state.lock().await;
            task.enqueue(crate::model::Subgoal::new(crate::model::SubgoalName::Explore), 0);
        }
        adapter.kill().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let task = state.lock().await;
        assert!(task.queue.is_empty());
        assert!(task.pending_triggers.contains(Trigger::Death));
        drop(task);
        monitor.detach();
    }

    #[tokio::test]
    async fn test_kick_raises_reconnect() {
        let (adapter, state, monitor) = setup().await;
        adapter.kick("server restart");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state
            .lock()
            .await
            .pending_triggers
            .contains(Trigger::Reconnect));
        monitor.detach();
    }
}
