//! Agent Controller
//!
//! The per-agent control loop. A fixed-period tick drives a small state
//! machine: watch a running skill for timeout or stall, execute the next
//! ready subgoal, ask the planner when triggers are pending, and keep the
//! agent busy with local progression plans otherwise. Recovery is always
//! the same move: force a clean disconnect, requeue the interrupted work,
//! and come back after a delay.

mod reflex;
mod state;

pub use reflex::ReflexMonitor;
pub use state::{ControllerStatus, FailureStreak, SpeculativePlan, TaskState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::{AgentAdapter, BlueprintSource};
use crate::catalog::GameCatalog;
use crate::config::FleetConfig;
use crate::coord::SkillLimiter;
use crate::emit_event;
use crate::events::FleetEvent;
use crate::metrics::FleetMetrics;
use crate::model::{
    now_ms, FailureCode, HistoryEntry, Params, Position, RuntimeSubgoal, SkillResult, Subgoal,
    Trigger, SUBGOAL_NAMES,
};
use crate::planner::{FeasibilityGuard, PlanRequest, PlannerService};
use crate::skills::{SkillContext, SkillEngine};
use crate::snapshot::SnapshotBuilder;
use crate::store::{AttemptRecord, Store};

const STUCK_MIN_ELAPSED_MS: i64 = 5_000;
const STUCK_HANDLING_GAP_MS: i64 = 2_000;
const ACTIVITY_PROBE_PERIOD_MS: i64 = 700;
const ACTIVITY_POSITION_EPSILON: f64 = 0.15;
const PREFETCH_MIN_EXECUTION_MS: i64 = 1_200;
const ALWAYS_ACTIVE_DELAY_MS: i64 = 1_500;
const FAST_RECONNECT_BASE_MS: u64 = 700;
const RECONNECT_STREAK_PENALTY_MS: u64 = 1_000;

/// Everything a controller needs from the outside world.
pub struct ControllerDeps {
    pub agent_id: String,
    pub run_id: String,
    pub adapter: Arc<dyn AgentAdapter>,
    pub catalog: Arc<dyn GameCatalog>,
    pub blueprints: Arc<dyn BlueprintSource>,
    pub planner: Arc<PlannerService>,
    pub engine: Arc<SkillEngine>,
    pub skill_limiter: Arc<SkillLimiter>,
    pub store: Arc<dyn Store>,
    pub metrics: Arc<FleetMetrics>,
    pub config: Arc<FleetConfig>,
}

struct Activity {
    last_position: Option<Position>,
    last_inventory_total: i64,
    last_progress_ms: i64,
    last_probe_ms: i64,
}

struct Inner {
    deps: ControllerDeps,
    snapshots: SnapshotBuilder,
    state: Arc<Mutex<TaskState>>,
    tick_running: AtomicBool,
    planning: AtomicBool,
    prefetching: AtomicBool,
    stopping: AtomicBool,
    reconnect_pending: AtomicBool,
    reconnect_streak: AtomicU32,
    exec_task: Mutex<Option<JoinHandle<()>>>,
    reflex: Mutex<Option<ReflexMonitor>>,
    activity: Mutex<Activity>,
    last_state_persist: AtomicI64,
}

pub struct AgentController {
    inner: Arc<Inner>,
    stop_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentController {
    /// Connect the adapter, attach reflexes and start the tick loop.
    pub async fn launch(deps: ControllerDeps) -> Arc<AgentController> {
        let snapshots = SnapshotBuilder::new(
            deps.adapter.clone(),
            deps.catalog.clone(),
            deps.config.loops.snapshot_nearby_cache_ms,
        );
        let now = now_ms();
        let inner = Arc::new(Inner {
            snapshots,
            state: Arc::new(Mutex::new(TaskState::new(
                crate::model::DEFAULT_HISTORY_CAPACITY,
                now,
            ))),
            tick_running: AtomicBool::new(false),
            planning: AtomicBool::new(false),
            prefetching: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            reconnect_pending: AtomicBool::new(false),
            reconnect_streak: AtomicU32::new(0),
            exec_task: Mutex::new(None),
            reflex: Mutex::new(None),
            activity: Mutex::new(Activity {
                last_position: None,
                last_inventory_total: 0,
                last_progress_ms: now,
                last_probe_ms: 0,
            }),
            last_state_persist: AtomicI64::new(0),
            deps,
        });

        match inner.deps.adapter.connect().await {
            Ok(()) => {
                inner.attach_reflex().await;
                info!(agent = %inner.deps.agent_id, "controller connected");
            }
            Err(e) => {
                warn!(agent = %inner.deps.agent_id, error = %e, "initial connect failed");
            }
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let loop_inner = inner.clone();
        let tick_ms = inner.deps.config.loops.orch_tick_ms.max(10);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => loop_inner.tick().await,
                }
            }
        });

        Arc::new(AgentController {
            inner,
            stop_tx,
            loop_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.deps.agent_id
    }

    pub async fn status(&self) -> ControllerStatus {
        let now = now_ms();
        let planning = self.inner.planning.load(Ordering::SeqCst);
        let connected = self.inner.deps.adapter.is_connected();
        self.inner.state.lock().await.status(connected, planning, now)
    }

    pub async fn task_state(&self) -> Arc<Mutex<TaskState>> {
        self.inner.state.clone()
    }

    /// Stop the loop, drop the skill slot, detach reflexes and quit.
    pub async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.inner.shutdown().await;
        info!(agent = %self.inner.deps.agent_id, "controller stopped");
    }
}

impl Inner {
    // ── tick loop ────────────────────────────────────────────────────────

    async fn tick(self: &Arc<Self>) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        if self
            .tick_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.tick_inner().await;
        self.tick_running.store(false, Ordering::SeqCst);
    }

    async fn tick_inner(self: &Arc<Self>) {
        let now = now_ms();

        if !self.deps.adapter.is_connected() {
            self.force_disconnect("connection_lost").await;
            return;
        }

        let (busy, started_at) = {
            let state = self.state.lock().await;
            (state.busy, state.current_started_at)
        };

        if busy {
            let timeout = self.deps.config.skills.subgoal_exec_timeout_ms as i64;
            if now - started_at >= timeout {
                self.force_disconnect("subgoal_timeout").await;
                return;
            }
            if self.probe_idle_stall(now).await {
                warn!(agent = %self.deps.agent_id, "SUBGOAL_IDLE_STALL");
                self.force_disconnect("subgoal_idle_stall").await;
                return;
            }
            let stuck = {
                let mut state = self.state.lock().await;
                if state.pending_triggers.contains(Trigger::Stuck)
                    && now - started_at >= STUCK_MIN_ELAPSED_MS
                    && now - state.last_stuck_handling_ms >= STUCK_HANDLING_GAP_MS
                {
                    state.last_stuck_handling_ms = now;
                    state.pending_triggers.remove(Trigger::Stuck);
                    true
                } else {
                    false
                }
            };
            if stuck {
                self.force_disconnect("stuck_recovery").await;
                return;
            }
            self.maybe_prefetch(now).await;
            return;
        }

        // non-busy housekeeping
        {
            let mut state = self.state.lock().await;
            if !state.queue.is_empty() && !state.has_ready(now) {
                if state.hoist_earliest(now) {
                    debug!(agent = %self.deps.agent_id, "hoisted future subgoal to now");
                }
            }
        }

        let idle_stall = self.deps.config.skills.subgoal_idle_stall_ms as i64;
        let queue_empty_and_inactive = {
            let state = self.state.lock().await;
            state.queue.is_empty() && now - state.last_activity_ms >= idle_stall
        };
        if queue_empty_and_inactive {
            self.enqueue_progression(now).await;
        }

        if self.state.lock().await.has_ready(now) {
            self.execute_next(now).await;
            return;
        }

        let (triggers_pending, cooled_down, queue_empty, inactive_ms) = {
            let state = self.state.lock().await;
            (
                !state.pending_triggers.is_empty(),
                now >= state.planner_cooldown_until_ms,
                state.queue.is_empty(),
                now - state.last_activity_ms,
            )
        };
        if triggers_pending && cooled_down && !self.planning.load(Ordering::SeqCst) {
            self.spawn_plan_request();
            return;
        }
        if queue_empty
            && !triggers_pending
            && !self.planning.load(Ordering::SeqCst)
            && inactive_ms >= ALWAYS_ACTIVE_DELAY_MS
        {
            self.enqueue_progression(now).await;
        }
    }

    // ── execution ────────────────────────────────────────────────────────

    async fn execute_next(self: &Arc<Self>, now: i64) {
        if !self.deps.skill_limiter.try_enter(&self.deps.agent_id).await {
            return;
        }
        let runtime = {
            let mut state = self.state.lock().await;
            match state.pop_ready(now) {
                Some(runtime) => {
                    state.busy = true;
                    state.current_started_at = now;
                    state.current_subgoal = Some(runtime.clone());
                    state.last_activity_ms = now;
                    runtime
                }
                None => {
                    drop(state);
                    self.deps.skill_limiter.leave(&self.deps.agent_id).await;
                    return;
                }
            }
        };

        // drop any residual controls before handing over to the skill
        let _ = self.deps.adapter.clear_controls().await;
        self.reset_activity(now).await;

        let inventory_before = self.inventory_map().await;
        let health_before = self.deps.adapter.health().await.unwrap_or(0.0);

        debug!(
            agent = %self.deps.agent_id,
            subgoal = %runtime.subgoal.name,
            retry = runtime.retry_count,
            "executing subgoal"
        );

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            let ctx = SkillContext {
                agent_id: inner.deps.agent_id.clone(),
                adapter: inner.deps.adapter.clone(),
                catalog: inner.deps.catalog.clone(),
                blueprints: inner.deps.blueprints.clone(),
                base: inner.deps.config.base_position(),
                base_radius: inner.deps.config.base.base_radius as f64,
            };
            let result = inner.deps.engine.execute(&ctx, &runtime.subgoal).await;
            inner
                .on_subgoal_finished(runtime, result, inventory_before, health_before, now)
                .await;
        });
        *self.exec_task.lock().await = Some(handle);
    }

    async fn on_subgoal_finished(
        self: &Arc<Self>,
        runtime: RuntimeSubgoal,
        result: SkillResult,
        inventory_before: HashMap<String, i64>,
        health_before: f64,
        started_at: i64,
    ) {
        let now = now_ms();
        let duration_ms = now - started_at;
        let success = result.is_success();
        let name = runtime.subgoal.name;

        let inventory_after = self.inventory_map().await;
        let health_after = self.deps.adapter.health().await.unwrap_or(health_before);
        let inventory_delta = diff_inventories(&inventory_before, &inventory_after);

        let entry = HistoryEntry {
            timestamp: now,
            subgoal_name: name.to_string(),
            params: runtime.subgoal.params.clone(),
            outcome: if success { "success" } else { "failure" }.to_string(),
            error_code: result.failure_code(),
            error_details: match &result {
                SkillResult::Failure { details, .. } => Some(details.clone()),
                SkillResult::Success { .. } => None,
            },
            inventory_delta: if inventory_delta.is_empty() {
                None
            } else {
                Some(inventory_delta)
            },
            health_delta: health_after - health_before,
            duration_ms,
        };

        // the attempt row lands before any successor can dispatch
        let attempt = AttemptRecord {
            bot_id: self.deps.agent_id.clone(),
            subgoal_id: runtime.id.to_string(),
            subgoal_name: name.to_string(),
            params_json: serde_json::Value::Object(runtime.subgoal.params.clone()),
            result_json: serde_json::to_value(&result).unwrap_or_else(|_| json!({})),
            retry_count: runtime.retry_count,
            duration_ms,
        };
        if let Err(e) = self.deps.store.record_attempt(attempt).await {
            warn!(agent = %self.deps.agent_id, error = %e, "failed to persist attempt");
        }

        self.deps
            .metrics
            .record_subgoal_duration(duration_ms.max(0) as u64, success);
        if let Some(code) = result.failure_code() {
            self.deps.metrics.record_failure(code);
        }
        emit_event!(FleetEvent::SkillFinished {
            bot_id: self.deps.agent_id.clone(),
            subgoal: name.to_string(),
            success,
        });

        {
            let mut state = self.state.lock().await;
            state.history.push(entry);
            match &result {
                SkillResult::Failure {
                    code,
                    details,
                    retryable,
                } => {
                    state.last_error = Some(format!("{}: {}", code, details));
                    state.invalidate_speculative();

                    let streak_key = format!("{}:{}", name, code);
                    let window = self.deps.config.skills.subgoal_failure_streak_window_ms as i64;
                    let streak = state.bump_failure_streak(&streak_key, now, window);
                    let mut may_retry = *retryable && code.can_retry();
                    if streak >= self.deps.config.skills.subgoal_loop_guard_repeats {
                        warn!(
                            agent = %self.deps.agent_id,
                            key = %streak_key,
                            streak,
                            "SUBGOAL_LOOP_GUARD tripped"
                        );
                        may_retry = false;
                    }
                    let limit =
                        self.deps.config.skills.subgoal_retry_limit + code.extra_retries();
                    if may_retry && runtime.retry_count < limit {
                        let delay = self.retry_delay(runtime.retry_count);
                        debug!(
                            agent = %self.deps.agent_id,
                            subgoal = %name,
                            delay_ms = delay,
                            "requeueing after failure"
                        );
                        let retry = runtime.retry(now, delay);
                        state.queue.push_front(retry);
                    } else {
                        // dependents of a failed step are stale
                        state.queue.clear();
                        state.planner_cooldown_until_ms = now;
                        state.pending_triggers.raise(Trigger::SubgoalFailed);
                        if *code == FailureCode::NoToolAvailable {
                            state.pending_triggers.raise(Trigger::ToolMissing);
                        }
                    }
                }
                SkillResult::Success { .. } => {
                    state.last_error = None;
                    state.reset_failure_streaks();
                    *state
                        .progress_counters
                        .entry(name.to_string())
                        .or_insert(0) += 1;
                    if state.queue.is_empty() {
                        let max_age = self.deps.config.planner.plan_prefetch_max_age_ms as i64;
                        let consumed = match state.speculative.take() {
                            Some(plan)
                                if plan.for_subgoal_id == runtime.id
                                    && now - plan.prepared_at <= max_age =>
                            {
                                info!(
                                    agent = %self.deps.agent_id,
                                    goal = %plan.next_goal,
                                    "consuming speculative plan"
                                );
                                state.install_plan(&plan.next_goal, plan.subgoals, now);
                                true
                            }
                            _ => false,
                        };
                        if !consumed {
                            state.pending_triggers.raise(Trigger::SubgoalCompleted);
                        }
                    }
                }
            }
            state.busy = false;
            state.current_subgoal = None;
            state.last_activity_ms = now;
        }

        let _ = self.deps.adapter.clear_controls().await;
        self.deps.skill_limiter.leave(&self.deps.agent_id).await;
    }

    fn retry_delay(&self, retry_count: u32) -> i64 {
        let base = self.deps.config.skills.subgoal_retry_base_delay_ms;
        let max = self.deps.config.skills.subgoal_retry_max_delay_ms;
        let scaled = base.saturating_mul(retry_count as u64 + 1);
        let jittered = {
            let mut rng = rand::thread_rng();
            let factor: f64 = rng.gen_range(0.8..1.2);
            (scaled as f64 * factor) as u64
        };
        jittered.min(max) as i64
    }

    // ── planning ─────────────────────────────────────────────────────────

    fn spawn_plan_request(self: &Arc<Self>) {
        if self.planning.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move {
            inner.request_plan().await;
            inner.planning.store(false, Ordering::SeqCst);
        });
    }

    async fn request_plan(self: &Arc<Self>) {
        let task_context = self.state.lock().await.task_context();
        let snapshot = match self
            .snapshots
            .build(&self.deps.agent_id, task_context, true)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(agent = %self.deps.agent_id, error = %e, "snapshot build failed");
                return;
            }
        };
        self.persist_bot_state(&snapshot).await;

        let history = {
            let state = self.state.lock().await;
            state.history.recent(self.deps.config.planner.llm_history_limit)
        };
        let request = PlanRequest {
            bot_id: self.deps.agent_id.clone(),
            snapshot,
            history,
            available_subgoals: SUBGOAL_NAMES.iter().map(|s| s.to_string()).collect(),
        };

        let cooldown = self.deps.config.planner.planner_cooldown_ms as i64;
        match self.deps.planner.plan(&request).await {
            Ok(outcome) => {
                let now = now_ms();
                let mut state = self.state.lock().await;
                info!(
                    agent = %self.deps.agent_id,
                    status = outcome.status.as_str(),
                    goal = %outcome.response.next_goal,
                    subgoals = outcome.response.subgoals.len(),
                    "plan installed"
                );
                state.install_plan(&outcome.response.next_goal, outcome.response.subgoals, now);
                state.planner_cooldown_until_ms = now + cooldown;
            }
            Err(e) => {
                error!(agent = %self.deps.agent_id, error = %e, "planner rejected request");
                let _ = self
                    .deps
                    .store
                    .record_incident(&self.deps.agent_id, "planner_schema", &e.to_string())
                    .await;
                let mut state = self.state.lock().await;
                state.planner_cooldown_until_ms = now_ms() + cooldown;
            }
        }
    }

    /// Start a planner call ahead of time while a subgoal is still running,
    /// provided the rate budget keeps a reserve.
    async fn maybe_prefetch(self: &Arc<Self>, now: i64) {
        let cfg = &self.deps.config.planner;
        if !cfg.plan_prefetch_enabled || self.prefetching.load(Ordering::SeqCst) {
            return;
        }
        let current_id = {
            let mut state = self.state.lock().await;
            let eligible = state.queue.is_empty()
                && state.pending_triggers.is_empty()
                && now - state.current_started_at >= PREFETCH_MIN_EXECUTION_MS
                && now - state.last_prefetch_attempt >= cfg.plan_prefetch_min_interval_ms as i64;
            if !eligible {
                return;
            }
            let Some(current_id) = state.current_subgoal.as_ref().map(|current| current.id) else {
                return;
            };
            state.last_prefetch_attempt = now;
            current_id
        };

        let limiter = self.deps.planner.rate_limiter();
        let reserve = cfg.plan_prefetch_reserve_calls;
        let per_agent = limiter
            .calls_in_last_hour(Some(&self.deps.agent_id))
            .await;
        let global = limiter.calls_in_last_hour(None).await;
        if per_agent + reserve >= limiter.per_bot_cap() || global + reserve >= limiter.global_cap()
        {
            return;
        }

        if self.prefetching.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move {
            inner.prefetch_plan(current_id).await;
            inner.prefetching.store(false, Ordering::SeqCst);
        });
    }

    async fn prefetch_plan(self: &Arc<Self>, for_subgoal_id: uuid::Uuid) {
        let task_context = self.state.lock().await.task_context();
        let Ok(snapshot) = self
            .snapshots
            .build(&self.deps.agent_id, task_context, true)
            .await
        else {
            return;
        };
        let history = {
            let state = self.state.lock().await;
            state.history.recent(self.deps.config.planner.llm_history_limit)
        };
        let request = PlanRequest {
            bot_id: self.deps.agent_id.clone(),
            snapshot,
            history,
            available_subgoals: SUBGOAL_NAMES.iter().map(|s| s.to_string()).collect(),
        };
        let Ok(outcome) = self.deps.planner.plan(&request).await else {
            return;
        };

        let mut state = self.state.lock().await;
        let still_relevant = state.busy
            && state
                .current_subgoal
                .as_ref()
                .map(|c| c.id == for_subgoal_id)
                .unwrap_or(false)
            && state.queue.is_empty();
        if still_relevant {
            debug!(agent = %self.deps.agent_id, "speculative plan cached");
            state.speculative = Some(SpeculativePlan {
                prepared_at: now_ms(),
                for_subgoal_id,
                next_goal: outcome.response.next_goal,
                subgoals: outcome.response.subgoals,
                planner_status: outcome.status,
            });
        }
    }

    /// Local plan from the progression rules, without spending a model call.
    async fn enqueue_progression(self: &Arc<Self>, now: i64) {
        let task_context = self.state.lock().await.task_context();
        let Ok(snapshot) = self
            .snapshots
            .build(&self.deps.agent_id, task_context, false)
            .await
        else {
            return;
        };
        self.persist_bot_state(&snapshot).await;
        let plan = FeasibilityGuard::new(self.deps.catalog.as_ref()).progression(&snapshot);
        if plan.subgoals.is_empty() {
            return;
        }
        debug!(agent = %self.deps.agent_id, reason = %plan.reason, "queueing local progression plan");
        let mut state = self.state.lock().await;
        if !state.queue.is_empty() || state.busy {
            return;
        }
        if state.current_goal.is_none() {
            state.current_goal = Some(plan.reason.clone());
        }
        for subgoal in plan.subgoals {
            state.enqueue(subgoal, now);
        }
    }

    // ── recovery ─────────────────────────────────────────────────────────

    async fn force_disconnect(self: &Arc<Self>, reason: &str) {
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let now = now_ms();
        warn!(agent = %self.deps.agent_id, reason, "forcing disconnect for recovery");
        self.deps.metrics.record_reconnect();
        emit_event!(FleetEvent::Recovery {
            bot_id: self.deps.agent_id.clone(),
            reason: reason.to_string(),
        });
        if let Err(e) = self
            .deps
            .store
            .record_incident(&self.deps.agent_id, "forced_disconnect", reason)
            .await
        {
            warn!(error = %e, "failed to persist incident");
        }

        if let Some(handle) = self.exec_task.lock().await.take() {
            handle.abort();
        }
        self.deps.skill_limiter.leave(&self.deps.agent_id).await;

        {
            let mut state = self.state.lock().await;
            if let Some(current) = state.current_subgoal.take() {
                if current.retry_count < self.deps.config.skills.subgoal_retry_limit {
                    state.queue.push_front(current.retry(now, 0));
                }
            }
            state.busy = false;
            state.invalidate_speculative();
        }

        self.detach_reflex().await;
        let _ = self.deps.adapter.clear_controls().await;
        let _ = self.deps.adapter.quit().await;
        self.snapshots.invalidate().await;
        self.reset_activity(now).await;

        self.schedule_reconnect(reason);
    }

    fn schedule_reconnect(self: &Arc<Self>, reason: &str) {
        let fast = matches!(
            reason,
            "subgoal_timeout" | "subgoal_idle_stall" | "stuck_recovery"
        );
        let delay_ms = if fast {
            FAST_RECONNECT_BASE_MS + {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..200)
            }
        } else {
            let streak = self.reconnect_streak.load(Ordering::SeqCst) as u64;
            let jitter = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..=self.deps.config.fleet.reconnect_jitter_ms.max(1))
            };
            self.deps.config.fleet.reconnect_base_delay_ms
                + jitter
                + streak * RECONNECT_STREAK_PENALTY_MS
        };

        info!(agent = %self.deps.agent_id, delay_ms, reason, "reconnect scheduled");
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if inner.stopping.load(Ordering::SeqCst) {
                inner.reconnect_pending.store(false, Ordering::SeqCst);
                return;
            }
            match inner.deps.adapter.connect().await {
                Ok(()) => {
                    inner.reconnect_streak.store(0, Ordering::SeqCst);
                    inner.attach_reflex().await;
                    let now = now_ms();
                    let mut state = inner.state.lock().await;
                    state.pending_triggers.raise(Trigger::Reconnect);
                    state.last_activity_ms = now;
                    drop(state);
                    info!(agent = %inner.deps.agent_id, "reconnected");
                }
                Err(e) => {
                    inner.reconnect_streak.fetch_add(1, Ordering::SeqCst);
                    warn!(agent = %inner.deps.agent_id, error = %e, "reconnect failed");
                    let _ = inner
                        .deps
                        .store
                        .record_incident(
                            &inner.deps.agent_id,
                            "reconnect_failed",
                            &e.to_string(),
                        )
                        .await;
                }
            }
            inner.reconnect_pending.store(false, Ordering::SeqCst);
        });
    }

    async fn attach_reflex(self: &Arc<Self>) {
        let monitor = ReflexMonitor::attach(
            self.deps.agent_id.clone(),
            self.deps.adapter.clone(),
            self.state.clone(),
            self.deps.config.reflex.clone(),
            self.deps.config.base_position(),
        );
        if let Some(previous) = self.reflex.lock().await.replace(monitor) {
            previous.detach();
        }
    }

    async fn detach_reflex(&self) {
        if let Some(monitor) = self.reflex.lock().await.take() {
            monitor.detach();
        }
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.exec_task.lock().await.take() {
            handle.abort();
        }
        self.deps.skill_limiter.leave(&self.deps.agent_id).await;
        self.detach_reflex().await;
        let _ = self.deps.adapter.clear_controls().await;
        let _ = self.deps.adapter.quit().await;
    }

    // ── probes and bookkeeping ───────────────────────────────────────────

    /// Progress probe while executing: position or inventory movement
    /// resets the stall clock. Returns true when stalled too long.
    async fn probe_idle_stall(&self, now: i64) -> bool {
        let mut activity = self.activity.lock().await;
        if now - activity.last_probe_ms < ACTIVITY_PROBE_PERIOD_MS {
            return false;
        }
        activity.last_probe_ms = now;

        let position = self.deps.adapter.position().await.ok();
        let inventory_total = self.inventory_total().await;

        let moved = match (activity.last_position, position) {
            (Some(prev), Some(current)) => prev.distance_to(&current) >= ACTIVITY_POSITION_EPSILON,
            _ => true,
        };
        let inventory_changed = inventory_total != activity.last_inventory_total;
        if moved || inventory_changed {
            activity.last_progress_ms = now;
        }
        activity.last_position = position;
        activity.last_inventory_total = inventory_total;

        let stall_after = self.deps.config.skills.subgoal_idle_stall_ms as i64;
        now - activity.last_progress_ms >= stall_after
    }

    async fn reset_activity(&self, now: i64) {
        let mut activity = self.activity.lock().await;
        activity.last_position = None;
        activity.last_inventory_total = self.inventory_total().await;
        activity.last_progress_ms = now;
        activity.last_probe_ms = 0;
    }

    async fn inventory_total(&self) -> i64 {
        self.deps
            .adapter
            .inventory()
            .await
            .map(|stacks| stacks.iter().map(|s| s.count).sum())
            .unwrap_or(0)
    }

    async fn inventory_map(&self) -> HashMap<String, i64> {
        self.deps
            .adapter
            .inventory()
            .await
            .map(|stacks| stacks.into_iter().map(|s| (s.name, s.count)).collect())
            .unwrap_or_default()
    }

    /// Persist the latest snapshot, throttled by the refresh interval.
    async fn persist_bot_state(&self, snapshot: &crate::model::Snapshot) {
        let now = now_ms();
        let last = self.last_state_persist.load(Ordering::SeqCst);
        let interval = self.deps.config.loops.snapshot_refresh_ms as i64;
        if now - last < interval {
            return;
        }
        self.last_state_persist.store(now, Ordering::SeqCst);
        let json = serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}));
        if let Err(e) = self
            .deps
            .store
            .record_bot_state(&self.deps.agent_id, json)
            .await
        {
            warn!(agent = %self.deps.agent_id, error = %e, "failed to persist bot state");
        }
    }
}

fn diff_inventories(
    before: &HashMap<String, i64>,
    after: &HashMap<String, i64>,
) -> Params {
    let mut delta = Params::new();
    for (item, &count) in after {
        let previous = before.get(item).copied().unwrap_or(0);
        if count != previous {
            delta.insert(item.clone(), json!(count - previous));
        }
    }
    for (item, &previous) in before {
        if !after.contains_key(item) && previous != 0 {
            delta.insert(item.clone(), json!(-previous));
        }
    }
    delta
}

/// Retryability matrix, exposed for the loop-guard tests.
pub fn can_retry_failure(code: FailureCode) -> bool {
    code.can_retry()
}

/// Helper used by tests to build a runnable subgoal quickly.
pub fn runtime_subgoal(subgoal: Subgoal, now: i64) -> RuntimeSubgoal {
    RuntimeSubgoal::assign(subgoal, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_diff() {
        let mut before = HashMap::new();
        before.insert("oak_log".to_string(), 3);
        before.insert("stick".to_string(), 2);
        let mut after = HashMap::new();
        after.insert("oak_log".to_string(), 5);
        after.insert("oak_planks".to_string(), 4);

        let delta = diff_inventories(&before, &after);
        assert_eq!(delta.get("oak_log"), Some(&json!(2)));
        assert_eq!(delta.get("oak_planks"), Some(&json!(4)));
        assert_eq!(delta.get("stick"), Some(&json!(-2)));
    }

    #[test]
    fn test_retry_matrix_reexported() {
        assert!(can_retry_failure(FailureCode::PathfindFailed));
        assert!(!can_retry_failure(FailureCode::NoToolAvailable));
    }
}
