//! Fleet configuration surface
//!
//! Struct defaults mirror the tuned production values; every recognized
//! option can be overridden through an environment variable of the same
//! name in upper case (loaded via dotenv in the binary).

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "unparseable config override ignored");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetOptions {
    /// Number of agents to run (1-5).
    pub bot_count: u32,
    pub bot_start_stagger_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_jitter_ms: u64,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            bot_count: 2,
            bot_start_stagger_ms: 2_500,
            reconnect_base_delay_ms: 5_000,
            reconnect_jitter_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopOptions {
    pub orch_tick_ms: u64,
    pub snapshot_refresh_ms: u64,
    pub snapshot_nearby_cache_ms: u64,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            orch_tick_ms: 50,
            snapshot_refresh_ms: 4_000,
            snapshot_nearby_cache_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOptions {
    /// Fleet-wide concurrent skill cap (1-5).
    pub max_concurrent_skills: u32,
    pub subgoal_exec_timeout_ms: u64,
    pub subgoal_idle_stall_ms: u64,
    pub subgoal_retry_limit: u32,
    pub subgoal_retry_base_delay_ms: u64,
    pub subgoal_retry_max_delay_ms: u64,
    pub subgoal_loop_guard_repeats: u32,
    pub subgoal_failure_streak_window_ms: u64,
}

impl Default for SkillOptions {
    fn default() -> Self {
        Self {
            max_concurrent_skills: 3,
            subgoal_exec_timeout_ms: 180_000,
            subgoal_idle_stall_ms: 5_000,
            subgoal_retry_limit: 3,
            subgoal_retry_base_delay_ms: 1_500,
            subgoal_retry_max_delay_ms: 20_000,
            subgoal_loop_guard_repeats: 8,
            subgoal_failure_streak_window_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOptions {
    pub llm_history_limit: usize,
    pub planner_timeout_ms: u64,
    pub planner_max_retries: u32,
    pub planner_cooldown_ms: u64,
    pub planner_feasibility_reprompt_enabled: bool,
    pub planner_feasibility_reprompt_max_attempts: u32,
    pub llm_per_bot_hourly_cap: u32,
    pub llm_global_hourly_cap: u32,
    pub plan_prefetch_enabled: bool,
    pub plan_prefetch_min_interval_ms: u64,
    pub plan_prefetch_max_age_ms: u64,
    pub plan_prefetch_reserve_calls: u32,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            llm_history_limit: 8,
            planner_timeout_ms: 30_000,
            planner_max_retries: 2,
            planner_cooldown_ms: 4_000,
            planner_feasibility_reprompt_enabled: true,
            planner_feasibility_reprompt_max_attempts: 1,
            llm_per_bot_hourly_cap: 30,
            llm_global_hourly_cap: 120,
            plan_prefetch_enabled: true,
            plan_prefetch_min_interval_ms: 10_000,
            plan_prefetch_max_age_ms: 30_000,
            plan_prefetch_reserve_calls: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationOptions {
    pub max_concurrent_explorers: u32,
    pub lock_lease_ms: u64,
    pub lock_heartbeat_ms: u64,
}

impl Default for CoordinationOptions {
    fn default() -> Self {
        Self {
            max_concurrent_explorers: 2,
            lock_lease_ms: 30_000,
            lock_heartbeat_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseOptions {
    pub base_x: i64,
    pub base_y: i64,
    pub base_z: i64,
    pub base_radius: u32,
}

impl Default for BaseOptions {
    fn default() -> Self {
        Self {
            base_x: 0,
            base_y: 64,
            base_z: 0,
            base_radius: 16,
        }
    }
}

/// Reflex tuning. The nightfall dedup interval and stall-tick threshold are
/// historical values kept configurable rather than retuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexOptions {
    pub nightfall_dedup_ms: u64,
    pub flee_dedup_ms: u64,
    pub stall_ticks: u32,
}

impl Default for ReflexOptions {
    fn default() -> Self {
        Self {
            nightfall_dedup_ms: 120_000,
            flee_dedup_ms: 12_000,
            stall_ticks: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub fleet: FleetOptions,
    pub loops: LoopOptions,
    pub skills: SkillOptions,
    pub planner: PlannerOptions,
    pub coordination: CoordinationOptions,
    pub base: BaseOptions,
    pub reflex: ReflexOptions,
}

impl FleetConfig {
    /// Defaults overridden by any recognized environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.fleet.bot_count = env_parse("BOT_COUNT", cfg.fleet.bot_count).clamp(1, 5);
        cfg.fleet.bot_start_stagger_ms =
            env_parse("BOT_START_STAGGER_MS", cfg.fleet.bot_start_stagger_ms);
        cfg.fleet.reconnect_base_delay_ms =
            env_parse("RECONNECT_BASE_DELAY_MS", cfg.fleet.reconnect_base_delay_ms);
        cfg.fleet.reconnect_jitter_ms =
            env_parse("RECONNECT_JITTER_MS", cfg.fleet.reconnect_jitter_ms);

        cfg.loops.orch_tick_ms = env_parse("ORCH_TICK_MS", cfg.loops.orch_tick_ms);
        cfg.loops.snapshot_refresh_ms =
            env_parse("SNAPSHOT_REFRESH_MS", cfg.loops.snapshot_refresh_ms);
        cfg.loops.snapshot_nearby_cache_ms =
            env_parse("SNAPSHOT_NEARBY_CACHE_MS", cfg.loops.snapshot_nearby_cache_ms);

        cfg.skills.max_concurrent_skills =
            env_parse("MAX_CONCURRENT_SKILLS", cfg.skills.max_concurrent_skills).clamp(1, 5);
        cfg.skills.subgoal_exec_timeout_ms =
            env_parse("SUBGOAL_EXEC_TIMEOUT_MS", cfg.skills.subgoal_exec_timeout_ms);
        cfg.skills.subgoal_idle_stall_ms =
            env_parse("SUBGOAL_IDLE_STALL_MS", cfg.skills.subgoal_idle_stall_ms);
        cfg.skills.subgoal_retry_limit =
            env_parse("SUBGOAL_RETRY_LIMIT", cfg.skills.subgoal_retry_limit);
        cfg.skills.subgoal_retry_base_delay_ms = env_parse(
            "SUBGOAL_RETRY_BASE_DELAY_MS",
            cfg.skills.subgoal_retry_base_delay_ms,
        );
        cfg.skills.subgoal_retry_max_delay_ms = env_parse(
            "SUBGOAL_RETRY_MAX_DELAY_MS",
            cfg.skills.subgoal_retry_max_delay_ms,
        );
        cfg.skills.subgoal_loop_guard_repeats = env_parse(
            "SUBGOAL_LOOP_GUARD_REPEATS",
            cfg.skills.subgoal_loop_guard_repeats,
        );
        cfg.skills.subgoal_failure_streak_window_ms = env_parse(
            "SUBGOAL_FAILURE_STREAK_WINDOW_MS",
            cfg.skills.subgoal_failure_streak_window_ms,
        );

        cfg.planner.llm_history_limit =
            env_parse("LLM_HISTORY_LIMIT", cfg.planner.llm_history_limit);
        cfg.planner.planner_timeout_ms =
            env_parse("PLANNER_TIMEOUT_MS", cfg.planner.planner_timeout_ms);
        cfg.planner.planner_max_retries =
            env_parse("PLANNER_MAX_RETRIES", cfg.planner.planner_max_retries);
        cfg.planner.planner_cooldown_ms =
            env_parse("PLANNER_COOLDOWN_MS", cfg.planner.planner_cooldown_ms);
        cfg.planner.planner_feasibility_reprompt_enabled = env_flag(
            "PLANNER_FEASIBILITY_REPROMPT_ENABLED",
            cfg.planner.planner_feasibility_reprompt_enabled,
        );
        cfg.planner.planner_feasibility_reprompt_max_attempts = env_parse(
            "PLANNER_FEASIBILITY_REPROMPT_MAX_ATTEMPTS",
            cfg.planner.planner_feasibility_reprompt_max_attempts,
        );
        cfg.planner.llm_per_bot_hourly_cap =
            env_parse("LLM_PER_BOT_HOURLY_CAP", cfg.planner.llm_per_bot_hourly_cap);
        cfg.planner.llm_global_hourly_cap =
            env_parse("LLM_GLOBAL_HOURLY_CAP", cfg.planner.llm_global_hourly_cap);
        cfg.planner.plan_prefetch_enabled =
            env_flag("PLAN_PREFETCH_ENABLED", cfg.planner.plan_prefetch_enabled);
        cfg.planner.plan_prefetch_min_interval_ms = env_parse(
            "PLAN_PREFETCH_MIN_INTERVAL_MS",
            cfg.planner.plan_prefetch_min_interval_ms,
        );
        cfg.planner.plan_prefetch_max_age_ms = env_parse(
            "PLAN_PREFETCH_MAX_AGE_MS",
            cfg.planner.plan_prefetch_max_age_ms,
        );
        cfg.planner.plan_prefetch_reserve_calls = env_parse(
            "PLAN_PREFETCH_RESERVE_CALLS",
            cfg.planner.plan_prefetch_reserve_calls,
        );

        cfg.coordination.max_concurrent_explorers = env_parse(
            "MAX_CONCURRENT_EXPLORERS",
            cfg.coordination.max_concurrent_explorers,
        );
        cfg.coordination.lock_lease_ms =
            env_parse("LOCK_LEASE_MS", cfg.coordination.lock_lease_ms);
        cfg.coordination.lock_heartbeat_ms =
            env_parse("LOCK_HEARTBEAT_MS", cfg.coordination.lock_heartbeat_ms);

        cfg.base.base_x = env_parse("BASE_X", cfg.base.base_x);
        cfg.base.base_y = env_parse("BASE_Y", cfg.base.base_y);
        cfg.base.base_z = env_parse("BASE_Z", cfg.base.base_z);
        cfg.base.base_radius = env_parse("BASE_RADIUS", cfg.base.base_radius);

        cfg
    }

    pub fn base_position(&self) -> crate::model::Position {
        crate::model::Position::new(
            self.base.base_x as f64,
            self.base.base_y as f64,
            self.base.base_z as f64,
        )
    }
}
