//! Per-agent task state
//!
//! Owned exclusively by one controller and guarded by a single mutex. The
//! queue is FIFO with scheduled entries: a subgoal whose `not_before_ms`
//! lies in the future is skipped until it is ready.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::model::{
    ActionHistory, RuntimeSubgoal, Subgoal, TaskContext, TriggerSet,
};
use crate::planner::PlanStatus;

/// A plan computed ahead of time while a subgoal still runs, to be consumed
/// the moment that subgoal succeeds.
#[derive(Debug, Clone)]
pub struct SpeculativePlan {
    pub prepared_at: i64,
    pub for_subgoal_id: Uuid,
    pub next_goal: String,
    pub subgoals: Vec<Subgoal>,
    pub planner_status: PlanStatus,
}

#[derive(Debug, Clone, Default)]
pub struct FailureStreak {
    pub count: u32,
    pub window_started: i64,
}

/// Controller-visible lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Disconnected,
    ConnectedIdle,
    Planning,
    Executing,
    AwaitingRetry,
}

pub struct TaskState {
    pub current_goal: Option<String>,
    pub current_subgoal: Option<RuntimeSubgoal>,
    pub current_started_at: i64,
    pub queue: VecDeque<RuntimeSubgoal>,
    pub progress_counters: HashMap<String, u64>,
    pub last_error: Option<String>,
    pub busy: bool,
    pub planner_cooldown_until_ms: i64,
    pub pending_triggers: TriggerSet,
    pub history: ActionHistory,
    pub failure_streaks: HashMap<String, FailureStreak>,
    pub speculative: Option<SpeculativePlan>,
    pub last_prefetch_attempt: i64,
    pub last_activity_ms: i64,
    pub last_stuck_handling_ms: i64,
}

impl TaskState {
    pub fn new(history_capacity: usize, now: i64) -> Self {
        Self {
            current_goal: None,
            current_subgoal: None,
            current_started_at: 0,
            queue: VecDeque::new(),
            progress_counters: HashMap::new(),
            last_error: None,
            busy: false,
            planner_cooldown_until_ms: 0,
            pending_triggers: TriggerSet::new(),
            history: ActionHistory::new(history_capacity),
            failure_streaks: HashMap::new(),
            speculative: None,
            last_prefetch_attempt: 0,
            last_activity_ms: now,
            last_stuck_handling_ms: 0,
        }
    }

    /// Pop the first queue entry whose schedule has come due.
    pub fn pop_ready(&mut self, now: i64) -> Option<RuntimeSubgoal> {
        let index = self.queue.iter().position(|s| s.ready(now))?;
        self.queue.remove(index)
    }

    pub fn has_ready(&self, now: i64) -> bool {
        self.queue.iter().any(|s| s.ready(now))
    }

    /// When everything queued sits in the future, pull the earliest entry
    /// forward so the agent does not sleep through its backlog.
    pub fn hoist_earliest(&mut self, now: i64) -> bool {
        if self.queue.is_empty() || self.has_ready(now) {
            return false;
        }
        if let Some(entry) = self
            .queue
            .iter_mut()
            .min_by_key(|s| s.not_before_ms)
        {
            entry.not_before_ms = now;
            return true;
        }
        false
    }

    /// Replace the queue with a fresh plan, each subgoal getting a new id.
    pub fn install_plan(&mut self, goal: &str, subgoals: Vec<Subgoal>, now: i64) {
        self.queue.clear();
        for subgoal in subgoals {
            self.queue.push_back(RuntimeSubgoal::assign(subgoal, now));
        }
        self.current_goal = Some(goal.to_string());
        self.pending_triggers.clear();
        self.last_activity_ms = now;
    }

    /// Append without disturbing what is already queued.
    pub fn enqueue(&mut self, subgoal: Subgoal, now: i64) {
        self.queue.push_back(RuntimeSubgoal::assign(subgoal, now));
        self.last_activity_ms = now;
    }

    /// Record a failure occurrence for the loop guard. Returns the streak
    /// length inside the current window.
    pub fn bump_failure_streak(&mut self, key: &str, now: i64, window_ms: i64) -> u32 {
        let streak = self
            .failure_streaks
            .entry(key.to_string())
            .or_default();
        if now - streak.window_started > window_ms {
            streak.count = 0;
            streak.window_started = now;
        }
        streak.count += 1;
        streak.count
    }

    pub fn reset_failure_streaks(&mut self) {
        self.failure_streaks.clear();
    }

    pub fn invalidate_speculative(&mut self) {
        self.speculative = None;
    }

    /// Compact view embedded in snapshots and prompts.
    pub fn task_context(&self) -> TaskContext {
        TaskContext {
            current_goal: self.current_goal.clone(),
            current_subgoal: self
                .current_subgoal
                .as_ref()
                .map(|s| s.subgoal.name.to_string()),
            progress_counters: self.progress_counters.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Status as seen from outside, given adapter connectivity.
    pub fn status(&self, connected: bool, planning: bool, now: i64) -> ControllerStatus {
        if !connected {
            return ControllerStatus::Disconnected;
        }
        if self.busy {
            return ControllerStatus::Executing;
        }
        if planning {
            return ControllerStatus::Planning;
        }
        if !self.queue.is_empty() && !self.has_ready(now) {
            return ControllerStatus::AwaitingRetry;
        }
        ControllerStatus::ConnectedIdle
    }
}
