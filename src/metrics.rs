//! Fleet metrics registry
//!
//! Lock-free counters and gauges updated from every controller. Exposition
//! is someone else's job; this registry is the stable in-process surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::FailureCode;

#[derive(Debug, Default)]
pub struct FleetMetrics {
    pub planner_success: AtomicU64,
    pub planner_rate_limited: AtomicU64,
    pub planner_fallback: AtomicU64,
    pub planner_tokens_in: AtomicU64,
    pub planner_tokens_out: AtomicU64,
    pub subgoals_succeeded: AtomicU64,
    pub subgoals_failed: AtomicU64,
    pub subgoal_duration_ms_total: AtomicU64,
    pub reconnects: AtomicU64,
    pub bots_connected: AtomicU64,
    pub bots_busy: AtomicU64,
    failures_by_code: Mutex<HashMap<&'static str, u64>>,
}

impl FleetMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_subgoal_duration(&self, duration_ms: u64, success: bool) {
        self.subgoal_duration_ms_total
            .fetch_add(duration_ms, Ordering::Relaxed);
        if success {
            self.subgoals_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.subgoals_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, code: FailureCode) {
        if let Ok(mut by_code) = self.failures_by_code.lock() {
            *by_code.entry(code.as_str()).or_insert(0) += 1;
        }
    }

    pub fn record_planner_outcome(&self, status: &str, tokens_in: u64, tokens_out: u64) {
        match status {
            "SUCCESS" => self.planner_success.fetch_add(1, Ordering::Relaxed),
            "RATE_LIMITED" => self.planner_rate_limited.fetch_add(1, Ordering::Relaxed),
            _ => self.planner_fallback.fetch_add(1, Ordering::Relaxed),
        };
        self.planner_tokens_in.fetch_add(tokens_in, Ordering::Relaxed);
        self.planner_tokens_out
            .fetch_add(tokens_out, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_fleet_gauges(&self, connected: u64, busy: u64) {
        self.bots_connected.store(connected, Ordering::Relaxed);
        self.bots_busy.store(busy, Ordering::Relaxed);
    }

    pub fn failures_for(&self, code: FailureCode) -> u64 {
        self.failures_by_code
            .lock()
            .ok()
            .and_then(|m| m.get(code.as_str()).copied())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let failures = self
            .failures_by_code
            .lock()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| ((*k).to_string(), *v))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();
        MetricsSnapshot {
            planner_success: self.planner_success.load(Ordering::Relaxed),
            planner_rate_limited: self.planner_rate_limited.load(Ordering::Relaxed),
            planner_fallback: self.planner_fallback.load(Ordering::Relaxed),
            planner_tokens_in: self.planner_tokens_in.load(Ordering::Relaxed),
            planner_tokens_out: self.planner_tokens_out.load(Ordering::Relaxed),
            subgoals_succeeded: self.subgoals_succeeded.load(Ordering::Relaxed),
            subgoals_failed: self.subgoals_failed.load(Ordering::Relaxed),
            subgoal_duration_ms_total: self.subgoal_duration_ms_total.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bots_connected: self.bots_connected.load(Ordering::Relaxed),
            bots_busy: self.bots_busy.load(Ordering::Relaxed),
            failures_by_code: failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub planner_success: u64,
    pub planner_rate_limited: u64,
    pub planner_fallback: u64,
    pub planner_tokens_in: u64,
    pub planner_tokens_out: u64,
    pub subgoals_succeeded: u64,
    pub subgoals_failed: u64,
    pub subgoal_duration_ms_total: u64,
    pub reconnects: u64,
    pub bots_connected: u64,
    pub bots_busy: u64,
    pub failures_by_code: HashMap<String, u64>,
}
