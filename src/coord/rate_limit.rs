//! Rolling-hour LLM rate limiter
//!
//! Two sliding windows: one FIFO of call timestamps per agent and one global
//! FIFO across the fleet. Both are pruned lazily on every decision, the
//! per-agent cap is evaluated first, and nothing is recorded on denial so a
//! denied call never eats budget.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::now_ms;

const WINDOW_MS: i64 = 3_600_000;
const MIN_RETRY_AFTER_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateDenyReason {
    BotCap,
    GlobalCap,
}

impl RateDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateDenyReason::BotCap => "BOT_CAP",
            RateDenyReason::GlobalCap => "GLOBAL_CAP",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<RateDenyReason>,
    pub retry_after_ms: Option<i64>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_ms: None,
        }
    }

    fn deny(reason: RateDenyReason, retry_after_ms: i64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_ms: Some(retry_after_ms.max(MIN_RETRY_AFTER_MS)),
        }
    }
}

#[derive(Default)]
struct Windows {
    per_agent: HashMap<String, VecDeque<i64>>,
    global: VecDeque<i64>,
}

impl Windows {
    fn prune(&mut self, now: i64) {
        let cutoff = now - WINDOW_MS;
        while self.global.front().is_some_and(|&t| t <= cutoff) {
            self.global.pop_front();
        }
        self.per_agent.retain(|_, window| {
            while window.front().is_some_and(|&t| t <= cutoff) {
                window.pop_front();
            }
            !window.is_empty()
        });
    }
}

pub struct RateLimiter {
    per_bot_cap: u32,
    global_cap: u32,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(per_bot_cap: u32, global_cap: u32) -> Self {
        Self {
            per_bot_cap,
            global_cap,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Try to admit one LLM call for `agent_id`. Admission is atomic: the
    /// timestamp is appended to both windows only when both caps pass.
    pub async fn consume(&self, agent_id: &str) -> RateDecision {
        self.consume_at(agent_id, now_ms()).await
    }

    pub async fn consume_at(&self, agent_id: &str, now: i64) -> RateDecision {
        let mut windows = self.windows.lock().await;
        windows.prune(now);

        let agent_window = windows.per_agent.entry(agent_id.to_string()).or_default();
        if agent_window.len() as u32 >= self.per_bot_cap {
            let retry = agent_window
                .front()
                .map(|&t| t + WINDOW_MS - now)
                .unwrap_or(MIN_RETRY_AFTER_MS);
            debug!(agent = agent_id, retry_after_ms = retry, "llm call denied by per-bot cap");
            return RateDecision::deny(RateDenyReason::BotCap, retry);
        }
        if windows.global.len() as u32 >= self.global_cap {
            let retry = windows
                .global
                .front()
                .map(|&t| t + WINDOW_MS - now)
                .unwrap_or(MIN_RETRY_AFTER_MS);
            debug!(agent = agent_id, retry_after_ms = retry, "llm call denied by global cap");
            return RateDecision::deny(RateDenyReason::GlobalCap, retry);
        }

        windows
            .per_agent
            .entry(agent_id.to_string())
            .or_default()
            .push_back(now);
        windows.global.push_back(now);
        RateDecision::allow()
    }

    /// Calls admitted in the trailing hour, fleet-wide or for one agent.
    pub async fn calls_in_last_hour(&self, agent_id: Option<&str>) -> u32 {
        self.calls_in_last_hour_at(agent_id, now_ms()).await
    }

    pub async fn calls_in_last_hour_at(&self, agent_id: Option<&str>, now: i64) -> u32 {
        let mut windows = self.windows.lock().await;
        windows.prune(now);
        match agent_id {
            Some(id) => windows.per_agent.get(id).map(|w| w.len()).unwrap_or(0) as u32,
            None => windows.global.len() as u32,
        }
    }

    pub fn per_bot_cap(&self) -> u32 {
        self.per_bot_cap
    }

    pub fn global_cap(&self) -> u32 {
        self.global_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bot_cap_denies_third_call() {
        let limiter = RateLimiter::new(2, 100);
        assert!(limiter.consume_at("a", 0).await.allowed);
        assert!(limiter.consume_at("a", 10).await.allowed);

        let denied = limiter.consume_at("a", 20).await;
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(RateDenyReason::BotCap));
        assert!(denied.retry_after_ms.unwrap() >= 1_000);
    }

    #[tokio::test]
    async fn test_global_cap_spans_agents() {
        let limiter = RateLimiter::new(10, 2);
        assert!(limiter.consume_at("a", 0).await.allowed);
        assert!(limiter.consume_at("b", 1).await.allowed);
        let denied = limiter.consume_at("c", 2).await;
        assert_eq!(denied.reason, Some(RateDenyReason::GlobalCap));
    }

    #[tokio::test]
    async fn test_denial_records_nothing() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.consume_at("a", 0).await.allowed);
        let _ = limiter.consume_at("b", 1).await;
        assert_eq!(limiter.calls_in_last_hour_at(None, 2).await, 1);
        assert_eq!(limiter.calls_in_last_hour_at(Some("b"), 2).await, 0);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(1, 10);
        assert!(limiter.consume_at("a", 0).await.allowed);
        assert!(!limiter.consume_at("a", WINDOW_MS - 1).await.allowed);
        // the original timestamp has aged out
        assert!(limiter.consume_at("a", WINDOW_MS + 1).await.allowed);
    }

    #[tokio::test]
    async fn test_retry_after_tracks_oldest_call() {
        let limiter = RateLimiter::new(1, 10);
        assert!(limiter.consume_at("a", 0).await.allowed);
        let denied = limiter.consume_at("a", 100_000).await;
        assert_eq!(denied.retry_after_ms, Some(WINDOW_MS - 100_000));
    }
}
