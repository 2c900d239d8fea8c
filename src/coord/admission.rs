//! Fleet-wide admission limiters
//!
//! `SkillLimiter` caps how many skills run concurrently across the whole
//! fleet, with a head-of-line FIFO so a starving agent is always next in.
//! `ExplorerLimiter` is a plain bounded set for exploration slots.

use std::collections::{HashSet, VecDeque};

use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct SkillLanes {
    active: HashSet<String>,
    waiters: VecDeque<String>,
}

pub struct SkillLimiter {
    capacity: usize,
    lanes: Mutex<SkillLanes>,
}

impl SkillLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lanes: Mutex::new(SkillLanes::default()),
        }
    }

    /// Try to take a slot. Grants when the agent already holds one, or when
    /// it sits at the head of the waiting line and a slot is free. Everyone
    /// else is appended to the line (once) and refused; callers poll again
    /// on their next tick.
    pub async fn try_enter(&self, agent_id: &str) -> bool {
        let mut lanes = self.lanes.lock().await;
        if lanes.active.contains(agent_id) {
            return true;
        }
        if !lanes.waiters.iter().any(|w| w == agent_id) {
            lanes.waiters.push_back(agent_id.to_string());
        }
        let at_head = lanes.waiters.front().is_some_and(|w| w == agent_id);
        if at_head && lanes.active.len() < self.capacity {
            lanes.waiters.pop_front();
            lanes.active.insert(agent_id.to_string());
            return true;
        }
        debug!(agent = agent_id, "skill slot refused, waiting in line");
        false
    }

    /// Give the slot back and leave the waiting line if queued.
    pub async fn leave(&self, agent_id: &str) {
        let mut lanes = self.lanes.lock().await;
        lanes.active.remove(agent_id);
        lanes.waiters.retain(|w| w != agent_id);
    }

    pub async fn active_count(&self) -> usize {
        self.lanes.lock().await.active.len()
    }
}

pub struct ExplorerLimiter {
    capacity: usize,
    active: Mutex<HashSet<String>>,
}

impl ExplorerLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Idempotent for an agent already holding a slot.
    pub async fn try_enter(&self, agent_id: &str) -> bool {
        let mut active = self.active.lock().await;
        if active.contains(agent_id) {
            return true;
        }
        if active.len() < self.capacity {
            active.insert(agent_id.to_string());
            return true;
        }
        false
    }

    pub async fn leave(&self, agent_id: &str) {
        self.active.lock().await.remove(agent_id);
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_fairness() {
        let limiter = SkillLimiter::new(1);
        assert!(limiter.try_enter("A").await);
        // B queues first, C after; neither can enter while A holds the slot
        assert!(!limiter.try_enter("B").await);
        assert!(!limiter.try_enter("C").await);
        limiter.leave("A").await;
        // C is not at the head, so it stays out even though a slot is free
        assert!(!limiter.try_enter("C").await);
        assert!(limiter.try_enter("B").await);
        limiter.leave("B").await;
        assert!(limiter.try_enter("C").await);
    }

    #[tokio::test]
    async fn test_reentry_is_idempotent() {
        let limiter = SkillLimiter::new(2);
        assert!(limiter.try_enter("A").await);
        assert!(limiter.try_enter("A").await);
        assert_eq!(limiter.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_leave_clears_waiting_line() {
        let limiter = SkillLimiter::new(1);
        assert!(limiter.try_enter("A").await);
        assert!(!limiter.try_enter("B").await);
        assert!(!limiter.try_enter("C").await);
        limiter.leave("B").await;
        limiter.leave("A").await;
        // with B gone, C is the new head
        assert!(limiter.try_enter("C").await);
    }

    #[tokio::test]
    async fn test_explorer_slots() {
        let limiter = ExplorerLimiter::new(2);
        assert!(limiter.try_enter("A").await);
        assert!(limiter.try_enter("A").await);
        assert!(limiter.try_enter("B").await);
        assert!(!limiter.try_enter("C").await);
        limiter.leave("A").await;
        assert!(limiter.try_enter("C").await);
    }
}
