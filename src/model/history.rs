//! Bounded ring of recent subgoal attempts
//!
//! The planner prompt carries the tail of this buffer so the model can see
//! what just failed; eviction is FIFO.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::{FailureCode, Params};

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// One completed attempt, appended in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: i64,
    pub subgoal_name: String,
    #[serde(default)]
    pub params: Params,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_delta: Option<Params>,
    pub health_delta: f64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ActionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl ActionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64) -> HistoryEntry {
        HistoryEntry {
            timestamp: ts,
            subgoal_name: "collect".into(),
            params: Params::new(),
            outcome: "success".into(),
            error_code: None,
            error_details: None,
            inventory_delta: None,
            health_delta: 0.0,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_fifo_eviction() {
        let mut history = ActionHistory::new(3);
        for ts in 0..5 {
            history.push(entry(ts));
        }
        assert_eq!(history.len(), 3);
        let recent = history.recent(10);
        assert_eq!(recent[0].timestamp, 2);
        assert_eq!(recent[2].timestamp, 4);
    }

    #[test]
    fn test_recent_tail() {
        let mut history = ActionHistory::default();
        for ts in 0..10 {
            history.push(entry(ts));
        }
        let tail = history.recent(4);
        assert_eq!(tail.len(), 4);
        assert_eq!(tail[0].timestamp, 6);
    }
}
