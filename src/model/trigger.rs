//! Planner triggers
//!
//! Pending triggers are a set: duplicates collapse, and the controller
//! drains the whole set when it asks for a fresh plan.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    Idle,
    SubgoalCompleted,
    SubgoalFailed,
    Attacked,
    Death,
    Stuck,
    Nightfall,
    InventoryFull,
    ToolMissing,
    Reconnect,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Idle => "IDLE",
            Trigger::SubgoalCompleted => "SUBGOAL_COMPLETED",
            Trigger::SubgoalFailed => "SUBGOAL_FAILED",
            Trigger::Attacked => "ATTACKED",
            Trigger::Death => "DEATH",
            Trigger::Stuck => "STUCK",
            Trigger::Nightfall => "NIGHTFALL",
            Trigger::InventoryFull => "INVENTORY_FULL",
            Trigger::ToolMissing => "TOOL_MISSING",
            Trigger::Reconnect => "RECONNECT",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered trigger set. BTreeSet keeps prompt rendering deterministic.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    inner: BTreeSet<Trigger>,
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the trigger was newly raised.
    pub fn raise(&mut self, trigger: Trigger) -> bool {
        self.inner.insert(trigger)
    }

    pub fn contains(&self, trigger: Trigger) -> bool {
        self.inner.contains(&trigger)
    }

    pub fn remove(&mut self, trigger: Trigger) -> bool {
        self.inner.remove(&trigger)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Take everything pending, leaving the set empty.
    pub fn drain(&mut self) -> Vec<Trigger> {
        let out: Vec<Trigger> = self.inner.iter().copied().collect();
        self.inner.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse() {
        let mut set = TriggerSet::new();
        assert!(set.raise(Trigger::Attacked));
        assert!(!set.raise(Trigger::Attacked));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_drain_empties() {
        let mut set = TriggerSet::new();
        set.raise(Trigger::Nightfall);
        set.raise(Trigger::Idle);
        let drained = set.drain();
        assert_eq!(drained.len(), 2);
        assert!(set.is_empty());
    }
}
