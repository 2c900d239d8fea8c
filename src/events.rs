//! Internal Event Bus for Fleet Coordination
//!
//! Provides a centralized, asynchronous pub/sub system for cross-component
//! telemetry. Subscribers are observers only; control flow never depends on
//! bus delivery.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::coord::LockAction;
use crate::model::Trigger;

/// Global fleet events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FleetEvent {
    /// A lock lease changed hands or expired
    LockTransition {
        action: LockAction,
        key: String,
        owner: String,
    },
    /// A controller raised a planner trigger
    TriggerRaised { bot_id: String, trigger: Trigger },
    /// A planner call resolved
    PlanResolved {
        bot_id: String,
        status: String,
        subgoal_count: usize,
    },
    /// A skill attempt finished
    SkillFinished {
        bot_id: String,
        subgoal: String,
        success: bool,
    },
    /// A controller was force-disconnected
    Recovery { bot_id: String, reason: String },
    /// An operational incident was recorded
    Incident { bot_id: String, category: String },
    /// Generic status update
    StatusUpdate(String),
}

pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.tx.send(event);
    }

    /// Create a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// Global singleton instance of the EventBus
    pub static ref FLEET_EVENT_BUS: Arc<EventBus> = Arc::new(EventBus::new());
}

/// Helper macro to publish events globally
#[macro_export]
macro_rules! emit_event {
    ($event:expr) => {
        $crate::events::FLEET_EVENT_BUS.publish($event);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(FleetEvent::StatusUpdate("fleet up".into()));
        match rx.recv().await.unwrap() {
            FleetEvent::StatusUpdate(msg) => assert_eq!(msg, "fleet up"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
