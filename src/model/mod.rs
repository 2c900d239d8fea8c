//! Core Data Model
//!
//! Shared value types flowing between the snapshot builder, planner,
//! skill engine and controller. Everything here is serde round-trippable
//! so the store can persist it verbatim.

mod history;
mod outcome;
mod snapshot;
mod subgoal;
mod trigger;

pub use history::{ActionHistory, HistoryEntry, DEFAULT_HISTORY_CAPACITY};
pub use outcome::{FailureCode, SkillResult};
pub use snapshot::{
    DayPhase, InventorySummary, NearbyHostile, NearbyResource, NearbySummary, PlayerState,
    PointOfInterest, Position, Snapshot, TaskContext, TimeInfo, MAX_NEARBY_HOSTILES,
    MAX_NEARBY_POI, MAX_NEARBY_RESOURCES,
};
pub use subgoal::{Params, RuntimeSubgoal, Subgoal, SubgoalName, SUBGOAL_NAMES};
pub use trigger::{Trigger, TriggerSet};

/// Millisecond wall-clock used for leases, windows and retry scheduling.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
