//! Snapshot - the compact world view handed to the planner
//!
//! Built once per refresh by the snapshot builder and immutable afterwards.
//! Nearby lists are sorted by ascending distance and bounded so the prompt
//! payload stays small.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cap on nearby resource entries.
pub const MAX_NEARBY_RESOURCES: usize = 8;
/// Cap on nearby hostile and point-of-interest entries.
pub const MAX_NEARBY_HOSTILES: usize = 6;
pub const MAX_NEARBY_POI: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Horizontal displacement only, for stall detection.
    pub fn horizontal_delta(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPhase {
    Dawn,
    Day,
    Dusk,
    Night,
}

impl DayPhase {
    /// Derive the phase from the in-game tick (0..24000).
    pub fn from_tick(tick: u32) -> Self {
        match tick % 24_000 {
            0..=999 => DayPhase::Dawn,
            1_000..=11_999 => DayPhase::Day,
            12_000..=12_999 => DayPhase::Dusk,
            13_000..=22_999 => DayPhase::Night,
            _ => DayPhase::Dawn,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeInfo {
    pub tick: u32,
    pub phase: DayPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: Position,
    pub dimension: String,
    pub health: f64,
    pub hunger: f64,
    #[serde(default)]
    pub effects: Vec<String>,
}

/// Inventory rollup. `key_items` and `tools` together seed the planner's
/// projected inventory, so counts here are authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySummary {
    pub food_total: u32,
    #[serde(default)]
    pub tools: HashMap<String, i64>,
    pub blocks: i64,
    #[serde(default)]
    pub key_items: HashMap<String, i64>,
}

impl InventorySummary {
    /// Load figure used by the fallback planner's deposit pressure rule.
    pub fn load(&self) -> i64 {
        self.blocks + self.key_items.values().sum::<i64>()
    }

    pub fn count_of(&self, item: &str) -> i64 {
        self.key_items
            .get(item)
            .copied()
            .or_else(|| self.tools.get(item).copied())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyHostile {
    #[serde(rename = "type")]
    pub kind: String,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub distance: f64,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointOfInterest {
    #[serde(rename = "type")]
    pub kind: String,
    pub distance: f64,
    pub position: Position,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearbySummary {
    #[serde(default)]
    pub hostiles: Vec<NearbyHostile>,
    #[serde(default)]
    pub resources: Vec<NearbyResource>,
    #[serde(default)]
    pub points_of_interest: Vec<PointOfInterest>,
}

impl NearbySummary {
    pub fn nearest_hostile_distance(&self) -> Option<f64> {
        self.hostiles.first().map(|h| h.distance)
    }

    pub fn nearest_resource(&self, kind: &str) -> Option<&NearbyResource> {
        self.resources.iter().find(|r| r.kind == kind)
    }

    /// Sort every list ascending by distance and clamp to the caps.
    pub fn bound(&mut self) {
        self.hostiles
            .sort_by(|a, b| a.distance.total_cmp(&b.distance));
        self.resources
            .sort_by(|a, b| a.distance.total_cmp(&b.distance));
        self.points_of_interest
            .sort_by(|a, b| a.distance.total_cmp(&b.distance));
        self.hostiles.truncate(MAX_NEARBY_HOSTILES);
        self.resources.truncate(MAX_NEARBY_RESOURCES);
        self.points_of_interest.truncate(MAX_NEARBY_POI);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub current_goal: Option<String>,
    pub current_subgoal: Option<String>,
    #[serde(default)]
    pub progress_counters: HashMap<String, u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub agent_id: String,
    pub time: TimeInfo,
    pub player: PlayerState,
    pub inventory_summary: InventorySummary,
    pub nearby_summary: NearbySummary,
    pub task_context: TaskContext,
}
