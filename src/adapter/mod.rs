//! Agent Adapter - the capability seam over the game client
//!
//! The control core never touches the protocol library directly; everything
//! it can observe or do goes through this trait. Implementations own the
//! connection and publish lifecycle events on a broadcast channel.

mod sim;

pub use sim::SimAdapter;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::model::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyEntity {
    pub kind: String,
    pub position: Position,
    pub hostile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundBlock {
    pub name: String,
    pub position: Position,
}

/// Connection lifecycle and combat events surfaced by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdapterEvent {
    Spawned,
    Hurt { health: f64 },
    Died,
    Kicked { reason: String },
    ConnectionEnded { reason: String },
}

#[async_trait]
pub trait AgentAdapter: Send + Sync {
    // ── lifecycle ────────────────────────────────────────────────────────
    async fn connect(&self) -> Result<()>;
    async fn quit(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn events(&self) -> broadcast::Receiver<AdapterEvent>;

    // ── entity state ─────────────────────────────────────────────────────
    async fn position(&self) -> Result<Position>;
    async fn health(&self) -> Result<f64>;
    async fn hunger(&self) -> Result<f64>;
    async fn time_of_day(&self) -> Result<u32>;
    async fn dimension(&self) -> Result<String>;
    async fn inventory(&self) -> Result<Vec<ItemStack>>;
    async fn empty_inventory_slots(&self) -> Result<u32>;
    async fn nearby_entities(&self, max_distance: f64) -> Result<Vec<NearbyEntity>>;
    /// Scan for blocks by name within `radius`, nearest first, at most
    /// `limit` results. This is the single nearby-scan API.
    async fn find_blocks(&self, names: &[String], radius: f64, limit: usize)
        -> Result<Vec<FoundBlock>>;

    // ── movement probes (sync views the reflex monitor polls) ───────────
    fn pathfinding_active(&self) -> bool;
    fn is_mining(&self) -> bool;
    fn is_building(&self) -> bool;

    // ── actions ──────────────────────────────────────────────────────────
    /// Walk to within `range` of `target`, blocking until arrival or a
    /// pathing failure.
    async fn pathfind_to(&self, target: Position, range: f64) -> Result<()>;
    /// Set a pathfinding goal without waiting on it (reflex escapes).
    async fn set_path_goal(&self, target: Position, range: f64) -> Result<()>;
    async fn look_at(&self, target: Position) -> Result<()>;
    /// Drop every residual control: path goal, combat target, control
    /// states, in-progress collection.
    async fn clear_controls(&self) -> Result<()>;
    async fn dig(&self, position: Position) -> Result<()>;
    async fn place_block(&self, item: &str, position: Position) -> Result<()>;
    /// Equip the best owned tool for `block`. Returns false when nothing
    /// suitable is carried.
    async fn equip_best_tool(&self, block: &str) -> Result<bool>;
    async fn equip_item(&self, item: &str) -> Result<bool>;
    /// Craft `count` of `item`, optionally at a workbench. Returns the
    /// number actually produced.
    async fn craft(&self, item: &str, count: u32, table: Option<Position>) -> Result<u32>;
    async fn deposit_items(&self, chest: Position, items: &[ItemStack]) -> Result<()>;
    /// Returns the count actually withdrawn.
    async fn withdraw_items(&self, chest: Position, item: &str, count: i64) -> Result<i64>;
    /// Returns the count of output items produced.
    async fn smelt_in_furnace(
        &self,
        furnace: Position,
        input: &str,
        count: i64,
        fuel: &str,
    ) -> Result<i64>;
    /// Engage the nearest hostile (optionally of a given kind) via the
    /// combat plugin. Returns false when the target was lost.
    async fn attack_nearest(&self, kind: Option<&str>, max_distance: f64) -> Result<bool>;
    async fn chat(&self, message: &str) -> Result<()>;
}

/// A named structure as relative placements from an anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub blocks: Vec<BlueprintBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintBlock {
    pub dx: i64,
    pub dy: i64,
    pub dz: i64,
    pub block: String,
}

/// Blueprint lookup seam; file loading lives outside the core.
pub trait BlueprintSource: Send + Sync {
    fn get(&self, name: &str) -> Option<Blueprint>;
}

#[derive(Default)]
pub struct StaticBlueprints {
    blueprints: HashMap<String, Blueprint>,
}

impl StaticBlueprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, blueprint: Blueprint) -> Self {
        self.blueprints.insert(blueprint.name.clone(), blueprint);
        self
    }
}

impl BlueprintSource for StaticBlueprints {
    fn get(&self, name: &str) -> Option<Blueprint> {
        self.blueprints.get(name).cloned()
    }
}
