//! Deterministic in-memory adapter
//!
//! A small world model implementing the full adapter surface, used by the
//! offline binary and the scenario tests. Digging, crafting and container
//! traffic mutate plain maps; nothing here talks to a real server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::{AdapterEvent, AgentAdapter, FoundBlock, ItemStack, NearbyEntity};
use crate::catalog::GameCatalog;
use crate::model::Position;

const INVENTORY_SLOTS: u32 = 36;

struct SimWorld {
    position: Position,
    health: f64,
    hunger: f64,
    time: u32,
    dimension: String,
    inventory: HashMap<String, i64>,
    blocks: Vec<FoundBlock>,
    entities: Vec<NearbyEntity>,
    containers: HashMap<String, HashMap<String, i64>>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            position: Position::new(0.0, 64.0, 0.0),
            health: 20.0,
            hunger: 20.0,
            time: 2_000,
            dimension: "overworld".to_string(),
            inventory: HashMap::new(),
            blocks: Vec::new(),
            entities: Vec::new(),
            containers: HashMap::new(),
        }
    }
}

fn container_key(position: Position) -> String {
    format!(
        "{},{},{}",
        position.x.round() as i64,
        position.y.round() as i64,
        position.z.round() as i64
    )
}

pub struct SimAdapter {
    agent_id: String,
    catalog: Arc<dyn GameCatalog>,
    world: Mutex<SimWorld>,
    connected: AtomicBool,
    path_active: AtomicBool,
    movement_frozen: AtomicBool,
    path_blocked: AtomicBool,
    events_tx: broadcast::Sender<AdapterEvent>,
}

impl SimAdapter {
    pub fn new(agent_id: impl Into<String>, catalog: Arc<dyn GameCatalog>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            agent_id: agent_id.into(),
            catalog,
            world: Mutex::new(SimWorld::default()),
            connected: AtomicBool::new(false),
            path_active: AtomicBool::new(false),
            movement_frozen: AtomicBool::new(false),
            path_blocked: AtomicBool::new(false),
            events_tx,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    // ── world staging hooks (tests and the offline binary) ──────────────

    pub async fn stage_block(&self, name: &str, position: Position) {
        self.world.lock().await.blocks.push(FoundBlock {
            name: name.to_string(),
            position,
        });
    }

    pub async fn stage_entity(&self, kind: &str, position: Position, hostile: bool) {
        self.world.lock().await.entities.push(NearbyEntity {
            kind: kind.to_string(),
            position,
            hostile,
        });
    }

    pub async fn stage_item(&self, name: &str, count: i64) {
        *self
            .world
            .lock()
            .await
            .inventory
            .entry(name.to_string())
            .or_insert(0) += count;
    }

    pub async fn stage_container(&self, position: Position, items: Vec<ItemStack>) {
        let contents = items.into_iter().map(|s| (s.name, s.count)).collect();
        self.world
            .lock()
            .await
            .containers
            .insert(container_key(position), contents);
    }

    pub async fn set_time(&self, tick: u32) {
        self.world.lock().await.time = tick;
    }

    pub async fn set_health(&self, health: f64) {
        self.world.lock().await.health = health;
        let _ = self.events_tx.send(AdapterEvent::Hurt { health });
    }

    pub async fn kill(&self) {
        self.world.lock().await.health = 0.0;
        let _ = self.events_tx.send(AdapterEvent::Died);
    }

    pub fn kick(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(AdapterEvent::Kicked {
            reason: reason.to_string(),
        });
    }

    /// Make pathfinding report motion without actually moving, to exercise
    /// stall detection.
    pub fn freeze_movement(&self, frozen: bool) {
        self.movement_frozen.store(frozen, Ordering::SeqCst);
        self.path_active.store(frozen, Ordering::SeqCst);
    }

    /// Make every pathfind attempt fail.
    pub fn block_paths(&self, blocked: bool) {
        self.path_blocked.store(blocked, Ordering::SeqCst);
    }

    pub async fn inventory_count(&self, item: &str) -> i64 {
        self.world
            .lock()
            .await
            .inventory
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    fn require_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("adapter is not connected");
        }
        Ok(())
    }
}

#[async_trait]
impl AgentAdapter for SimAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events_tx.send(AdapterEvent::Spawned);
        debug!(agent = %self.agent_id, "sim adapter connected");
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.path_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }

    async fn position(&self) -> Result<Position> {
        Ok(self.world.lock().await.position)
    }

    async fn health(&self) -> Result<f64> {
        Ok(self.world.lock().await.health)
    }

    async fn hunger(&self) -> Result<f64> {
        Ok(self.world.lock().await.hunger)
    }

    async fn time_of_day(&self) -> Result<u32> {
        Ok(self.world.lock().await.time)
    }

    async fn dimension(&self) -> Result<String> {
        Ok(self.world.lock().await.dimension.clone())
    }

    async fn inventory(&self) -> Result<Vec<ItemStack>> {
        let world = self.world.lock().await;
        let mut stacks: Vec<ItemStack> = world
            .inventory
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(name, &count)| ItemStack {
                name: name.clone(),
                count,
            })
            .collect();
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stacks)
    }

    async fn empty_inventory_slots(&self) -> Result<u32> {
        let world = self.world.lock().await;
        let used: u32 = world
            .inventory
            .values()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let d = count / 64;
                let r = count % 64;
                let d = if r > 0 { d + 1 } else { d };
                d as u32
            })
            .sum();
        Ok(INVENTORY_SLOTS.saturating_sub(used))
    }

    async fn nearby_entities(&self, max_distance: f64) -> Result<Vec<NearbyEntity>> {
        let world = self.world.lock().await;
        let origin = world.position;
        let mut found: Vec<NearbyEntity> = world
            .entities
            .iter()
            .filter(|e| e.position.distance_to(&origin) <= max_distance)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.position
                .distance_to(&origin)
                .total_cmp(&b.position.distance_to(&origin))
        });
        Ok(found)
    }

    async fn find_blocks(
        &self,
        names: &[String],
        radius: f64,
        limit: usize,
    ) -> Result<Vec<FoundBlock>> {
        let world = self.world.lock().await;
        let origin = world.position;
        let mut found: Vec<FoundBlock> = world
            .blocks
            .iter()
            .filter(|b| names.iter().any(|n| n == &b.name))
            .filter(|b| b.position.distance_to(&origin) <= radius)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.position
                .distance_to(&origin)
                .total_cmp(&b.position.distance_to(&origin))
        });
        found.truncate(limit);
        Ok(found)
    }

    fn pathfinding_active(&self) -> bool {
        self.path_active.load(Ordering::SeqCst)
    }

    fn is_mining(&self) -> bool {
        false
    }

    fn is_building(&self) -> bool {
        false
    }

    async fn pathfind_to(&self, target: Position, _range: f64) -> Result<()> {
        self.require_connected()?;
        if self.path_blocked.load(Ordering::SeqCst) {
            bail!("no path to target");
        }
        if !self.movement_frozen.load(Ordering::SeqCst) {
            self.world.lock().await.position = target;
        }
        Ok(())
    }

    async fn set_path_goal(&self, target: Position, range: f64) -> Result<()> {
        self.path_active.store(true, Ordering::SeqCst);
        self.pathfind_to(target, range).await
    }

    async fn look_at(&self, _target: Position) -> Result<()> {
        Ok(())
    }

    async fn clear_controls(&self) -> Result<()> {
        self.path_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn dig(&self, position: Position) -> Result<()> {
        self.require_connected()?;
        let drop = {
            let mut world = self.world.lock().await;
            let index = world
                .blocks
                .iter()
                .position(|b| b.position.distance_to(&position) < 0.5);
            match index {
                Some(i) => {
                    let block = world.blocks.remove(i);
                    self.catalog
                        .primary_drop(&block.name)
                        .unwrap_or(block.name)
                }
                None => bail!("no block at target"),
            }
        };
        self.stage_item(&drop, 1).await;
        Ok(())
    }

    async fn place_block(&self, item: &str, position: Position) -> Result<()> {
        self.require_connected()?;
        let mut world = self.world.lock().await;
        let held = world.inventory.get(item).copied().unwrap_or(0);
        if held < 1 {
            bail!("cannot place {}: not carried", item);
        }
        if let Some(slot) = world.inventory.get_mut(item) {
            *slot -= 1;
        }
        world.blocks.push(FoundBlock {
            name: item.to_string(),
            position,
        });
        Ok(())
    }

    async fn equip_best_tool(&self, block: &str) -> Result<bool> {
        let tools = self.catalog.harvest_tools_for(block);
        if tools.is_empty() {
            return Ok(true);
        }
        let world = self.world.lock().await;
        Ok(tools
            .iter()
            .any(|t| world.inventory.get(t).copied().unwrap_or(0) > 0))
    }

    async fn equip_item(&self, item: &str) -> Result<bool> {
        let world = self.world.lock().await;
        Ok(world.inventory.get(item).copied().unwrap_or(0) > 0)
    }

    async fn craft(&self, item: &str, count: u32, _table: Option<Position>) -> Result<u32> {
        self.require_connected()?;
        let recipes = self.catalog.recipes_for(item);
        let recipe = match recipes.first() {
            Some(r) => r.clone(),
            None => bail!("no recipe for {}", item),
        };
        let executions = count.div_ceil(recipe.result_count).max(1);
        let mut world = self.world.lock().await;
        for ing in &recipe.ingredients {
            let need = (ing.count * executions) as i64;
            let have = world.inventory.get(&ing.item).copied().unwrap_or(0);
            if have < need {
                bail!("missing ingredient {} ({} of {})", ing.item, have, need);
            }
        }
        for ing in &recipe.ingredients {
            let need = (ing.count * executions) as i64;
            if let Some(slot) = world.inventory.get_mut(&ing.item) {
                *slot -= need;
            }
        }
        let produced = recipe.result_count * executions;
        *world.inventory.entry(item.to_string()).or_insert(0) += produced as i64;
        Ok(produced)
    }

    async fn deposit_items(&self, chest: Position, items: &[ItemStack]) -> Result<()> {
        self.require_connected()?;
        let key = container_key(chest);
        let mut world = self.world.lock().await;
        for stack in items {
            let held = world.inventory.get(&stack.name).copied().unwrap_or(0);
            let moved = held.min(stack.count);
            if moved <= 0 {
                continue;
            }
            if let Some(slot) = world.inventory.get_mut(&stack.name) {
                *slot -= moved;
            }
            *world
                .containers
                .entry(key.clone())
                .or_default()
                .entry(stack.name.clone())
                .or_insert(0) += moved;
        }
        Ok(())
    }

    async fn withdraw_items(&self, chest: Position, item: &str, count: i64) -> Result<i64> {
        self.require_connected()?;
        let key = container_key(chest);
        let mut world = self.world.lock().await;
        let available = world
            .containers
            .get(&key)
            .and_then(|c| c.get(item))
            .copied()
            .unwrap_or(0);
        let moved = available.min(count);
        if moved > 0 {
            if let Some(contents) = world.containers.get_mut(&key) {
                if let Some(slot) = contents.get_mut(item) {
                    *slot -= moved;
                }
            }
            *world.inventory.entry(item.to_string()).or_insert(0) += moved;
        }
        Ok(moved)
    }

    async fn smelt_in_furnace(
        &self,
        _furnace: Position,
        input: &str,
        count: i64,
        fuel: &str,
    ) -> Result<i64> {
        self.require_connected()?;
        let mut world = self.world.lock().await;
        let have_input = world.inventory.get(input).copied().unwrap_or(0);
        let have_fuel = world.inventory.get(fuel).copied().unwrap_or(0);
        if have_fuel < 1 {
            bail!("no {} for fuel", fuel);
        }
        let smelted = have_input.min(count);
        if smelted <= 0 {
            bail!("nothing to smelt: no {} carried", input);
        }
        if let Some(slot) = world.inventory.get_mut(input) {
            *slot -= smelted;
        }
        let output = match input {
            "raw_iron" => "iron_ingot".to_string(),
            other => format!("smelted_{}", other),
        };
        *world.inventory.entry(output).or_insert(0) += smelted;
        Ok(smelted)
    }

    async fn attack_nearest(&self, kind: Option<&str>, max_distance: f64) -> Result<bool> {
        self.require_connected()?;
        let mut world = self.world.lock().await;
        let origin = world.position;
        let index = world
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.hostile)
            .filter(|(_, e)| kind.map_or(true, |k| e.kind == k))
            .filter(|(_, e)| e.position.distance_to(&origin) <= max_distance)
            .min_by(|(_, a), (_, b)| {
                a.position
                    .distance_to(&origin)
                    .total_cmp(&b.position.distance_to(&origin))
            })
            .map(|(i, _)| i);
        match index {
            Some(i) => {
                world.entities.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn chat(&self, message: &str) -> Result<()> {
        debug!(agent = %self.agent_id, message, "sim chat");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;

    fn sim() -> SimAdapter {
        SimAdapter::new("bot-0", Arc::new(StaticCatalog::basic_overworld()))
    }

    #[tokio::test]
    async fn test_dig_drops_primary_item() {
        let adapter = sim();
        adapter.connect().await.unwrap();
        adapter
            .stage_block("stone", Position::new(1.0, 64.0, 0.0))
            .await;
        adapter.dig(Position::new(1.0, 64.0, 0.0)).await.unwrap();
        assert_eq!(adapter.inventory_count("cobblestone").await, 1);
    }

    #[tokio::test]
    async fn test_craft_consumes_ingredients() {
        let adapter = sim();
        adapter.connect().await.unwrap();
        adapter.stage_item("oak_log", 2).await;
        let produced = adapter.craft("oak_planks", 4, None).await.unwrap();
        assert_eq!(produced, 4);
        assert_eq!(adapter.inventory_count("oak_log").await, 1);
        assert_eq!(adapter.inventory_count("oak_planks").await, 4);
    }

    #[tokio::test]
    async fn test_container_round_trip() {
        let adapter = sim();
        adapter.connect().await.unwrap();
        let chest = Position::new(0.0, 64.0, 1.0);
        adapter.stage_item("cobblestone", 10).await;
        adapter
            .deposit_items(
                chest,
                &[ItemStack {
                    name: "cobblestone".into(),
                    count: 10,
                }],
            )
            .await
            .unwrap();
        assert_eq!(adapter.inventory_count("cobblestone").await, 0);
        let got = adapter.withdraw_items(chest, "cobblestone", 4).await.unwrap();
        assert_eq!(got, 4);
        assert_eq!(adapter.inventory_count("cobblestone").await, 4);
    }

    #[tokio::test]
    async fn test_disconnected_actions_fail() {
        let adapter = sim();
        assert!(adapter.dig(Position::default()).await.is_err());
    }
}
