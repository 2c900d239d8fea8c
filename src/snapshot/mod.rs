//! Snapshot Builder
//!
//! Derives the compact world view the planner consumes from the raw adapter
//! surface. Nearby scans are the expensive part, so they are cached for a
//! short window unless the caller forces a refresh.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::AgentAdapter;
use crate::catalog::GameCatalog;
use crate::model::{
    now_ms, DayPhase, InventorySummary, NearbyHostile, NearbyResource, NearbySummary, PlayerState,
    PointOfInterest, Snapshot, TaskContext, TimeInfo, MAX_NEARBY_POI, MAX_NEARBY_RESOURCES,
};

const RESOURCE_SCAN_RADIUS: f64 = 48.0;
const POI_SCAN_RADIUS: f64 = 24.0;
const ENTITY_SCAN_RADIUS: f64 = 32.0;

const TOOL_SUFFIXES: [&str; 5] = ["_pickaxe", "_axe", "_sword", "_shovel", "_hoe"];

fn is_tool(name: &str) -> bool {
    TOOL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

struct CachedNearby {
    built_at: i64,
    nearby: NearbySummary,
}

pub struct SnapshotBuilder {
    adapter: Arc<dyn AgentAdapter>,
    catalog: Arc<dyn GameCatalog>,
    nearby_cache_ms: i64,
    cache: Mutex<Option<CachedNearby>>,
}

impl SnapshotBuilder {
    pub fn new(
        adapter: Arc<dyn AgentAdapter>,
        catalog: Arc<dyn GameCatalog>,
        nearby_cache_ms: u64,
    ) -> Self {
        Self {
            adapter,
            catalog,
            nearby_cache_ms: nearby_cache_ms as i64,
            cache: Mutex::new(None),
        }
    }

    /// Build a fresh snapshot. `force` bypasses the nearby-scan cache.
    pub async fn build(
        &self,
        agent_id: &str,
        task_context: TaskContext,
        force: bool,
    ) -> Result<Snapshot> {
        let position = self
            .adapter
            .position()
            .await
            .context("reading player position")?;
        let tick = self.adapter.time_of_day().await.context("reading time")?;

        let player = PlayerState {
            position,
            dimension: self.adapter.dimension().await.context("reading dimension")?,
            health: self.adapter.health().await.context("reading health")?,
            hunger: self.adapter.hunger().await.context("reading hunger")?,
            effects: Vec::new(),
        };

        let inventory_summary = self.summarize_inventory().await?;
        let nearby_summary = self.nearby(force).await?;

        Ok(Snapshot {
            agent_id: agent_id.to_string(),
            time: TimeInfo {
                tick,
                phase: DayPhase::from_tick(tick),
            },
            player,
            inventory_summary,
            nearby_summary,
            task_context,
        })
    }

    /// Drop the nearby cache, e.g. after a reconnect.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn summarize_inventory(&self) -> Result<InventorySummary> {
        let stacks = self.adapter.inventory().await.context("reading inventory")?;
        let mut summary = InventorySummary::default();
        for stack in stacks {
            if let Some(value) = self.catalog.food_value(&stack.name) {
                summary.food_total += value * stack.count.max(0) as u32;
            }
            if self.catalog.is_block_item(&stack.name) {
                summary.blocks += stack.count;
            }
            if is_tool(&stack.name) {
                *summary.tools.entry(stack.name.clone()).or_insert(0) += stack.count;
            } else {
                *summary.key_items.entry(stack.name.clone()).or_insert(0) += stack.count;
            }
        }
        Ok(summary)
    }

    async fn nearby(&self, force: bool) -> Result<NearbySummary> {
        let now = now_ms();
        if !force {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if now - cached.built_at < self.nearby_cache_ms {
                    return Ok(cached.nearby.clone());
                }
            }
        }

        let origin = self.adapter.position().await?;
        let mut nearby = NearbySummary::default();

        for entity in self.adapter.nearby_entities(ENTITY_SCAN_RADIUS).await? {
            if entity.hostile {
                nearby.hostiles.push(NearbyHostile {
                    kind: entity.kind,
                    distance: entity.position.distance_to(&origin),
                });
            }
        }

        let resource_names = self.catalog.resource_scan_names();
        let found = self
            .adapter
            .find_blocks(
                &resource_names,
                RESOURCE_SCAN_RADIUS,
                MAX_NEARBY_RESOURCES * 2,
            )
            .await?;
        for block in found {
            nearby.resources.push(NearbyResource {
                distance: block.position.distance_to(&origin),
                kind: block.name,
                position: block.position,
            });
        }

        let poi_names = self.catalog.poi_scan_names();
        let found = self
            .adapter
            .find_blocks(&poi_names, POI_SCAN_RADIUS, MAX_NEARBY_POI * 2)
            .await?;
        for block in found {
            nearby.points_of_interest.push(PointOfInterest {
                distance: block.position.distance_to(&origin),
                kind: block.name,
                position: block.position,
            });
        }

        nearby.bound();
        debug!(
            hostiles = nearby.hostiles.len(),
            resources = nearby.resources.len(),
            poi = nearby.points_of_interest.len(),
            "nearby scan complete"
        );

        *self.cache.lock().await = Some(CachedNearby {
            built_at: now,
            nearby: nearby.clone(),
        });
        Ok(nearby)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SimAdapter;
    use crate::catalog::StaticCatalog;
    use crate::model::Position;

    async fn builder() -> (Arc<SimAdapter>, SnapshotBuilder) {
        let catalog: Arc<dyn GameCatalog> = Arc::new(StaticCatalog::basic_overworld());
        let adapter = Arc::new(SimAdapter::new("bot-0", catalog.clone()));
        adapter.connect().await.unwrap();
        let builder = SnapshotBuilder::new(adapter.clone(), catalog, 1_000);
        (adapter, builder)
    }

    #[tokio::test]
    async fn test_snapshot_shape() {
        let (adapter, builder) = builder().await;
        adapter
            .stage_block("oak_log", Position::new(5.0, 64.0, 0.0))
            .await;
        adapter
            .stage_block("stone", Position::new(2.0, 64.0, 0.0))
            .await;
        adapter
            .stage_entity("zombie", Position::new(10.0, 64.0, 0.0), true)
            .await;
        adapter.stage_item("wooden_pickaxe", 1).await;
        adapter.stage_item("bread", 2).await;

        let snap = builder
            .build("bot-0", TaskContext::default(), true)
            .await
            .unwrap();
        assert_eq!(snap.agent_id, "bot-0");
        assert_eq!(snap.nearby_summary.resources[0].kind, "stone");
        assert_eq!(snap.nearby_summary.hostiles[0].kind, "zombie");
        assert_eq!(snap.inventory_summary.tools.get("wooden_pickaxe"), Some(&1));
        assert_eq!(snap.inventory_summary.food_total, 10);
        assert!(snap
            .nearby_summary
            .resources
            .windows(2)
            .all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_nearby_cache_reuse() {
        let (adapter, builder) = builder().await;
        adapter
            .stage_block("stone", Position::new(3.0, 64.0, 0.0))
            .await;
        let first = builder
            .build("bot-0", TaskContext::default(), false)
            .await
            .unwrap();
        assert_eq!(first.nearby_summary.resources.len(), 1);

        // new block appears but the cached scan is still served
        adapter
            .stage_block("stone", Position::new(4.0, 64.0, 0.0))
            .await;
        let second = builder
            .build("bot-0", TaskContext::default(), false)
            .await
            .unwrap();
        assert_eq!(second.nearby_summary.resources.len(), 1);

        // forced refresh sees it
        let third = builder
            .build("bot-0", TaskContext::default(), true)
            .await
            .unwrap();
        assert_eq!(third.nearby_summary.resources.len(), 2);
    }
}
