//! Deterministic subgoal handlers
//!
//! Each handler drives the adapter's verbs toward one bounded outcome and
//! reports a structured result. Handlers never guess about micro-steps:
//! pathing, digging and container traffic are the adapter's problem.

use anyhow::Result;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::SkillContext;
use crate::adapter::ItemStack;
use crate::model::{FailureCode, Params, Position, SkillResult, Subgoal, SubgoalName};

const COLLECT_SCAN_RADIUS: f64 = 48.0;
const HOSTILE_INTERRUPT_DISTANCE: f64 = 4.0;
const WORKBENCH_REACH: f64 = 8.0;
const GUARD_SWEEP_MS: u64 = 250;

pub async fn run(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    match subgoal.name {
        SubgoalName::Explore => explore(ctx, subgoal).await,
        SubgoalName::Goto => goto(ctx, subgoal).await,
        SubgoalName::GotoNearest => goto_nearest(ctx, subgoal).await,
        SubgoalName::Collect => collect(ctx, subgoal).await,
        SubgoalName::Craft => craft(ctx, subgoal).await,
        SubgoalName::Smelt => smelt(ctx, subgoal).await,
        SubgoalName::Deposit => deposit(ctx, subgoal).await,
        SubgoalName::Withdraw => withdraw(ctx, subgoal).await,
        SubgoalName::BuildBlueprint => build_blueprint(ctx, subgoal).await,
        SubgoalName::CombatEngage => combat_engage(ctx, subgoal).await,
        SubgoalName::CombatGuard => combat_guard(ctx, subgoal).await,
    }
}

fn target_of(subgoal: &Subgoal) -> Option<String> {
    subgoal
        .str_param("block")
        .or_else(|| subgoal.str_param("item"))
        .map(|s| s.to_string())
}

fn metric(key: &str, value: impl Into<Value>) -> Params {
    let mut map = Params::new();
    map.insert(key.to_string(), value.into());
    map
}

async fn explore(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let radius = subgoal.int_param("radius").unwrap_or(24).max(4) as f64;
    let return_to_base = subgoal
        .params
        .get("return_to_base")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let origin = ctx.adapter.position().await?;
    let angle: f64 = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0.0..std::f64::consts::TAU)
    };
    let target = Position::new(
        origin.x + radius * angle.cos(),
        origin.y,
        origin.z + radius * angle.sin(),
    );
    if ctx.adapter.pathfind_to(target, 3.0).await.is_err() {
        return Ok(SkillResult::failure(
            FailureCode::PathfindFailed,
            format!("could not reach exploration point at radius {}", radius),
            true,
        ));
    }

    let mut sighting = None;
    if let Some(hint) = subgoal.str_param("resource_hint") {
        let names = vec![hint.to_string()];
        let found = ctx.adapter.find_blocks(&names, radius, 1).await?;
        sighting = found.first().map(|b| b.name.clone());
    }

    if return_to_base && ctx.adapter.pathfind_to(ctx.base, 3.0).await.is_err() {
        return Ok(SkillResult::failure(
            FailureCode::PathfindFailed,
            "could not return to base after exploring",
            true,
        ));
    }

    let details = match sighting {
        Some(name) => format!("explored radius {}, sighted {}", radius, name),
        None => format!("explored radius {}", radius),
    };
    Ok(SkillResult::success(details))
}

async fn goto(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let (Some(x), Some(y), Some(z)) = (
        subgoal.int_param("x"),
        subgoal.int_param("y"),
        subgoal.int_param("z"),
    ) else {
        return Ok(SkillResult::failure(
            FailureCode::PathfindFailed,
            "goto without coordinates",
            false,
        ));
    };
    let range = subgoal.int_param("range").unwrap_or(2).max(1) as f64;
    let target = Position::new(x as f64, y as f64, z as f64);
    match ctx.adapter.pathfind_to(target, range).await {
        Ok(()) => Ok(SkillResult::success(format!(
            "arrived at {},{},{}",
            x, y, z
        ))),
        Err(e) => Ok(SkillResult::failure(
            FailureCode::PathfindFailed,
            e.to_string(),
            true,
        )),
    }
}

async fn goto_nearest(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(target) = target_of(subgoal) else {
        return Ok(SkillResult::failure(
            FailureCode::ResourceNotFound,
            "goto_nearest without a target block",
            false,
        ));
    };
    let max_distance = subgoal.int_param("max_distance").unwrap_or(48).max(1) as f64;
    let names = scan_names(ctx, &target);
    let found = ctx.adapter.find_blocks(&names, max_distance, 1).await?;
    let Some(block) = found.into_iter().next() else {
        return Ok(SkillResult::failure(
            FailureCode::ResourceNotFound,
            format!("no {} within {}", target, max_distance),
            true,
        ));
    };
    match ctx.adapter.pathfind_to(block.position, 2.0).await {
        Ok(()) => Ok(SkillResult::success(format!("standing by {}", block.name))),
        Err(e) => Ok(SkillResult::failure(
            FailureCode::PathfindFailed,
            e.to_string(),
            true,
        )),
    }
}

/// Block names to scan for a collect/goto target: the block itself when the
/// catalog knows it, otherwise every source block dropping the item.
fn scan_names(ctx: &SkillContext, target: &str) -> Vec<String> {
    if let Some(block) = ctx.catalog.resolve_block(target) {
        return vec![block.name];
    }
    let sources = ctx.catalog.source_blocks_for(target);
    if sources.is_empty() {
        vec![target.to_string()]
    } else {
        sources
    }
}

async fn collect(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(target) = target_of(subgoal) else {
        return Ok(SkillResult::failure(
            FailureCode::ResourceNotFound,
            "collect without a target",
            false,
        ));
    };
    let count = subgoal.int_param("count").unwrap_or(1).max(1);
    let names = scan_names(ctx, &target);
    let mut collected = 0i64;

    while collected < count {
        if ctx.adapter.empty_inventory_slots().await? == 0 {
            return Ok(SkillResult::failure(
                FailureCode::InventoryFull,
                format!("inventory full after {} of {}", collected, count),
                true,
            ));
        }
        let hostiles = ctx
            .adapter
            .nearby_entities(HOSTILE_INTERRUPT_DISTANCE)
            .await?;
        if hostiles.iter().any(|e| e.hostile) {
            return Ok(SkillResult::failure(
                FailureCode::InterruptedByHostiles,
                format!("hostiles closed in after {} of {}", collected, count),
                true,
            ));
        }

        let found = ctx
            .adapter
            .find_blocks(&names, COLLECT_SCAN_RADIUS, 1)
            .await?;
        let Some(block) = found.into_iter().next() else {
            return Ok(SkillResult::failure(
                FailureCode::ResourceNotFound,
                format!("no {} left nearby, collected {} of {}", target, collected, count),
                true,
            ));
        };
        if !ctx.adapter.equip_best_tool(&block.name).await? {
            return Ok(SkillResult::failure(
                FailureCode::NoToolAvailable,
                format!("no tool that harvests {}", block.name),
                false,
            ));
        }
        if let Err(e) = ctx.adapter.pathfind_to(block.position, 2.0).await {
            return Ok(SkillResult::failure(
                FailureCode::PathfindFailed,
                e.to_string(),
                true,
            ));
        }
        if let Err(e) = ctx.adapter.dig(block.position).await {
            return Ok(SkillResult::failure(
                FailureCode::ResourceNotFound,
                e.to_string(),
                true,
            ));
        }
        collected += 1;
    }

    Ok(SkillResult::success_with(
        format!("collected {} {}", collected, target),
        metric("collected", collected),
    ))
}

async fn craft(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(item) = target_of(subgoal) else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "craft without an item",
            false,
        ));
    };
    let count = subgoal.int_param("count").unwrap_or(1).max(1);

    let recipes = ctx.catalog.recipes_for(&item);
    let Some(recipe) = recipes.first() else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            format!("no recipe produces {}", item),
            false,
        ));
    };

    let mut table = None;
    if recipe.needs_crafting_table() {
        let names = vec!["crafting_table".to_string()];
        let found = ctx.adapter.find_blocks(&names, WORKBENCH_REACH, 1).await?;
        table = found.first().map(|b| b.position);
        if table.is_none() {
            // carry one? put it down next to us
            if ctx.adapter.equip_item("crafting_table").await? {
                let origin = ctx.adapter.position().await?;
                let spot = Position::new(origin.x + 1.0, origin.y, origin.z);
                if let Err(e) = ctx.adapter.place_block("crafting_table", spot).await {
                    return Ok(SkillResult::failure(
                        FailureCode::PlacementFailed,
                        e.to_string(),
                        true,
                    ));
                }
                table = Some(spot);
            } else {
                return Ok(SkillResult::failure(
                    FailureCode::DependsOnItem,
                    format!("{} needs a workbench and none is reachable", item),
                    false,
                ));
            }
        }
    }

    let before = inventory_count(ctx, &item).await?;
    if let Err(e) = ctx.adapter.craft(&item, count as u32, table).await {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            e.to_string(),
            false,
        ));
    }
    // progress is judged by the target item's delta alone; byproducts do
    // not count toward the requested amount
    let gained = inventory_count(ctx, &item).await? - before;
    if gained < count {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            format!("crafted {} of {} {}", gained, count, item),
            false,
        ));
    }
    Ok(SkillResult::success_with(
        format!("crafted {} {}", gained, item),
        metric("crafted", gained),
    ))
}

async fn smelt(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(input) = subgoal.str_param("input").map(|s| s.to_string()) else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "smelt without an input",
            false,
        ));
    };
    let count = subgoal.int_param("count").unwrap_or(1).max(1);
    let fuel = subgoal.str_param("fuel").unwrap_or("coal").to_string();

    let names = vec!["furnace".to_string()];
    let found = ctx.adapter.find_blocks(&names, WORKBENCH_REACH, 1).await?;
    let Some(furnace) = found.into_iter().next() else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "no furnace in reach",
            false,
        ));
    };
    match ctx
        .adapter
        .smelt_in_furnace(furnace.position, &input, count, &fuel)
        .await
    {
        Ok(smelted) if smelted >= count => Ok(SkillResult::success_with(
            format!("smelted {} {}", smelted, input),
            metric("smelted", smelted),
        )),
        Ok(smelted) => Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            format!("smelted only {} of {} {}", smelted, count, input),
            false,
        )),
        Err(e) => Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            e.to_string(),
            false,
        )),
    }
}

/// Items always kept on deposit: tools and food.
async fn non_essential_items(ctx: &SkillContext) -> Result<Vec<ItemStack>> {
    let stacks = ctx.adapter.inventory().await?;
    Ok(stacks
        .into_iter()
        .filter(|s| {
            let is_tool = ["_pickaxe", "_axe", "_sword", "_shovel", "_hoe"]
                .iter()
                .any(|suffix| s.name.ends_with(suffix));
            let is_food = ctx.catalog.food_value(&s.name).is_some();
            !is_tool && !is_food
        })
        .collect())
}

async fn storage_chest(ctx: &SkillContext) -> Result<Option<Position>> {
    if let Err(e) = ctx.adapter.pathfind_to(ctx.base, 3.0).await {
        debug!(error = %e, "could not reach base for storage");
        return Ok(None);
    }
    let names = vec!["chest".to_string()];
    let found = ctx
        .adapter
        .find_blocks(&names, ctx.base_radius, 1)
        .await?;
    Ok(found.into_iter().next().map(|b| b.position))
}

async fn deposit(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(chest) = storage_chest(ctx).await? else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "no storage chest at base",
            false,
        ));
    };

    let items = match subgoal.params.get("items") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|v| {
                let name = v.get("name")?.as_str()?.to_string();
                let count = v.get("count")?.as_i64()?;
                Some(ItemStack { name, count })
            })
            .collect(),
        _ => non_essential_items(ctx).await?,
    };
    if items.is_empty() {
        return Ok(SkillResult::success("nothing to deposit"));
    }
    let moved: i64 = items.iter().map(|s| s.count).sum();
    ctx.adapter.deposit_items(chest, &items).await?;
    Ok(SkillResult::success_with(
        format!("deposited {} items", moved),
        metric("deposited", moved),
    ))
}

async fn withdraw(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(item) = target_of(subgoal) else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "withdraw without an item",
            false,
        ));
    };
    let count = subgoal.int_param("count").unwrap_or(1).max(1);
    let Some(chest) = storage_chest(ctx).await? else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "no storage chest at base",
            false,
        ));
    };
    let got = ctx.adapter.withdraw_items(chest, &item, count).await?;
    if got < count {
        return Ok(SkillResult::failure(
            FailureCode::ResourceNotFound,
            format!("storage held {} of {} {}", got, count, item),
            false,
        ));
    }
    Ok(SkillResult::success_with(
        format!("withdrew {} {}", got, item),
        metric("withdrawn", got),
    ))
}

async fn build_blueprint(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let Some(name) = subgoal.str_param("blueprint") else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            "build_blueprint without a blueprint name",
            false,
        ));
    };
    let Some(blueprint) = ctx.blueprints.get(name) else {
        return Ok(SkillResult::failure(
            FailureCode::DependsOnItem,
            format!("unknown blueprint {}", name),
            false,
        ));
    };
    let anchor = subgoal
        .params
        .get("anchor")
        .and_then(|v| v.as_object())
        .and_then(|a| {
            Some(Position::new(
                a.get("x")?.as_f64()?,
                a.get("y")?.as_f64()?,
                a.get("z")?.as_f64()?,
            ))
        });
    let Some(anchor) = anchor else {
        return Ok(SkillResult::failure(
            FailureCode::PlacementFailed,
            "build_blueprint without a usable anchor",
            false,
        ));
    };

    let mut placements = blueprint.blocks.clone();
    // bottom-up keeps supports under later rows
    placements.sort_by_key(|b| (b.dy, b.dx, b.dz));

    let mut placed = 0i64;
    for block in placements {
        if !ctx.adapter.equip_item(&block.block).await? {
            return Ok(SkillResult::failure(
                FailureCode::DependsOnItem,
                format!("out of {} after {} placements", block.block, placed),
                false,
            ));
        }
        let spot = Position::new(
            anchor.x + block.dx as f64,
            anchor.y + block.dy as f64,
            anchor.z + block.dz as f64,
        );
        if let Err(e) = ctx.adapter.place_block(&block.block, spot).await {
            return Ok(SkillResult::failure(
                FailureCode::PlacementFailed,
                e.to_string(),
                true,
            ));
        }
        placed += 1;
    }
    Ok(SkillResult::success_with(
        format!("built {} ({} blocks)", name, placed),
        metric("placed", placed),
    ))
}

async fn combat_engage(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let max_targets = subgoal.int_param("max_targets").unwrap_or(2).max(1);
    let max_distance = subgoal.int_param("max_distance").unwrap_or(18).max(1) as f64;

    let mut downed = 0i64;
    for _ in 0..max_targets {
        if ctx.adapter.health().await? <= 0.0 {
            return Ok(SkillResult::failure(
                FailureCode::BotDied,
                "went down mid-fight",
                false,
            ));
        }
        match ctx.adapter.attack_nearest(None, max_distance).await {
            Ok(true) => downed += 1,
            Ok(false) => break,
            Err(e) => {
                return Ok(SkillResult::failure(
                    FailureCode::CombatLostTarget,
                    e.to_string(),
                    true,
                ));
            }
        }
    }
    if downed == 0 {
        return Ok(SkillResult::failure(
            FailureCode::CombatLostTarget,
            "no hostile target in range",
            true,
        ));
    }
    Ok(SkillResult::success_with(
        format!("downed {} hostiles", downed),
        metric("downed", downed),
    ))
}

async fn combat_guard(ctx: &SkillContext, subgoal: &Subgoal) -> Result<SkillResult> {
    let radius = subgoal.int_param("radius").unwrap_or(12).max(1) as f64;
    let duration = subgoal.int_param("duration").unwrap_or(6_000).max(0) as u64;

    let sweeps = (duration / GUARD_SWEEP_MS).max(1);
    let mut downed = 0i64;
    for _ in 0..sweeps {
        if ctx.adapter.health().await? <= 0.0 {
            return Ok(SkillResult::failure(
                FailureCode::BotDied,
                "went down on guard duty",
                false,
            ));
        }
        if ctx.adapter.attack_nearest(None, radius).await? {
            downed += 1;
        }
        tokio::time::sleep(Duration::from_millis(GUARD_SWEEP_MS)).await;
    }
    Ok(SkillResult::success_with(
        format!("guard window over, downed {}", downed),
        metric("downed", downed),
    ))
}

async fn inventory_count(ctx: &SkillContext, item: &str) -> Result<i64> {
    Ok(ctx
        .adapter
        .inventory()
        .await?
        .into_iter()
        .filter(|s| s.name == item)
        .map(|s| s.count)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AgentAdapter, Blueprint, BlueprintBlock, SimAdapter, StaticBlueprints};
    use crate::catalog::{GameCatalog, StaticCatalog};
    use std::sync::Arc;

    async fn context() -> (Arc<SimAdapter>, SkillContext) {
        let catalog: Arc<dyn GameCatalog> = Arc::new(StaticCatalog::basic_overworld());
        let adapter = Arc::new(SimAdapter::new("bot-0", catalog.clone()));
        adapter.connect().await.unwrap();
        let blueprints = StaticBlueprints::new().with(Blueprint {
            name: "shelter".into(),
            blocks: vec![
                BlueprintBlock {
                    dx: 0,
                    dy: 0,
                    dz: 0,
                    block: "dirt".into(),
                },
                BlueprintBlock {
                    dx: 0,
                    dy: 1,
                    dz: 0,
                    block: "dirt".into(),
                },
            ],
        });
        let ctx = SkillContext {
            agent_id: "bot-0".to_string(),
            adapter: adapter.clone(),
            catalog,
            blueprints: Arc::new(blueprints),
            base: Position::new(0.0, 64.0, 0.0),
            base_radius: 16.0,
        };
        (adapter, ctx)
    }

    fn sub(name: SubgoalName, params: serde_json::Value) -> Subgoal {
        let mut s = Subgoal::new(name);
        if let Value::Object(map) = params {
            s.params = map;
        }
        s
    }

    #[tokio::test]
    async fn test_collect_gathers_count() {
        let (adapter, ctx) = context().await;
        for i in 0..3 {
            adapter
                .stage_block("oak_log", Position::new(3.0 + i as f64, 64.0, 0.0))
                .await;
        }
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Collect,
                serde_json::json!({"block": "oak_log", "count": 3}),
            ),
        )
        .await
        .unwrap();
        assert!(result.is_success());
        assert_eq!(adapter.inventory_count("oak_log").await, 3);
    }

    #[tokio::test]
    async fn test_collect_runs_dry() {
        let (adapter, ctx) = context().await;
        adapter
            .stage_block("oak_log", Position::new(3.0, 64.0, 0.0))
            .await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Collect,
                serde_json::json!({"block": "oak_log", "count": 5}),
            ),
        )
        .await
        .unwrap();
        match result {
            SkillResult::Failure {
                code, retryable, ..
            } => {
                assert_eq!(code, FailureCode::ResourceNotFound);
                assert!(retryable);
            }
            other => panic!("expected resource failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_collect_without_tool() {
        let (adapter, ctx) = context().await;
        adapter
            .stage_block("stone", Position::new(2.0, 64.0, 0.0))
            .await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Collect,
                serde_json::json!({"block": "stone", "count": 1}),
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.failure_code(), Some(FailureCode::NoToolAvailable));
    }

    #[tokio::test]
    async fn test_craft_places_carried_workbench() {
        let (adapter, ctx) = context().await;
        adapter.stage_item("crafting_table", 1).await;
        adapter.stage_item("oak_planks", 3).await;
        adapter.stage_item("stick", 2).await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Craft,
                serde_json::json!({"item": "wooden_pickaxe", "count": 1}),
            ),
        )
        .await
        .unwrap();
        assert!(result.is_success(), "craft failed: {:?}", result);
        assert_eq!(adapter.inventory_count("wooden_pickaxe").await, 1);
    }

    #[tokio::test]
    async fn test_craft_missing_ingredients() {
        let (_adapter, ctx) = context().await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Craft,
                serde_json::json!({"item": "oak_planks", "count": 4}),
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.failure_code(), Some(FailureCode::DependsOnItem));
    }

    #[tokio::test]
    async fn test_deposit_keeps_tools_and_food() {
        let (adapter, ctx) = context().await;
        adapter
            .stage_block("chest", Position::new(1.0, 64.0, 0.0))
            .await;
        adapter.stage_item("cobblestone", 20).await;
        adapter.stage_item("wooden_pickaxe", 1).await;
        adapter.stage_item("bread", 3).await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Deposit,
                serde_json::json!({"strategy": "all_non_essential"}),
            ),
        )
        .await
        .unwrap();
        assert!(result.is_success());
        assert_eq!(adapter.inventory_count("cobblestone").await, 0);
        assert_eq!(adapter.inventory_count("wooden_pickaxe").await, 1);
        assert_eq!(adapter.inventory_count("bread").await, 3);
    }

    #[tokio::test]
    async fn test_withdraw_partial_stock() {
        let (adapter, ctx) = context().await;
        let chest = Position::new(1.0, 64.0, 0.0);
        adapter.stage_block("chest", chest).await;
        adapter
            .stage_container(
                chest,
                vec![ItemStack {
                    name: "iron_ingot".into(),
                    count: 2,
                }],
            )
            .await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::Withdraw,
                serde_json::json!({"item": "iron_ingot", "count": 5}),
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.failure_code(), Some(FailureCode::ResourceNotFound));
    }

    #[tokio::test]
    async fn test_build_blueprint_places_all() {
        let (adapter, ctx) = context().await;
        adapter.stage_item("dirt", 2).await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::BuildBlueprint,
                serde_json::json!({"blueprint": "shelter", "anchor": {"x": 4, "y": 64, "z": 4}}),
            ),
        )
        .await
        .unwrap();
        assert!(result.is_success(), "build failed: {:?}", result);
        assert_eq!(adapter.inventory_count("dirt").await, 0);
    }

    #[tokio::test]
    async fn test_combat_engage_no_targets() {
        let (_adapter, ctx) = context().await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::CombatEngage,
                serde_json::json!({"max_targets": 2, "max_distance": 18}),
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.failure_code(), Some(FailureCode::CombatLostTarget));
    }

    #[tokio::test]
    async fn test_combat_engage_downs_hostiles() {
        let (adapter, ctx) = context().await;
        adapter
            .stage_entity("zombie", Position::new(4.0, 64.0, 0.0), true)
            .await;
        adapter
            .stage_entity("skeleton", Position::new(6.0, 64.0, 0.0), true)
            .await;
        let result = run(
            &ctx,
            &sub(
                SubgoalName::CombatEngage,
                serde_json::json!({"max_targets": 2, "max_distance": 18}),
            ),
        )
        .await
        .unwrap();
        assert!(result.is_success());
    }
}
