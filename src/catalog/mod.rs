//! Game-data catalog seam
//!
//! Read-only lookups over items, blocks and recipes. The dependency planner
//! leans on this for everything it knows about the world's crafting graph;
//! the implementation is injected so game-version data stays out of the core.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub item: String,
    pub count: u32,
}

impl Ingredient {
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub result: String,
    pub result_count: u32,
    pub ingredients: Vec<Ingredient>,
    /// Shaped grid dimensions (rows, cols) when the recipe is shaped.
    pub shape: Option<(u32, u32)>,
}

impl Recipe {
    /// A recipe needs the 3x3 workbench when its grid exceeds the inventory
    /// 2x2, or when it is shapeless with more than four ingredient units.
    pub fn needs_crafting_table(&self) -> bool {
        if let Some((rows, cols)) = self.shape {
            return rows > 2 || cols > 2;
        }
        self.ingredient_units() > 4
    }

    pub fn ingredient_units(&self) -> u32 {
        self.ingredients.iter().map(|i| i.count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockFacts {
    pub name: String,
    /// Tool items that can harvest this block; empty means hand-minable.
    pub harvest_tools: Vec<String>,
    /// Primary dropped item.
    pub drop: Option<String>,
}

pub trait GameCatalog: Send + Sync {
    /// Resolve a block name or alias to its facts.
    fn resolve_block(&self, name: &str) -> Option<BlockFacts>;

    /// Whether the catalog knows `name` as an item.
    fn is_item(&self, name: &str) -> bool;

    /// All recipes producing `item`.
    fn recipes_for(&self, item: &str) -> Vec<Recipe>;

    /// Blocks whose primary drop is `item`, nearest-agnostic.
    fn source_blocks_for(&self, item: &str) -> Vec<String>;

    fn food_value(&self, item: &str) -> Option<u32>;

    /// Whether an item is placeable (counts toward inventory block load).
    fn is_block_item(&self, item: &str) -> bool;

    /// Block names worth surfacing in the snapshot's nearby-resource scan.
    fn resource_scan_names(&self) -> Vec<String>;

    /// Block names treated as points of interest (workbenches, storage...).
    fn poi_scan_names(&self) -> Vec<String>;

    fn harvest_tools_for(&self, block: &str) -> Vec<String> {
        self.resolve_block(block)
            .map(|b| b.harvest_tools)
            .unwrap_or_default()
    }

    fn primary_drop(&self, block: &str) -> Option<String> {
        self.resolve_block(block).and_then(|b| b.drop)
    }
}

/// In-memory catalog assembled from plain tables. Production wires a
/// game-version dataset through the same builder; tests use the compact
/// overworld subset below.
#[derive(Default)]
pub struct StaticCatalog {
    blocks: HashMap<String, BlockFacts>,
    aliases: HashMap<String, String>,
    items: HashSet<String>,
    recipes: HashMap<String, Vec<Recipe>>,
    foods: HashMap<String, u32>,
    block_items: HashSet<String>,
    poi_blocks: Vec<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(
        mut self,
        name: &str,
        harvest_tools: &[&str],
        drop: Option<&str>,
    ) -> Self {
        self.blocks.insert(
            name.to_string(),
            BlockFacts {
                name: name.to_string(),
                harvest_tools: harvest_tools.iter().map(|s| s.to_string()).collect(),
                drop: drop.map(|s| s.to_string()),
            },
        );
        if let Some(item) = drop {
            self.items.insert(item.to_string());
        }
        self.items.insert(name.to_string());
        self.block_items.insert(name.to_string());
        self
    }

    pub fn with_alias(mut self, alias: &str, block: &str) -> Self {
        self.aliases.insert(alias.to_string(), block.to_string());
        self
    }

    pub fn with_recipe(mut self, recipe: Recipe) -> Self {
        self.items.insert(recipe.result.clone());
        for ing in &recipe.ingredients {
            self.items.insert(ing.item.clone());
        }
        self.recipes
            .entry(recipe.result.clone())
            .or_default()
            .push(recipe);
        self
    }

    pub fn with_food(mut self, item: &str, value: u32) -> Self {
        self.items.insert(item.to_string());
        self.foods.insert(item.to_string(), value);
        self
    }

    pub fn with_poi(mut self, block: &str) -> Self {
        self.poi_blocks.push(block.to_string());
        self
    }

    /// Compact early-game overworld dataset: enough of the wood-to-iron
    /// progression for offline runs and tests.
    pub fn basic_overworld() -> Self {
        let shaped = |result: &str, count: u32, ings: &[(&str, u32)], rows: u32, cols: u32| Recipe {
            result: result.to_string(),
            result_count: count,
            ingredients: ings
                .iter()
                .map(|(item, n)| Ingredient::new(*item, *n))
                .collect(),
            shape: Some((rows, cols)),
        };

        StaticCatalog::new()
            .with_block("oak_log", &[], Some("oak_log"))
            .with_block("birch_log", &[], Some("birch_log"))
            .with_block(
                "stone",
                &[
                    "wooden_pickaxe",
                    "stone_pickaxe",
                    "iron_pickaxe",
                    "diamond_pickaxe",
                    "netherite_pickaxe",
                    "golden_pickaxe",
                ],
                Some("cobblestone"),
            )
            .with_block(
                "coal_ore",
                &[
                    "wooden_pickaxe",
                    "stone_pickaxe",
                    "iron_pickaxe",
                    "diamond_pickaxe",
                    "netherite_pickaxe",
                    "golden_pickaxe",
                ],
                Some("coal"),
            )
            .with_block(
                "iron_ore",
                &[
                    "stone_pickaxe",
                    "iron_pickaxe",
                    "diamond_pickaxe",
                    "netherite_pickaxe",
                ],
                Some("raw_iron"),
            )
            .with_block("dirt", &[], Some("dirt"))
            .with_block("sand", &[], Some("sand"))
            .with_block("crafting_table", &[], Some("crafting_table"))
            .with_block("furnace", &[], Some("furnace"))
            .with_block("chest", &[], Some("chest"))
            .with_alias("tree", "oak_log")
            .with_alias("wood", "oak_log")
            .with_alias("log", "oak_log")
            .with_alias("cobble", "stone")
            .with_recipe(Recipe {
                result: "oak_planks".into(),
                result_count: 4,
                ingredients: vec![Ingredient::new("oak_log", 1)],
                shape: None,
            })
            .with_recipe(shaped(
                "crafting_table",
                1,
                &[("oak_planks", 4)],
                2,
                2,
            ))
            .with_recipe(shaped("stick", 4, &[("oak_planks", 2)], 2, 1))
            .with_recipe(shaped(
                "wooden_pickaxe",
                1,
                &[("oak_planks", 3), ("stick", 2)],
                3,
                3,
            ))
            .with_recipe(shaped(
                "stone_pickaxe",
                1,
                &[("cobblestone", 3), ("stick", 2)],
                3,
                3,
            ))
            .with_recipe(shaped("furnace", 1, &[("cobblestone", 8)], 3, 3))
            .with_recipe(shaped("chest", 1, &[("oak_planks", 8)], 3, 3))
            .with_food("bread", 5)
            .with_food("apple", 4)
            .with_food("cooked_beef", 8)
            .with_poi("crafting_table")
            .with_poi("furnace")
            .with_poi("chest")
    }
}

impl GameCatalog for StaticCatalog {
    fn resolve_block(&self, name: &str) -> Option<BlockFacts> {
        if let Some(facts) = self.blocks.get(name) {
            return Some(facts.clone());
        }
        self.aliases
            .get(name)
            .and_then(|canon| self.blocks.get(canon))
            .cloned()
    }

    fn is_item(&self, name: &str) -> bool {
        self.items.contains(name)
    }

    fn recipes_for(&self, item: &str) -> Vec<Recipe> {
        self.recipes.get(item).cloned().unwrap_or_default()
    }

    fn source_blocks_for(&self, item: &str) -> Vec<String> {
        let mut sources: Vec<String> = self
            .blocks
            .values()
            .filter(|b| b.drop.as_deref() == Some(item))
            .map(|b| b.name.clone())
            .collect();
        sources.sort();
        sources
    }

    fn food_value(&self, item: &str) -> Option<u32> {
        self.foods.get(item).copied()
    }

    fn is_block_item(&self, item: &str) -> bool {
        self.block_items.contains(item)
    }

    fn resource_scan_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .blocks
            .keys()
            .filter(|n| !self.poi_blocks.contains(n))
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn poi_scan_names(&self) -> Vec<String> {
        self.poi_blocks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolution() {
        let catalog = StaticCatalog::basic_overworld();
        let facts = catalog.resolve_block("tree").unwrap();
        assert_eq!(facts.name, "oak_log");
        assert!(catalog.resolve_block("bedrock").is_none());
    }

    #[test]
    fn test_table_requirement() {
        let catalog = StaticCatalog::basic_overworld();
        let pickaxe = &catalog.recipes_for("wooden_pickaxe")[0];
        assert!(pickaxe.needs_crafting_table());
        let planks = &catalog.recipes_for("oak_planks")[0];
        assert!(!planks.needs_crafting_table());
        let table = &catalog.recipes_for("crafting_table")[0];
        assert!(!table.needs_crafting_table());
    }

    #[test]
    fn test_source_blocks() {
        let catalog = StaticCatalog::basic_overworld();
        assert_eq!(catalog.source_blocks_for("cobblestone"), vec!["stone"]);
        assert_eq!(catalog.source_blocks_for("oak_log"), vec!["oak_log"]);
    }

    #[test]
    fn test_shapeless_unit_threshold() {
        let big = Recipe {
            result: "bundle".into(),
            result_count: 1,
            ingredients: vec![Ingredient::new("string", 5)],
            shape: None,
        };
        assert!(big.needs_crafting_table());
    }
}
