//! Deterministic fallback planner
//!
//! When the model is unavailable, rate limited, or produced garbage, the
//! fleet still needs a valid plan. Survival first, inventory pressure next,
//! hostiles after that, then autonomous progression.

use crate::catalog::GameCatalog;
use crate::model::{Position, Snapshot, Subgoal, SubgoalName};

use super::guard::FeasibilityGuard;
use super::schema::PlanResponse;

const LOW_HEALTH_THRESHOLD: f64 = 8.0;
const INVENTORY_LOAD_THRESHOLD: i64 = 120;
const HOSTILE_PANIC_DISTANCE: f64 = 10.0;

fn goto_base(base: Position) -> Subgoal {
    Subgoal::new(SubgoalName::Goto)
        .with_param("x", base.x.round() as i64)
        .with_param("y", base.y.round() as i64)
        .with_param("z", base.z.round() as i64)
        .with_param("range", 2)
}

/// Build a plan from the snapshot alone. Pure: the same snapshot, reason
/// and base always produce the same plan.
pub fn fallback_plan(
    snapshot: &Snapshot,
    reason: &str,
    base: Position,
    catalog: &dyn GameCatalog,
) -> PlanResponse {
    if snapshot.player.health <= LOW_HEALTH_THRESHOLD {
        return PlanResponse {
            next_goal: format!("retreat and recover ({})", reason),
            subgoals: vec![
                goto_base(base),
                Subgoal::new(SubgoalName::CombatGuard)
                    .with_param("radius", 12)
                    .with_param("duration", 6_000),
            ],
            risk_flags: Some(vec!["LOW_HEALTH".to_string()]),
            constraints: None,
        };
    }

    if snapshot.inventory_summary.load() >= INVENTORY_LOAD_THRESHOLD {
        return PlanResponse {
            next_goal: format!("unload inventory at base ({})", reason),
            subgoals: vec![
                goto_base(base),
                Subgoal::new(SubgoalName::Deposit)
                    .with_param("strategy", "all_non_essential"),
            ],
            risk_flags: Some(vec!["INVENTORY_PRESSURE".to_string()]),
            constraints: None,
        };
    }

    if snapshot
        .nearby_summary
        .nearest_hostile_distance()
        .map_or(false, |d| d < HOSTILE_PANIC_DISTANCE)
    {
        return PlanResponse {
            next_goal: format!("clear nearby hostiles ({})", reason),
            subgoals: vec![Subgoal::new(SubgoalName::CombatEngage)
                .with_param("max_targets", 2)
                .with_param("max_distance", 18)],
            risk_flags: Some(vec!["HOSTILES_NEARBY".to_string()]),
            constraints: None,
        };
    }

    let progression = FeasibilityGuard::new(catalog).progression(snapshot);
    PlanResponse {
        next_goal: format!("{} ({})", progression.reason, reason),
        subgoals: progression.subgoals,
        risk_flags: None,
        constraints: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::model::{
        DayPhase, InventorySummary, NearbyHostile, NearbySummary, PlayerState, Snapshot,
        TaskContext, TimeInfo,
    };

    fn snapshot() -> Snapshot {
        Snapshot {
            agent_id: "bot-0".to_string(),
            time: TimeInfo {
                tick: 2_000,
                phase: DayPhase::Day,
            },
            player: PlayerState {
                position: Position::new(10.0, 64.0, 10.0),
                dimension: "overworld".to_string(),
                health: 20.0,
                hunger: 20.0,
                effects: Vec::new(),
            },
            inventory_summary: InventorySummary::default(),
            nearby_summary: NearbySummary::default(),
            task_context: TaskContext::default(),
        }
    }

    fn base() -> Position {
        Position::new(0.0, 64.0, 0.0)
    }

    #[test]
    fn test_low_health_retreats() {
        let catalog = StaticCatalog::basic_overworld();
        let mut snap = snapshot();
        snap.player.health = 6.0;
        let plan = fallback_plan(&snap, "PLANNER_ERROR:test", base(), &catalog);
        assert_eq!(plan.subgoals[0].name, SubgoalName::Goto);
        assert_eq!(plan.subgoals[1].name, SubgoalName::CombatGuard);
        assert_eq!(plan.subgoals[1].int_param("duration"), Some(6_000));
        assert_eq!(plan.risk_flags.as_deref(), Some(&["LOW_HEALTH".to_string()][..]));
    }

    #[test]
    fn test_inventory_pressure_deposits() {
        let catalog = StaticCatalog::basic_overworld();
        let mut snap = snapshot();
        snap.inventory_summary.blocks = 100;
        snap.inventory_summary
            .key_items
            .insert("cobblestone".into(), 30);
        let plan = fallback_plan(&snap, "RATE_LIMIT_BOT_CAP", base(), &catalog);
        assert_eq!(plan.subgoals[1].name, SubgoalName::Deposit);
        assert_eq!(
            plan.subgoals[1].str_param("strategy"),
            Some("all_non_essential")
        );
        assert_eq!(
            plan.risk_flags.as_deref(),
            Some(&["INVENTORY_PRESSURE".to_string()][..])
        );
    }

    #[test]
    fn test_close_hostile_engages() {
        let catalog = StaticCatalog::basic_overworld();
        let mut snap = snapshot();
        snap.nearby_summary.hostiles.push(NearbyHostile {
            kind: "zombie".into(),
            distance: 6.0,
        });
        let plan = fallback_plan(&snap, "PLANNER_ERROR:x", base(), &catalog);
        assert_eq!(plan.subgoals[0].name, SubgoalName::CombatEngage);
        assert_eq!(plan.subgoals[0].int_param("max_targets"), Some(2));
        assert_eq!(plan.subgoals[0].int_param("max_distance"), Some(18));
    }

    #[test]
    fn test_quiet_world_progresses() {
        let catalog = StaticCatalog::basic_overworld();
        let snap = snapshot();
        let plan = fallback_plan(&snap, "IDLE", base(), &catalog);
        assert!(plan.next_goal.starts_with("explore_for_resources"));
        assert_eq!(plan.subgoals[0].name, SubgoalName::Explore);
    }

    #[test]
    fn test_health_takes_priority_over_hostiles() {
        let catalog = StaticCatalog::basic_overworld();
        let mut snap = snapshot();
        snap.player.health = 4.0;
        snap.nearby_summary.hostiles.push(NearbyHostile {
            kind: "skeleton".into(),
            distance: 5.0,
        });
        let plan = fallback_plan(&snap, "ATTACKED", base(), &catalog);
        assert_eq!(plan.subgoals[0].name, SubgoalName::Goto);
    }
}
