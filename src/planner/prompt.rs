//! Planner prompt construction
//!
//! The strings here are load-bearing: downstream parsing and the repair
//! loop assume the model was instructed exactly this way, so edit with the
//! same care as a wire format.

use super::schema::{PlanRequest, PlanResponse};
use crate::model::Subgoal;

const MAX_REPAIR_NOTES: usize = 24;

const SUBGOAL_RULES: &str = r#"Allowed subgoal names (use no others):
  explore, goto, goto_nearest, collect, craft, smelt, deposit, withdraw,
  build_blueprint, combat_engage, combat_guard

Parameter keys (canonical, use exactly these):
  collect:       { "block": string, "count": integer >= 1 }
  goto_nearest:  { "block": string, "max_distance": integer > 0 }
  craft:         { "item": string, "count": integer >= 1 }
  withdraw:      { "item": string, "count": integer >= 1 }
  smelt:         { "input": string, "count": integer >= 1, "fuel": string (optional) }
  goto:          { "x": integer, "y": integer, "z": integer, "range": integer >= 1 }
  explore:       { "radius": integer, "return_to_base": boolean, "resource_hint": string (optional) }
  deposit:       { "strategy": string } or { "items": [{name, count}] }
  build_blueprint: { "blueprint": string, "anchor": {x, y, z} }
  combat_engage: { "max_targets": integer, "max_distance": integer }
  combat_guard:  { "radius": integer, "duration": integer (ms) }

Execution semantics:
  - Subgoals run strictly in order; a failed subgoal aborts the rest.
  - collect walks to and harvests blocks; the right tool must already be owned.
  - craft requires every ingredient in inventory and a workbench for 3x3 recipes.
  - goto/goto_nearest only move; they gather nothing."#;

const REASONING_PROTOCOL: &str = r#"Before answering, reason through these four steps:
  1. Build the projected inventory from the snapshot (key_items plus tools).
  2. Validate each intended subgoal's preconditions against the projection.
  3. Prepend prerequisite subgoals for anything missing (tools, ingredients, workbench).
  4. Re-simulate the full sequence and confirm every step is executable.

Respond with a single JSON object:
  { "next_goal": string, "subgoals": [ ... ], "risk_flags": [string] (optional) }"#;

/// Initial planning prompt: rules, protocol, and the full request payload.
pub fn build_planner_prompt(request: &PlanRequest) -> String {
    let payload = serde_json::to_string_pretty(request)
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are the task planner for a survival game agent. Decide the next \
         goal and an executable subgoal sequence.\n\n{}\n\n{}\n\nRequest:\n{}",
        SUBGOAL_RULES, REASONING_PROTOCOL, payload
    )
}

/// Repair prompt: the model's previous answer, the dependency-corrected
/// version, and the adjustment notes, asking for a plan that needs no
/// correction.
pub fn build_repair_prompt(
    request: &PlanRequest,
    previous: &[Subgoal],
    guarded: &[Subgoal],
    notes: &[String],
) -> String {
    let payload = serde_json::to_string_pretty(request)
        .unwrap_or_else(|_| "{}".to_string());
    let previous_json =
        serde_json::to_string_pretty(previous).unwrap_or_else(|_| "[]".to_string());
    let guarded_json =
        serde_json::to_string_pretty(guarded).unwrap_or_else(|_| "[]".to_string());
    let shown_notes: Vec<&str> = notes
        .iter()
        .take(MAX_REPAIR_NOTES)
        .map(|n| n.as_str())
        .collect();
    format!(
        "Your previous plan was not executable as written; the dependency \
         checker had to rewrite it.\n\n{}\n\n{}\n\nYour previous subgoals:\n{}\n\n\
         Dependency-corrected subgoals:\n{}\n\nAdjustments made:\n{}\n\n\
         Produce a corrected plan that needs no adjustment.\n\nRequest:\n{}",
        SUBGOAL_RULES,
        REASONING_PROTOCOL,
        previous_json,
        guarded_json,
        shown_notes.join("\n"),
        payload
    )
}

/// Echo helper so audits can render what the model proposed.
pub fn describe_plan(response: &PlanResponse) -> String {
    let steps: Vec<String> = response
        .subgoals
        .iter()
        .map(|s| s.name.to_string())
        .collect();
    format!("{} [{}]", response.next_goal, steps.join(" -> "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Snapshot, SubgoalName};
    use serde_json::json;

    fn request() -> PlanRequest {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "agent_id": "bot-0",
            "time": {"tick": 100, "phase": "day"},
            "player": {
                "position": {"x": 0.0, "y": 64.0, "z": 0.0},
                "dimension": "overworld",
                "health": 20.0,
                "hunger": 20.0,
                "effects": []
            },
            "inventory_summary": {"food_total": 0, "tools": {}, "blocks": 0, "key_items": {}},
            "nearby_summary": {"hostiles": [], "resources": [], "points_of_interest": []},
            "task_context": {
                "current_goal": null,
                "current_subgoal": null,
                "progress_counters": {},
                "last_error": null
            }
        }))
        .unwrap();
        PlanRequest {
            bot_id: "bot-0".into(),
            snapshot,
            history: Vec::new(),
            available_subgoals: vec!["collect".into()],
        }
    }

    #[test]
    fn test_prompt_carries_rules_and_payload() {
        let prompt = build_planner_prompt(&request());
        assert!(prompt.contains("Allowed subgoal names"));
        assert!(prompt.contains("four steps"));
        assert!(prompt.contains("\"bot_id\": \"bot-0\""));
    }

    #[test]
    fn test_repair_prompt_caps_notes() {
        let previous = vec![Subgoal::new(SubgoalName::Collect)];
        let guarded = vec![Subgoal::new(SubgoalName::Explore)];
        let notes: Vec<String> = (0..40).map(|i| format!("note_{}", i)).collect();
        let prompt = build_repair_prompt(&request(), &previous, &guarded, &notes);
        assert!(prompt.contains("note_23"));
        assert!(!prompt.contains("note_24"));
        assert!(prompt.contains("Dependency-corrected subgoals"));
    }
}
