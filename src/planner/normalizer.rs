//! Subgoal Normalizer
//!
//! LLM output is loose about parameter keys. This pass rewrites every alias
//! to the canonical shape, fills defaults, and drops entries whose mandatory
//! fields cannot be recovered, reporting each change as a note.
//! Running it twice is a fixed point.

use serde_json::Value;

use crate::model::{Params, Subgoal, SubgoalName};

/// Accepted spellings of the target parameter, canonical first.
const TARGET_ALIASES: [&str; 5] = ["block", "item", "resource", "resource_type", "type"];
/// Accepted spellings of the count parameter, canonical first.
const COUNT_ALIASES: [&str; 3] = ["count", "amount", "qty"];

const DEFAULT_MAX_DISTANCE: i64 = 48;
const DEFAULT_GOTO_RANGE: i64 = 2;

#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub subgoals: Vec<Subgoal>,
    pub notes: Vec<String>,
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Move the first populated alias into `canonical`, clearing the rest.
/// Returns the extracted value and whether the params changed.
fn fold_aliases(params: &mut Params, canonical: &str, aliases: &[&str]) -> (Option<Value>, bool) {
    let mut value = params.get(canonical).cloned();
    let mut changed = false;
    for alias in aliases {
        if *alias == canonical {
            continue;
        }
        if let Some(candidate) = params.remove(*alias) {
            changed = true;
            if value.is_none() {
                value = Some(candidate);
            }
        }
    }
    if let Some(v) = &value {
        if params.get(canonical) != Some(v) {
            params.insert(canonical.to_string(), v.clone());
            changed = true;
        }
    }
    (value, changed)
}

enum FieldOutcome {
    Ok(bool),
    Invalid(&'static str),
}

fn normalize_target(params: &mut Params, canonical: &str) -> FieldOutcome {
    let (value, mut changed) = fold_aliases(params, canonical, &TARGET_ALIASES);
    match value.as_ref().and_then(coerce_string) {
        Some(name) => {
            if value.as_ref().and_then(|v| v.as_str()) != Some(name.as_str()) {
                params.insert(canonical.to_string(), Value::String(name));
                changed = true;
            }
            FieldOutcome::Ok(changed)
        }
        None => FieldOutcome::Invalid("target"),
    }
}

fn normalize_count(params: &mut Params, required_min: i64) -> FieldOutcome {
    let (value, mut changed) = fold_aliases(params, "count", &COUNT_ALIASES);
    match value.as_ref().and_then(coerce_int) {
        Some(n) if n >= required_min => {
            if value.as_ref().and_then(|v| v.as_i64()) != Some(n) {
                params.insert("count".to_string(), Value::from(n));
                changed = true;
            }
            FieldOutcome::Ok(changed)
        }
        _ => FieldOutcome::Invalid("count"),
    }
}

/// Fill or repair a defaulted integer parameter. Never drops the entry.
fn normalize_defaulted_int(params: &mut Params, key: &str, min: i64, default: i64) -> bool {
    match params.get(key).map(|v| coerce_int(v)) {
        None => {
            params.insert(key.to_string(), Value::from(default));
            true
        }
        Some(Some(n)) if n >= min => {
            if params.get(key).and_then(|v| v.as_i64()) != Some(n) {
                params.insert(key.to_string(), Value::from(n));
                return true;
            }
            false
        }
        Some(_) => {
            params.insert(key.to_string(), Value::from(default));
            true
        }
    }
}

/// Round goto coordinates to integers, accepting a nested `location`.
fn normalize_goto(params: &mut Params) -> Result<bool, &'static str> {
    let mut changed = false;
    if let Some(Value::Object(location)) = params.remove("location") {
        for axis in ["x", "y", "z"] {
            if !params.contains_key(axis) {
                if let Some(v) = location.get(axis) {
                    params.insert(axis.to_string(), v.clone());
                }
            }
        }
        changed = true;
    }
    for axis in ["x", "y", "z"] {
        let value = params.get(axis).cloned().ok_or("coordinates")?;
        let n = coerce_int(&value).ok_or("coordinates")?;
        if value.as_i64() != Some(n) {
            params.insert(axis.to_string(), Value::from(n));
            changed = true;
        }
    }
    if normalize_defaulted_int(params, "range", 1, DEFAULT_GOTO_RANGE) {
        changed = true;
    }
    Ok(changed)
}

/// Canonicalize a full plan. Unrecognized parameter shapes on names without
/// rules pass through untouched.
pub fn normalize_plan(subgoals: Vec<Subgoal>) -> NormalizeOutcome {
    let mut kept = Vec::with_capacity(subgoals.len());
    let mut notes = Vec::new();

    for (index, mut sub) in subgoals.into_iter().enumerate() {
        let name = sub.name;
        let verdict: Result<bool, &'static str> = match name {
            SubgoalName::Collect => {
                let target = normalize_target(&mut sub.params, "block");
                let count = normalize_count(&mut sub.params, 1);
                match (target, count) {
                    (FieldOutcome::Ok(a), FieldOutcome::Ok(b)) => Ok(a || b),
                    (FieldOutcome::Invalid(f), _) | (_, FieldOutcome::Invalid(f)) => Err(f),
                }
            }
            SubgoalName::GotoNearest => match normalize_target(&mut sub.params, "block") {
                FieldOutcome::Ok(changed) => Ok(normalize_defaulted_int(
                    &mut sub.params,
                    "max_distance",
                    1,
                    DEFAULT_MAX_DISTANCE,
                ) || changed),
                FieldOutcome::Invalid(f) => Err(f),
            },
            SubgoalName::Craft | SubgoalName::Withdraw => {
                let target = normalize_target(&mut sub.params, "item");
                let count = normalize_count(&mut sub.params, 1);
                match (target, count) {
                    (FieldOutcome::Ok(a), FieldOutcome::Ok(b)) => Ok(a || b),
                    (FieldOutcome::Invalid(f), _) | (_, FieldOutcome::Invalid(f)) => Err(f),
                }
            }
            SubgoalName::Smelt => {
                let target = normalize_target(&mut sub.params, "input");
                let count = normalize_count(&mut sub.params, 1);
                match (target, count) {
                    (FieldOutcome::Ok(a), FieldOutcome::Ok(b)) => Ok(a || b),
                    (FieldOutcome::Invalid(f), _) | (_, FieldOutcome::Invalid(f)) => Err(f),
                }
            }
            SubgoalName::Goto => normalize_goto(&mut sub.params),
            _ => Ok(false),
        };

        match verdict {
            Ok(changed) => {
                if changed {
                    notes.push(format!("normalized_subgoal_{}_{}", index, name));
                }
                kept.push(sub);
            }
            Err(field) => {
                notes.push(format!("dropped_subgoal_{}_{}_invalid_{}", index, name, field));
            }
        }
    }

    NormalizeOutcome {
        subgoals: kept,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sub(name: SubgoalName, params: Value) -> Subgoal {
        let mut s = Subgoal::new(name);
        if let Value::Object(map) = params {
            s.params = map;
        }
        s
    }

    #[test]
    fn test_collect_alias_rewrite() {
        let plan = vec![sub(
            SubgoalName::Collect,
            json!({"type": "stone", "amount": 10}),
        )];
        let out = normalize_plan(plan);
        assert_eq!(out.subgoals.len(), 1);
        let params = &out.subgoals[0].params;
        assert_eq!(params.get("block"), Some(&json!("stone")));
        assert_eq!(params.get("count"), Some(&json!(10)));
        assert!(params.get("type").is_none());
        assert!(params.get("amount").is_none());
        assert_eq!(out.notes, vec!["normalized_subgoal_0_collect"]);
    }

    #[test]
    fn test_idempotent() {
        let plan = vec![
            sub(SubgoalName::Collect, json!({"resource": "oak_log", "qty": "3"})),
            sub(SubgoalName::Goto, json!({"location": {"x": 1.6, "y": 64, "z": -2.2}})),
            sub(SubgoalName::Deposit, json!({"strategy": "all_non_essential"})),
        ];
        let once = normalize_plan(plan);
        let twice = normalize_plan(once.subgoals.clone());
        assert_eq!(once.subgoals, twice.subgoals);
        assert!(twice.notes.is_empty(), "second pass rewrote: {:?}", twice.notes);
    }

    #[test]
    fn test_goto_nested_location_rounds() {
        let plan = vec![sub(
            SubgoalName::Goto,
            json!({"location": {"x": 10.4, "y": 63.7, "z": -4.5}}),
        )];
        let out = normalize_plan(plan);
        let params = &out.subgoals[0].params;
        assert_eq!(params.get("x"), Some(&json!(10)));
        assert_eq!(params.get("y"), Some(&json!(64)));
        assert_eq!(params.get("z"), Some(&json!(-4)));
        assert_eq!(params.get("range"), Some(&json!(2)));
    }

    #[test]
    fn test_invalid_mandatory_field_drops() {
        let plan = vec![
            sub(SubgoalName::Collect, json!({"block": "stone"})),
            sub(SubgoalName::Craft, json!({"item": "stick", "count": 0})),
            sub(SubgoalName::Collect, json!({"block": "stone", "count": 2})),
        ];
        let out = normalize_plan(plan);
        assert_eq!(out.subgoals.len(), 1);
        assert!(out.notes.iter().any(|n| n == "dropped_subgoal_0_collect_invalid_count"));
        assert!(out.notes.iter().any(|n| n == "dropped_subgoal_1_craft_invalid_count"));
    }

    #[test]
    fn test_goto_nearest_default_distance() {
        let plan = vec![sub(SubgoalName::GotoNearest, json!({"resource": "oak_log"}))];
        let out = normalize_plan(plan);
        let params = &out.subgoals[0].params;
        assert_eq!(params.get("block"), Some(&json!("oak_log")));
        assert_eq!(params.get("max_distance"), Some(&json!(48)));
    }

    #[test]
    fn test_passthrough_names_untouched() {
        let original = sub(
            SubgoalName::CombatGuard,
            json!({"radius": 12, "duration": 6000}),
        );
        let out = normalize_plan(vec![original.clone()]);
        assert_eq!(out.subgoals[0], original);
        assert!(out.notes.is_empty());
    }

    #[test]
    fn test_smelt_keeps_optional_fuel() {
        let plan = vec![sub(
            SubgoalName::Smelt,
            json!({"item": "raw_iron", "amount": 3, "fuel": "coal"}),
        )];
        let out = normalize_plan(plan);
        let params = &out.subgoals[0].params;
        assert_eq!(params.get("input"), Some(&json!("raw_iron")));
        assert_eq!(params.get("count"), Some(&json!(3)));
        assert_eq!(params.get("fuel"), Some(&json!("coal")));
    }
}
