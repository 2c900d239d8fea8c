//! Planner wire schema and validation
//!
//! The request and response shapes exchanged with the model. Parsing is
//! deliberately forgiving about where the JSON sits in the raw completion
//! (fences, prose) and strict about what it contains: unknown subgoal names
//! are rejected outright.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{HistoryEntry, Params, Snapshot, Subgoal, SUBGOAL_NAMES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub bot_id: String,
    pub snapshot: Snapshot,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub available_subgoals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    pub next_goal: String,
    pub subgoals: Vec<Subgoal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Params>,
}

/// Request-side schema check. Failures here are caller bugs and are fatal,
/// never retried.
pub fn validate_request(request: &PlanRequest) -> Result<()> {
    if request.bot_id.trim().is_empty() {
        bail!("schema: bot_id must be non-empty");
    }
    if request.available_subgoals.is_empty() {
        bail!("schema: available_subgoals must be non-empty");
    }
    for name in &request.available_subgoals {
        if !SUBGOAL_NAMES.contains(&name.as_str()) {
            bail!("schema: unknown subgoal name '{}' offered", name);
        }
    }
    if !request.snapshot.player.health.is_finite() {
        bail!("schema: snapshot health is not finite");
    }
    let nearby = &request.snapshot.nearby_summary;
    if nearby.hostiles.iter().any(|h| h.distance < 0.0)
        || nearby.resources.iter().any(|r| r.distance < 0.0)
    {
        bail!("schema: snapshot distances must be non-negative");
    }
    Ok(())
}

/// Pull the first JSON object out of a raw completion: fenced block if
/// present, otherwise brace matching from the first `{`.
pub fn extract_json(raw: &str) -> Result<String> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```")
        .context("building fence regex")?;
    if let Some(captures) = fence.captures(raw) {
        if let Some(inner) = captures.get(1) {
            let candidate = inner.as_str().trim();
            if candidate.starts_with('{') {
                return Ok(candidate.to_string());
            }
        }
    }

    let start = raw
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in completion"))?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(raw[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    bail!("unbalanced JSON object in completion")
}

/// Parse and schema-validate a model completion into a plan response.
pub fn parse_response(raw: &str) -> Result<PlanResponse> {
    let json = extract_json(raw)?;
    let response: PlanResponse =
        serde_json::from_str(&json).context("completion does not match the plan schema")?;
    if response.next_goal.trim().is_empty() {
        bail!("schema: next_goal must be non-empty");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_fenced() {
        let raw = "Here is the plan:\n```json\n{\"next_goal\": \"x\", \"subgoals\": []}\n```\nDone.";
        let json = extract_json(raw).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
    }

    #[test]
    fn test_extract_brace_matched() {
        let raw = "thinking... {\"next_goal\": \"g\", \"subgoals\": [{\"name\": \"explore\", \"params\": {\"radius\": 20}}]} trailing";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.next_goal, "g");
        assert_eq!(parsed.subgoals.len(), 1);
    }

    #[test]
    fn test_nested_braces_in_strings() {
        let raw = r#"{"next_goal": "say {hi}", "subgoals": []}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.next_goal, "say {hi}");
    }

    #[test]
    fn test_unknown_subgoal_rejected() {
        let raw = r#"{"next_goal": "g", "subgoals": [{"name": "teleport", "params": {}}]}"#;
        assert!(parse_response(raw).is_err());
    }

    #[test]
    fn test_request_validation() {
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

        let good = PlanRequest {
            bot_id: "bot-0".into(),
            snapshot: snapshot.clone(),
            history: Vec::new(),
            available_subgoals: vec!["collect".into(), "explore".into()],
        };
        assert!(validate_request(&good).is_ok());

        let mut bad = good.clone();
        bad.available_subgoals.push("teleport".into());
        assert!(validate_request(&bad).is_err());

        let mut empty = good;
        empty.bot_id = "  ".into();
        assert!(validate_request(&empty).is_err());
    }
}
