//! Subgoal - the unit of work a planner emits and a skill executes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Parameter map attached to a subgoal. Keys are canonicalized by the
/// normalizer before anything downstream sees them.
pub type Params = serde_json::Map<String, Value>;

/// The closed set of executable subgoal names.
pub const SUBGOAL_NAMES: [&str; 11] = [
    "explore",
    "goto",
    "goto_nearest",
    "collect",
    "craft",
    "smelt",
    "deposit",
    "withdraw",
    "build_blueprint",
    "combat_engage",
    "combat_guard",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgoalName {
    Explore,
    Goto,
    GotoNearest,
    Collect,
    Craft,
    Smelt,
    Deposit,
    Withdraw,
    BuildBlueprint,
    CombatEngage,
    CombatGuard,
}

impl SubgoalName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubgoalName::Explore => "explore",
            SubgoalName::Goto => "goto",
            SubgoalName::GotoNearest => "goto_nearest",
            SubgoalName::Collect => "collect",
            SubgoalName::Craft => "craft",
            SubgoalName::Smelt => "smelt",
            SubgoalName::Deposit => "deposit",
            SubgoalName::Withdraw => "withdraw",
            SubgoalName::BuildBlueprint => "build_blueprint",
            SubgoalName::CombatEngage => "combat_engage",
            SubgoalName::CombatGuard => "combat_guard",
        }
    }

    /// Parse a wire string. Unknown names are rejected at the planner
    /// schema boundary, so this is the single place the closed set lives.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explore" => Some(SubgoalName::Explore),
            "goto" => Some(SubgoalName::Goto),
            "goto_nearest" => Some(SubgoalName::GotoNearest),
            "collect" => Some(SubgoalName::Collect),
            "craft" => Some(SubgoalName::Craft),
            "smelt" => Some(SubgoalName::Smelt),
            "deposit" => Some(SubgoalName::Deposit),
            "withdraw" => Some(SubgoalName::Withdraw),
            "build_blueprint" => Some(SubgoalName::BuildBlueprint),
            "combat_engage" => Some(SubgoalName::CombatEngage),
            "combat_guard" => Some(SubgoalName::CombatGuard),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubgoalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single bounded task with canonical parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgoal {
    pub name: SubgoalName,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub success_criteria: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Params>,
}

impl Subgoal {
    pub fn new(name: SubgoalName) -> Self {
        Self {
            name,
            params: Params::new(),
            success_criteria: Params::new(),
            risk_flags: None,
            constraints: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_criteria(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.success_criteria.insert(key.into(), value.into());
        self
    }

    /// Integer param accessor tolerant of the JSON number zoo.
    pub fn int_param(&self, key: &str) -> Option<i64> {
        match self.params.get(key) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Canonical identity used to compare plans before and after the
    /// dependency rewrite: name + params + success criteria.
    pub fn canonical_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.name,
            Value::Object(self.params.clone()),
            Value::Object(self.success_criteria.clone())
        )
    }
}

/// A subgoal as it sits in a controller queue. Each enqueue (including a
/// retry requeue) gets a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSubgoal {
    pub id: Uuid,
    pub subgoal: Subgoal,
    pub assigned_at: i64,
    pub retry_count: u32,
    pub not_before_ms: i64,
}

impl RuntimeSubgoal {
    pub fn assign(subgoal: Subgoal, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subgoal,
            assigned_at: now_ms,
            retry_count: 0,
            not_before_ms: 0,
        }
    }

    /// A retry is a new queue entry: new id, bumped count, delayed start.
    pub fn retry(&self, now_ms: i64, delay_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subgoal: self.subgoal.clone(),
            assigned_at: now_ms,
            retry_count: self.retry_count + 1,
            not_before_ms: now_ms + delay_ms,
        }
    }

    pub fn ready(&self, now_ms: i64) -> bool {
        self.not_before_ms <= now_ms
    }
}
