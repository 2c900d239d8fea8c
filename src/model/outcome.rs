//! Skill outcomes and the failure taxonomy

use serde::{Deserialize, Serialize};

use super::Params;

/// The closed set of structured failure reasons a skill can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    ResourceNotFound,
    PathfindFailed,
    NoToolAvailable,
    InventoryFull,
    InterruptedByHostiles,
    PlacementFailed,
    StuckTimeout,
    DependsOnItem,
    CombatLostTarget,
    BotDied,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            FailureCode::PathfindFailed => "PATHFIND_FAILED",
            FailureCode::NoToolAvailable => "NO_TOOL_AVAILABLE",
            FailureCode::InventoryFull => "INVENTORY_FULL",
            FailureCode::InterruptedByHostiles => "INTERRUPTED_BY_HOSTILES",
            FailureCode::PlacementFailed => "PLACEMENT_FAILED",
            FailureCode::StuckTimeout => "STUCK_TIMEOUT",
            FailureCode::DependsOnItem => "DEPENDS_ON_ITEM",
            FailureCode::CombatLostTarget => "COMBAT_LOST_TARGET",
            FailureCode::BotDied => "BOT_DIED",
        }
    }

    /// Whether the controller-level retry machinery may requeue this code
    /// at all. Handler-supplied retryability is ANDed with this.
    pub fn can_retry(&self) -> bool {
        match self {
            FailureCode::ResourceNotFound
            | FailureCode::PathfindFailed
            | FailureCode::InterruptedByHostiles
            | FailureCode::StuckTimeout
            | FailureCode::InventoryFull
            | FailureCode::CombatLostTarget
            | FailureCode::PlacementFailed => true,
            FailureCode::DependsOnItem | FailureCode::NoToolAvailable | FailureCode::BotDied => {
                false
            }
        }
    }

    /// Extra retry headroom on top of the configured base limit for codes
    /// that are usually transient.
    pub fn extra_retries(&self) -> u32 {
        match self {
            FailureCode::PathfindFailed | FailureCode::ResourceNotFound => 4,
            FailureCode::InterruptedByHostiles | FailureCode::CombatLostTarget => 3,
            FailureCode::StuckTimeout | FailureCode::PlacementFailed => 2,
            _ => 0,
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one subgoal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SkillResult {
    Success {
        details: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<Params>,
    },
    Failure {
        code: FailureCode,
        details: String,
        retryable: bool,
    },
}

impl SkillResult {
    pub fn success(details: impl Into<String>) -> Self {
        SkillResult::Success {
            details: details.into(),
            metrics: None,
        }
    }

    pub fn success_with(details: impl Into<String>, metrics: Params) -> Self {
        SkillResult::Success {
            details: details.into(),
            metrics: Some(metrics),
        }
    }

    pub fn failure(code: FailureCode, details: impl Into<String>, retryable: bool) -> Self {
        SkillResult::Failure {
            code,
            details: details.into(),
            retryable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SkillResult::Success { .. })
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            SkillResult::Failure { code, .. } => Some(*code),
            SkillResult::Success { .. } => None,
        }
    }
}
