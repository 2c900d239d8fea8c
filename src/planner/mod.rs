//! Planner Module
//!
//! Everything between "the controller wants a plan" and "here is an
//! executable subgoal sequence": prompt construction, the model call with
//! retries, response parsing, parameter normalization, the dependency
//! rewrite, repair rounds, and the deterministic fallback.

mod fallback;
mod guard;
mod normalizer;
mod prompt;
mod schema;
mod service;

pub use fallback::fallback_plan;
pub use guard::{FeasibilityGuard, GuardOutcome, ProgressionPlan};
pub use normalizer::{normalize_plan, NormalizeOutcome};
pub use prompt::{build_planner_prompt, build_repair_prompt, describe_plan};
pub use schema::{extract_json, parse_response, validate_request, PlanRequest, PlanResponse};
pub use service::{PlanOutcome, PlanStatus, PlannerError, PlannerService};
