//! Planner Service
//!
//! One entry point, `plan`, that turns a request into an executable plan
//! no matter what the model does: rate-limit denials and model failures
//! degrade to the deterministic fallback, and plans the dependency checker
//! had to rewrite can be sent back for one or more repair rounds.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::catalog::GameCatalog;
use crate::config::PlannerOptions;
use crate::emit_event;
use crate::events::FleetEvent;
use crate::llm::LlmClient;
use crate::metrics::FleetMetrics;
use crate::model::{now_ms, Position, Subgoal};
use crate::coord::{RateDecision, RateLimiter};
use crate::store::{LlmCallRecord, Store};

use super::fallback::fallback_plan;
use super::guard::FeasibilityGuard;
use super::normalizer::normalize_plan;
use super::prompt::{build_planner_prompt, build_repair_prompt};
use super::schema::{parse_response, validate_request, PlanRequest, PlanResponse};

const RETRY_BACKOFF_UNIT_MS: u64 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Success,
    RateLimited,
    Fallback,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Success => "SUCCESS",
            PlanStatus::RateLimited => "RATE_LIMITED",
            PlanStatus::Fallback => "FALLBACK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub status: PlanStatus,
    pub response: PlanResponse,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub notes: Vec<String>,
}

/// Fatal planner-boundary errors. Everything else degrades to fallback.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("SCHEMA: {0}")]
    Schema(String),
}

pub struct PlannerService {
    llm: Arc<dyn LlmClient>,
    rate_limiter: Arc<RateLimiter>,
    catalog: Arc<dyn GameCatalog>,
    cfg: PlannerOptions,
    base: Position,
    store: Option<Arc<dyn Store>>,
    metrics: Option<Arc<FleetMetrics>>,
}

impl PlannerService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        rate_limiter: Arc<RateLimiter>,
        catalog: Arc<dyn GameCatalog>,
        cfg: PlannerOptions,
        base: Position,
    ) -> Self {
        Self {
            llm,
            rate_limiter,
            catalog,
            cfg,
            base,
            store: None,
            metrics: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<FleetMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Produce a plan for the request. Only a malformed request is an error;
    /// every operational failure returns a usable fallback outcome.
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanOutcome, PlannerError> {
        validate_request(request).map_err(|e| PlannerError::Schema(e.to_string()))?;

        let decision = self.rate_limiter.consume(&request.bot_id).await;
        if !decision.allowed {
            return Ok(self.rate_limited_outcome(request, decision).await);
        }

        let started = now_ms();
        let outcome = match self.plan_with_model(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(bot = %request.bot_id, error = %e, "planner degraded to fallback");
                let reason = format!("PLANNER_ERROR:{}", e);
                let response =
                    fallback_plan(&request.snapshot, &reason, self.base, self.catalog.as_ref());
                PlanOutcome {
                    status: PlanStatus::Fallback,
                    response,
                    tokens_in: 0,
                    tokens_out: 0,
                    notes: vec![reason],
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_planner_outcome(
                outcome.status.as_str(),
                outcome.tokens_in as u64,
                outcome.tokens_out as u64,
            );
        }
        emit_event!(FleetEvent::PlanResolved {
            bot_id: request.bot_id.clone(),
            status: outcome.status.as_str().to_string(),
            subgoal_count: outcome.response.subgoals.len(),
        });
        debug!(
            bot = %request.bot_id,
            status = outcome.status.as_str(),
            subgoals = outcome.response.subgoals.len(),
            elapsed_ms = now_ms() - started,
            "plan resolved"
        );
        Ok(outcome)
    }

    async fn rate_limited_outcome(
        &self,
        request: &PlanRequest,
        decision: RateDecision,
    ) -> PlanOutcome {
        let reason = decision
            .reason
            .map(|r| format!("RATE_LIMIT_{}", r.as_str()))
            .unwrap_or_else(|| "RATE_LIMIT".to_string());
        info!(bot = %request.bot_id, reason, "planner rate limited");
        let response =
            fallback_plan(&request.snapshot, &reason, self.base, self.catalog.as_ref());
        let outcome = PlanOutcome {
            status: PlanStatus::RateLimited,
            response,
            tokens_in: 0,
            tokens_out: 0,
            notes: vec![reason],
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_planner_outcome(outcome.status.as_str(), 0, 0);
        }
        outcome
    }

    async fn plan_with_model(&self, request: &PlanRequest) -> anyhow::Result<PlanOutcome> {
        let mut notes: Vec<String> = Vec::new();
        let mut tokens_in = 0u32;
        let mut tokens_out = 0u32;

        let prompt = build_planner_prompt(request);
        let raw = self
            .generate_with_retries(request, &prompt, &mut tokens_in, &mut tokens_out)
            .await?;

        let response = parse_response(&raw)?;
        let normalized = normalize_plan(response.subgoals.clone());
        notes.extend(normalized.notes.clone());
        if normalized.subgoals.is_empty() {
            anyhow::bail!("no valid subgoals after normalization");
        }

        let guard = FeasibilityGuard::new(self.catalog.as_ref());
        let mut model_subgoals = normalized.subgoals;
        let mut guarded = guard.apply(&request.snapshot, &model_subgoals);
        notes.extend(guarded.notes.clone());

        if plan_key(&model_subgoals) != plan_key(&guarded.subgoals)
            && self.cfg.planner_feasibility_reprompt_enabled
        {
            for attempt in 0..self.cfg.planner_feasibility_reprompt_max_attempts {
                let decision = self.rate_limiter.consume(&request.bot_id).await;
                if !decision.allowed {
                    notes.push("feasibility_reprompt_skipped_rate_limited".to_string());
                    break;
                }
                let repair = build_repair_prompt(
                    request,
                    &model_subgoals,
                    &guarded.subgoals,
                    &guarded.notes,
                );
                let raw = match self
                    .generate_with_retries(request, &repair, &mut tokens_in, &mut tokens_out)
                    .await
                {
                    Ok(raw) => raw,
                    Err(e) => {
                        notes.push(format!("feasibility_reprompt_failed_{}", attempt));
                        debug!(error = %e, "repair round failed, keeping guarded plan");
                        break;
                    }
                };
                let Ok(repaired) = parse_response(&raw) else {
                    notes.push(format!("feasibility_reprompt_unparseable_{}", attempt));
                    break;
                };
                let renormalized = normalize_plan(repaired.subgoals);
                if renormalized.subgoals.is_empty() {
                    notes.push(format!("feasibility_reprompt_empty_{}", attempt));
                    break;
                }
                notes.extend(renormalized.notes);
                let reguarded = guard.apply(&request.snapshot, &renormalized.subgoals);
                let resolved =
                    plan_key(&renormalized.subgoals) == plan_key(&reguarded.subgoals);
                model_subgoals = renormalized.subgoals;
                guarded = reguarded;
                if resolved {
                    notes.push("feasibility_reprompt_resolved".to_string());
                    break;
                }
                notes.extend(guarded.notes.clone());
            }
        }

        Ok(PlanOutcome {
            status: PlanStatus::Success,
            response: PlanResponse {
                next_goal: response.next_goal,
                subgoals: guarded.subgoals,
                risk_flags: response.risk_flags,
                constraints: response.constraints,
            },
            tokens_in,
            tokens_out,
            notes,
        })
    }

    /// Call the model with bounded retries and jittered backoff, recording
    /// each attempt for audit.
    async fn generate_with_retries(
        &self,
        request: &PlanRequest,
        prompt: &str,
        tokens_in: &mut u32,
        tokens_out: &mut u32,
    ) -> anyhow::Result<String> {
        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 0..=self.cfg.planner_max_retries {
            let started = now_ms();
            let call = self.llm.generate(prompt, self.cfg.planner_timeout_ms);
            let result = timeout(Duration::from_millis(self.cfg.planner_timeout_ms), call).await;
            match result {
                Ok(Ok(completion)) => {
                    *tokens_in += completion.tokens_in.unwrap_or(0);
                    *tokens_out += completion.tokens_out.unwrap_or(0);
                    self.record_call(request, prompt, "SUCCESS", &completion_usage(&completion), started)
                        .await;
                    return Ok(completion.text);
                }
                Ok(Err(e)) => {
                    self.record_call(request, prompt, "ERROR", &(0, 0), started).await;
                    last_error = Some(e);
                }
                Err(_) => {
                    self.record_call(request, prompt, "TIMEOUT", &(0, 0), started).await;
                    last_error = Some(anyhow::anyhow!(
                        "model call timed out after {}ms",
                        self.cfg.planner_timeout_ms
                    ));
                }
            }
            if attempt < self.cfg.planner_max_retries {
                let base = RETRY_BACKOFF_UNIT_MS * (attempt as u64 + 1);
                let jittered = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(base / 2..=base + base / 2)
                };
                tokio::time::sleep(Duration::from_millis(jittered)).await;
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("model produced no completion")))
    }

    async fn record_call(
        &self,
        request: &PlanRequest,
        prompt: &str,
        status: &str,
        usage: &(u32, u32),
        started: i64,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let record = LlmCallRecord {
            bot_id: request.bot_id.clone(),
            status: status.to_string(),
            prompt_sha: LlmCallRecord::fingerprint(prompt),
            tokens_in: usage.0,
            tokens_out: usage.1,
            duration_ms: now_ms() - started,
            notes: Vec::new(),
        };
        if let Err(e) = store.record_llm_call(record).await {
            warn!(error = %e, "failed to persist llm call");
        }
    }
}

fn completion_usage(completion: &crate::llm::Completion) -> (u32, u32) {
    (
        completion.tokens_in.unwrap_or(0),
        completion.tokens_out.unwrap_or(0),
    )
}

fn plan_key(subgoals: &[Subgoal]) -> Vec<String> {
    subgoals.iter().map(|s| s.canonical_key()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::llm::ScriptedLlm;
    use crate::model::{
        DayPhase, InventorySummary, NearbyResource, NearbySummary, PlayerState, Snapshot,
        SubgoalName, TaskContext, TimeInfo,
    };

    fn snapshot() -> Snapshot {
        let mut nearby = NearbySummary::default();
        nearby.resources.push(NearbyResource {
            kind: "oak_log".into(),
            distance: 5.0,
            position: Position::new(5.0, 64.0, 0.0),
        });
        nearby.resources.push(NearbyResource {
            kind: "stone".into(),
            distance: 9.0,
            position: Position::new(9.0, 64.0, 0.0),
        });
        Snapshot {
            agent_id: "bot-0".into(),
            time: TimeInfo {
                tick: 2_000,
                phase: DayPhase::Day,
            },
            player: PlayerState {
                position: Position::new(0.0, 64.0, 0.0),
                dimension: "overworld".into(),
                health: 20.0,
                hunger: 20.0,
                effects: Vec::new(),
            },
            inventory_summary: InventorySummary::default(),
            nearby_summary: nearby,
            task_context: TaskContext::default(),
        }
    }

    fn request() -> PlanRequest {
        PlanRequest {
            bot_id: "bot-0".into(),
            snapshot: snapshot(),
            history: Vec::new(),
            available_subgoals: vec!["collect".into(), "craft".into(), "explore".into()],
        }
    }

    fn service(llm: Arc<ScriptedLlm>, cfg: PlannerOptions) -> PlannerService {
        PlannerService::new(
            llm,
            Arc::new(RateLimiter::new(10, 100)),
            Arc::new(StaticCatalog::basic_overworld()),
            cfg,
            Position::new(0.0, 64.0, 0.0),
        )
    }

    fn fast_cfg() -> PlannerOptions {
        PlannerOptions {
            planner_timeout_ms: 500,
            planner_max_retries: 0,
            ..PlannerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let llm = Arc::new(ScriptedLlm::new());
        let svc = service(llm, fast_cfg());
        let outcome = svc.plan(&request()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Fallback);
        assert!(!outcome.response.subgoals.is_empty());
        assert!(outcome.notes[0].starts_with("PLANNER_ERROR:"));
    }

    #[tokio::test]
    async fn test_rate_limit_returns_fallback_without_calling_model() {
        let llm = Arc::new(ScriptedLlm::with_responses(vec!["unused".into()]));
        let mut svc = service(llm.clone(), fast_cfg());
        svc.rate_limiter = Arc::new(RateLimiter::new(0, 100));
        let outcome = svc.plan(&request()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::RateLimited);
        assert_eq!(outcome.notes[0], "RATE_LIMIT_BOT_CAP");
        assert_eq!(llm.remaining().await, 1);
    }

    #[tokio::test]
    async fn test_schema_error_is_fatal() {
        let llm = Arc::new(ScriptedLlm::new());
        let svc = service(llm, fast_cfg());
        let mut bad = request();
        bad.bot_id = String::new();
        let err = svc.plan(&bad).await.unwrap_err();
        assert!(err.to_string().starts_with("SCHEMA:"));
    }

    #[tokio::test]
    async fn test_success_without_guard_changes() {
        let body = r#"{"next_goal": "gather wood", "subgoals": [
            {"name": "collect", "params": {"block": "oak_log", "count": 4}}
        ]}"#;
        let llm = Arc::new(ScriptedLlm::with_responses(vec![body.into()]));
        let svc = service(llm.clone(), fast_cfg());
        let outcome = svc.plan(&request()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Success);
        assert_eq!(outcome.response.next_goal, "gather wood");
        assert_eq!(outcome.response.subgoals.len(), 1);
        // no repair round was needed
        assert_eq!(llm.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_feasibility_reprompt_resolves() {
        // first answer needs a pickaxe it does not have; the repair answer
        // is already dependency-correct
        let first = r#"{"next_goal": "mine stone", "subgoals": [
            {"name": "collect", "params": {"block": "stone", "count": 8}}
        ]}"#;
        let corrected = r#"{"next_goal": "mine stone", "subgoals": [
            {"name": "collect", "params": {"block": "oak_log", "count": 3}},
            {"name": "craft", "params": {"item": "oak_planks", "count": 12}},
            {"name": "craft", "params": {"item": "crafting_table", "count": 1}},
            {"name": "craft", "params": {"item": "stick", "count": 4}},
            {"name": "craft", "params": {"item": "wooden_pickaxe", "count": 1}},
            {"name": "collect", "params": {"block": "stone", "count": 8}}
        ]}"#;
        let llm = Arc::new(ScriptedLlm::with_responses(vec![
            first.into(),
            corrected.into(),
        ]));
        let svc = service(llm, fast_cfg());
        let outcome = svc.plan(&request()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Success);
        assert!(outcome
            .notes
            .iter()
            .any(|n| n == "feasibility_reprompt_resolved"));
        let first_sub = &outcome.response.subgoals[0];
        assert_eq!(first_sub.name, SubgoalName::Collect);
        assert_eq!(first_sub.str_param("block"), Some("oak_log"));
    }

    #[tokio::test]
    async fn test_reprompt_disabled_keeps_guarded_plan() {
        let first = r#"{"next_goal": "mine stone", "subgoals": [
            {"name": "collect", "params": {"block": "stone", "count": 8}}
        ]}"#;
        let llm = Arc::new(ScriptedLlm::with_responses(vec![first.into()]));
        let cfg = PlannerOptions {
            planner_feasibility_reprompt_enabled: false,
            ..fast_cfg()
        };
        let svc = service(llm.clone(), cfg);
        let outcome = svc.plan(&request()).await.unwrap();
        assert_eq!(outcome.status, PlanStatus::Success);
        // the guard expanded the plan in place of a repair round
        assert!(outcome.response.subgoals.len() > 1);
        assert_eq!(llm.remaining().await, 0);
    }
}
