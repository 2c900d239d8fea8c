//! Architecture Verification Suite
//!
//! Enforces the structural rules of the fleet: shared services must be
//! thread-safe, the skill result is a closed sum, and the trigger and
//! failure vocabularies stay in sync with their wire spellings.

#[cfg(test)]
mod architecture_tests {
    use voxel_agency::adapter::SimAdapter;
    use voxel_agency::catalog::StaticCatalog;
    use voxel_agency::coord::{ExplorerLimiter, LockManager, RateLimiter, SkillLimiter};
    use voxel_agency::metrics::FleetMetrics;
    use voxel_agency::model::{FailureCode, SkillResult, Trigger, SUBGOAL_NAMES};
    use voxel_agency::skills::SkillEngine;
    use voxel_agency::store::SqliteStore;

    // 1. SHARED SERVICES: everything the fleet shares must be Send + Sync
    #[test]
    fn test_shared_services_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<RateLimiter>();
        assert_send_sync::<LockManager>();
        assert_send_sync::<SkillLimiter>();
        assert_send_sync::<ExplorerLimiter>();
        assert_send_sync::<SqliteStore>();
        assert_send_sync::<FleetMetrics>();
        assert_send_sync::<SkillEngine>();
    }

    // 2. SEAMS: the injected collaborators cross task boundaries
    #[test]
    fn test_seams_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<SimAdapter>();
        assert_send_sync::<StaticCatalog>();
        assert_send_sync::<voxel_agency::llm::ScriptedLlm>();
    }

    // 3. CLOSED SETS: wire spellings must round-trip
    #[test]
    fn test_failure_codes_round_trip() {
        let codes = [
            FailureCode::ResourceNotFound,
            FailureCode::PathfindFailed,
            FailureCode::NoToolAvailable,
            FailureCode::InventoryFull,
            FailureCode::InterruptedByHostiles,
            FailureCode::PlacementFailed,
            FailureCode::StuckTimeout,
            FailureCode::DependsOnItem,
            FailureCode::CombatLostTarget,
            FailureCode::BotDied,
        ];
        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: FailureCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn test_trigger_spellings() {
        let triggers = [
            (Trigger::Idle, "IDLE"),
            (Trigger::SubgoalCompleted, "SUBGOAL_COMPLETED"),
            (Trigger::SubgoalFailed, "SUBGOAL_FAILED"),
            (Trigger::Attacked, "ATTACKED"),
            (Trigger::Death, "DEATH"),
            (Trigger::Stuck, "STUCK"),
            (Trigger::Nightfall, "NIGHTFALL"),
            (Trigger::InventoryFull, "INVENTORY_FULL"),
            (Trigger::ToolMissing, "TOOL_MISSING"),
            (Trigger::Reconnect, "RECONNECT"),
        ];
        for (trigger, wire) in triggers {
            assert_eq!(trigger.as_str(), wire);
        }
    }

    #[test]
    fn test_subgoal_vocabulary_is_closed() {
        assert_eq!(SUBGOAL_NAMES.len(), 11);
        for name in SUBGOAL_NAMES {
            assert!(voxel_agency::model::SubgoalName::parse(name).is_some());
        }
    }

    // 4. SUM TYPE: a result is either success or a coded failure, never both
    #[test]
    fn test_skill_result_is_tagged() {
        let success = SkillResult::success("done");
        assert!(success.failure_code().is_none());
        let failure = SkillResult::failure(FailureCode::StuckTimeout, "wedged", true);
        assert!(!failure.is_success());
        assert_eq!(failure.failure_code(), Some(FailureCode::StuckTimeout));
    }
}
