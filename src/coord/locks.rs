//! Leased named locks
//!
//! Coarse cross-agent mutual exclusion over resource keys ("resource:oak_log",
//! "storage:base", ...). A lease is active until its expiry; heartbeats extend
//! it and expiration is lazy, running at the head of every operation. Each
//! ACQUIRE / RELEASE / EXPIRE transition is persisted and mirrored on the
//! fleet event bus.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::emit_event;
use crate::events::FleetEvent;
use crate::model::now_ms;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockAction {
    Acquire,
    Release,
    Expire,
}

impl LockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockAction::Acquire => "ACQUIRE",
            LockAction::Release => "RELEASE",
            LockAction::Expire => "EXPIRE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockLease {
    pub resource_key: String,
    pub owner_agent_id: String,
    pub expires_at: i64,
}

pub struct LockManager {
    lease_ms: i64,
    leases: Mutex<HashMap<String, LockLease>>,
    store: Option<Arc<dyn Store>>,
}

impl LockManager {
    pub fn new(lease_ms: i64) -> Self {
        Self {
            lease_ms,
            leases: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Acquire or extend the lease on `key`. Succeeds when the key is
    /// unowned or already held by `owner`.
    pub async fn acquire(&self, key: &str, owner: &str) -> bool {
        self.acquire_at(key, owner, now_ms()).await
    }

    pub async fn acquire_at(&self, key: &str, owner: &str, now: i64) -> bool {
        let (expired, acquired) = {
            let mut leases = self.leases.lock().await;
            let expired = Self::sweep(&mut leases, now);
            let holder = leases.get(key).map(|l| l.owner_agent_id.clone());
            let acquired = match holder {
                Some(current) if current != owner => {
                    debug!(key, owner, holder = %current, "lock acquire refused");
                    false
                }
                _ => {
                    leases.insert(
                        key.to_string(),
                        LockLease {
                            resource_key: key.to_string(),
                            owner_agent_id: owner.to_string(),
                            expires_at: now + self.lease_ms,
                        },
                    );
                    true
                }
            };
            (expired, acquired)
        };
        let transition = acquired.then_some((LockAction::Acquire, key, owner, now));
        self.log_transitions(expired, transition).await;
        acquired
    }

    /// Extend the lease; a no-op unless `owner` currently holds the key.
    pub async fn heartbeat(&self, key: &str, owner: &str) -> bool {
        self.heartbeat_at(key, owner, now_ms()).await
    }

    pub async fn heartbeat_at(&self, key: &str, owner: &str, now: i64) -> bool {
        let (expired, extended) = {
            let mut leases = self.leases.lock().await;
            let expired = Self::sweep(&mut leases, now);
            let extended = match leases.get_mut(key) {
                Some(lease) if lease.owner_agent_id == owner => {
                    lease.expires_at = now + self.lease_ms;
                    true
                }
                _ => false,
            };
            (expired, extended)
        };
        if !extended {
            debug!(key, owner, "heartbeat ignored, caller is not the holder");
        }
        self.log_transitions(expired, None).await;
        extended
    }

    /// Release the lease; a no-op unless `owner` currently holds the key.
    pub async fn release(&self, key: &str, owner: &str) -> bool {
        self.release_at(key, owner, now_ms()).await
    }

    pub async fn release_at(&self, key: &str, owner: &str, now: i64) -> bool {
        let (expired, released) = {
            let mut leases = self.leases.lock().await;
            let expired = Self::sweep(&mut leases, now);
            let released = match leases.get(key) {
                Some(lease) if lease.owner_agent_id == owner => {
                    leases.remove(key);
                    true
                }
                _ => false,
            };
            (expired, released)
        };
        let transition = released.then(|| (LockAction::Release, key, owner, now));
        self.log_transitions(expired, transition).await;
        released
    }

    pub async fn owner_of(&self, key: &str) -> Option<String> {
        self.owner_of_at(key, now_ms()).await
    }

    pub async fn owner_of_at(&self, key: &str, now: i64) -> Option<String> {
        let (expired, owner) = {
            let mut leases = self.leases.lock().await;
            let expired = Self::sweep(&mut leases, now);
            (expired, leases.get(key).map(|l| l.owner_agent_id.clone()))
        };
        self.log_transitions(expired, None).await;
        owner
    }

    /// Remove every lease whose expiry has passed, returning them for
    /// EXPIRE logging outside the mutex.
    fn sweep(leases: &mut HashMap<String, LockLease>, now: i64) -> Vec<LockLease> {
        let stale: Vec<String> = leases
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|k| leases.remove(&k))
            .collect()
    }

    async fn log_transitions(
        &self,
        expired: Vec<LockLease>,
        transition: Option<(LockAction, &str, &str, i64)>,
    ) {
        for lease in expired {
            warn!(key = %lease.resource_key, owner = %lease.owner_agent_id, "lock lease expired");
            emit_event!(FleetEvent::LockTransition {
                action: LockAction::Expire,
                key: lease.resource_key.clone(),
                owner: lease.owner_agent_id.clone(),
            });
            if let Some(store) = &self.store {
                let details = json!({ "expires_at": lease.expires_at });
                if let Err(e) = store
                    .record_lock(
                        LockAction::Expire,
                        &lease.resource_key,
                        &lease.owner_agent_id,
                        details,
                    )
                    .await
                {
                    warn!(error = %e, "failed to persist lock expiry");
                }
            }
        }
        if let Some((action, key, owner, now)) = transition {
            emit_event!(FleetEvent::LockTransition {
                action,
                key: key.to_string(),
                owner: owner.to_string(),
            });
            if let Some(store) = &self.store {
                let details = json!({ "at": now, "lease_ms": self.lease_ms });
                if let Err(e) = store.record_lock(action, key, owner, details).await {
                    warn!(error = %e, "failed to persist lock transition");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LockManager {
        LockManager::new(30_000)
    }

    #[tokio::test]
    async fn test_contention() {
        let locks = manager();
        assert!(locks.acquire_at("resource:oak_log", "A", 0).await);
        assert!(!locks.acquire_at("resource:oak_log", "B", 1).await);
        assert!(locks.release_at("resource:oak_log", "A", 2).await);
        assert!(locks.acquire_at("resource:oak_log", "B", 3).await);
    }

    #[tokio::test]
    async fn test_reacquire_is_idempotent_extension() {
        let locks = manager();
        assert!(locks.acquire_at("k", "A", 0).await);
        assert!(locks.acquire_at("k", "A", 10_000).await);
        // extended past the original expiry
        assert_eq!(locks.owner_of_at("k", 35_000).await.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_lazy_expiry() {
        let locks = manager();
        assert!(locks.acquire_at("k", "A", 0).await);
        assert_eq!(locks.owner_of_at("k", 29_999).await.as_deref(), Some("A"));
        assert_eq!(locks.owner_of_at("k", 30_000).await, None);
        assert!(locks.acquire_at("k", "B", 30_001).await);
    }

    #[tokio::test]
    async fn test_non_owner_heartbeat_and_release_are_noops() {
        let locks = manager();
        assert!(locks.acquire_at("k", "A", 0).await);
        assert!(!locks.heartbeat_at("k", "B", 1).await);
        assert!(!locks.release_at("k", "B", 2).await);
        assert_eq!(locks.owner_of_at("k", 3).await.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_heartbeat_extends() {
        let locks = manager();
        assert!(locks.acquire_at("k", "A", 0).await);
        assert!(locks.heartbeat_at("k", "A", 20_000).await);
        assert_eq!(locks.owner_of_at("k", 45_000).await.as_deref(), Some("A"));
        assert_eq!(locks.owner_of_at("k", 50_001).await, None);
    }
}
