//! Durable Run Store Interface and SQLite Implementation
//!
//! Append-only persistence for runs, bot registrations, state snapshots,
//! subgoal attempts, LLM calls, lock transitions and incidents. Writers are
//! fire-and-forget with respect to each other, but a controller persists an
//! attempt before dispatching its successor.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task;

use crate::coord::LockAction;

/// One persisted subgoal attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub bot_id: String,
    pub subgoal_id: String,
    pub subgoal_name: String,
    pub params_json: Value,
    pub result_json: Value,
    pub retry_count: u32,
    pub duration_ms: i64,
}

/// One persisted planner call.
#[derive(Debug, Clone)]
pub struct LlmCallRecord {
    pub bot_id: String,
    pub status: String,
    pub prompt_sha: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub duration_ms: i64,
    pub notes: Vec<String>,
}

impl LlmCallRecord {
    /// Stable fingerprint of a prompt so audits can correlate repeats
    /// without storing the full text.
    pub fn fingerprint(prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// The persistence seam every shared service and controller writes through.
#[async_trait]
pub trait Store: Send + Sync {
    async fn open_run(&self, run_id: &str) -> Result<()>;
    async fn close_run(&self, run_id: &str) -> Result<()>;
    async fn register_bot(&self, run_id: &str, bot_id: &str) -> Result<()>;
    async fn record_bot_state(&self, bot_id: &str, snapshot_json: Value) -> Result<()>;
    async fn record_attempt(&self, attempt: AttemptRecord) -> Result<()>;
    async fn record_llm_call(&self, call: LlmCallRecord) -> Result<()>;
    async fn record_lock(
        &self,
        action: LockAction,
        key: &str,
        owner: &str,
        details_json: Value,
    ) -> Result<()>;
    async fn record_incident(&self, bot_id: &str, category: &str, details: &str) -> Result<()>;
}

/// SQLite-backed store. Connections are opened per operation inside
/// `spawn_blocking`, matching rusqlite's threading model.
#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone)?;

            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL,
                    ended_at TEXT
                );
                CREATE TABLE IF NOT EXISTS bots (
                    bot_id TEXT NOT NULL,
                    run_id TEXT NOT NULL,
                    registered_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS bot_state (
                    bot_id TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    snapshot_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS subgoal_attempts (
                    bot_id TEXT NOT NULL,
                    subgoal_id TEXT NOT NULL,
                    subgoal_name TEXT NOT NULL,
                    params_json TEXT NOT NULL,
                    result_json TEXT NOT NULL,
                    retry_count INTEGER NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    recorded_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS llm_calls (
                    bot_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    prompt_sha TEXT NOT NULL,
                    tokens_in INTEGER NOT NULL,
                    tokens_out INTEGER NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    notes_json TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS locks (
                    action TEXT NOT NULL,
                    resource_key TEXT NOT NULL,
                    owner TEXT NOT NULL,
                    details_json TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS incidents (
                    bot_id TEXT NOT NULL,
                    category TEXT NOT NULL,
                    details TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_attempts_bot ON subgoal_attempts(bot_id);
                CREATE INDEX IF NOT EXISTS idx_llm_calls_bot ON llm_calls(bot_id);
                CREATE INDEX IF NOT EXISTS idx_locks_key ON locks(resource_key);
                "#,
            )?;

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(Self { db_path: path })
    }

    async fn with_conn<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()> + Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            op(&conn)?;
            Ok::<_, anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    /// Count rows in a table, for tests and maintenance tooling.
    pub async fn count(&self, table: &str) -> Result<i64> {
        let path = self.db_path.clone();
        let table = table.to_string();
        let count = task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok::<_, anyhow::Error>(n)
        })
        .await??;
        Ok(count)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn open_run(&self, run_id: &str) -> Result<()> {
        let run_id = run_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO runs (run_id, started_at, ended_at) VALUES (?1, ?2, NULL)",
                params![run_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn close_run(&self, run_id: &str) -> Result<()> {
        let run_id = run_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE runs SET ended_at = ?2 WHERE run_id = ?1",
                params![run_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn register_bot(&self, run_id: &str, bot_id: &str) -> Result<()> {
        let run_id = run_id.to_string();
        let bot_id = bot_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bots (bot_id, run_id, registered_at) VALUES (?1, ?2, ?3)",
                params![bot_id, run_id, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_bot_state(&self, bot_id: &str, snapshot_json: Value) -> Result<()> {
        let bot_id = bot_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bot_state (bot_id, recorded_at, snapshot_json) VALUES (?1, ?2, ?3)",
                params![bot_id, now, snapshot_json.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_attempt(&self, attempt: AttemptRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO subgoal_attempts \
                 (bot_id, subgoal_id, subgoal_name, params_json, result_json, retry_count, duration_ms, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    attempt.bot_id,
                    attempt.subgoal_id,
                    attempt.subgoal_name,
                    attempt.params_json.to_string(),
                    attempt.result_json.to_string(),
                    attempt.retry_count,
                    attempt.duration_ms,
                    now
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_llm_call(&self, call: LlmCallRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let notes_json = serde_json::to_string(&call.notes).unwrap_or_else(|_| "[]".to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO llm_calls \
                 (bot_id, status, prompt_sha, tokens_in, tokens_out, duration_ms, notes_json, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    call.bot_id,
                    call.status,
                    call.prompt_sha,
                    call.tokens_in,
                    call.tokens_out,
                    call.duration_ms,
                    notes_json,
                    now
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_lock(
        &self,
        action: LockAction,
        key: &str,
        owner: &str,
        details_json: Value,
    ) -> Result<()> {
        let action = action.as_str();
        let key = key.to_string();
        let owner = owner.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO locks (action, resource_key, owner, details_json, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![action, key, owner, details_json.to_string(), now],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_incident(&self, bot_id: &str, category: &str, details: &str) -> Result<()> {
        let bot_id = bot_id.to_string();
        let category = category.to_string();
        let details = details.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO incidents (bot_id, category, details, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![bot_id, category, details, now],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("fleet.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (_dir, store) = open().await;
        store.open_run("run-1").await.unwrap();
        store.register_bot("run-1", "bot-0").await.unwrap();
        store.close_run("run-1").await.unwrap();
        assert_eq!(store.count("runs").await.unwrap(), 1);
        assert_eq!(store.count("bots").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_attempt_and_lock_rows() {
        let (_dir, store) = open().await;
        store
            .record_attempt(AttemptRecord {
                bot_id: "bot-0".into(),
                subgoal_id: "s-1".into(),
                subgoal_name: "collect".into(),
                params_json: json!({"block": "stone", "count": 4}),
                result_json: json!({"outcome": "success"}),
                retry_count: 0,
                duration_ms: 900,
            })
            .await
            .unwrap();
        store
            .record_lock(LockAction::Acquire, "resource:stone", "bot-0", json!({}))
            .await
            .unwrap();
        assert_eq!(store.count("subgoal_attempts").await.unwrap(), 1);
        assert_eq!(store.count("locks").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_llm_call_fingerprint() {
        let (_dir, store) = open().await;
        let sha = LlmCallRecord::fingerprint("plan please");
        assert_eq!(sha.len(), 64);
        store
            .record_llm_call(LlmCallRecord {
                bot_id: "bot-0".into(),
                status: "SUCCESS".into(),
                prompt_sha: sha,
                tokens_in: 512,
                tokens_out: 64,
                duration_ms: 1_200,
                notes: vec!["normalized_subgoal_0_collect".into()],
            })
            .await
            .unwrap();
        assert_eq!(store.count("llm_calls").await.unwrap(), 1);
    }
}
