//! Persistent store and approval state machine for proposed actions.
//!
//! Lifecycle: `pending → approved → executed | failed`, `pending → rejected`.
//! `executed`, `failed`, and `rejected` are terminal; no transition leaves a
//! terminal state. The pending→approved transition and the external dispatch
//! it gates run under a per-action-id lock, so concurrent approvals of the
//! same id produce exactly one external side effect.

use super::dispatch::{ActionExecutor, ExecutionReceipt};
use super::types::{ActionPayload, ActionStatus, ProposedAction};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of an approval attempt. "Not found" and "already decided" are
/// ordinary outcomes, not errors; callers must handle each case.
#[derive(Debug)]
pub enum ApproveOutcome {
    Executed {
        action: ProposedAction,
        receipt: ExecutionReceipt,
    },
    Failed {
        action: ProposedAction,
        summary: String,
    },
    NotFound,
    /// Another caller decided this action first; here is what they decided.
    AlreadyDecided { action: ProposedAction },
}

#[derive(Debug)]
pub enum RejectOutcome {
    Rejected(ProposedAction),
    NotFound,
    AlreadyDecided { action: ProposedAction },
}

/// Sqlite-backed action store. Initialized once per process and injected;
/// the per-id lock map is the only mutable state outside the database.
pub struct ActionStore {
    pool: SqlitePool,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ActionStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create action store directory")?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .context("open action database")?;
        Self::init_schema(&pool).await?;
        Ok(Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Open an in-memory database (tests and ephemeral deployments).
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory action database")?;
        Self::init_schema(&pool).await?;
        Ok(Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS actions (
                id         TEXT PRIMARY KEY,
                kind       TEXT NOT NULL,
                status     TEXT NOT NULL,
                payload    TEXT NOT NULL,
                reason     TEXT NOT NULL,
                error      TEXT,
                created_at TEXT NOT NULL,
                decided_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_actions_status ON actions(status);
            CREATE INDEX IF NOT EXISTS idx_actions_created ON actions(created_at);",
        )
        .execute(pool)
        .await
        .context("init action schema")?;
        Ok(())
    }

    // ── CRUD ─────────────────────────────────────────────────────────────

    pub async fn create(&self, action: &ProposedAction) -> anyhow::Result<String> {
        let payload = serde_json::to_string(&action.payload).context("encode action payload")?;
        sqlx::query(
            "INSERT INTO actions (id, kind, status, payload, reason, error, created_at, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&action.id)
        .bind(action.kind().to_string())
        .bind(action.status.to_string())
        .bind(payload)
        .bind(&action.reason)
        .bind(&action.error)
        .bind(action.created_at.to_rfc3339())
        .bind(action.decided_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .context("insert action")?;
        Ok(action.id.clone())
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<ProposedAction>> {
        let row: Option<ActionRow> = sqlx::query_as(
            "SELECT id, status, payload, reason, error, created_at, decided_at
             FROM actions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch action")?;

        row.map(decode_row).transpose()
    }

    pub async fn list_pending(&self) -> anyhow::Result<Vec<ProposedAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT id, status, payload, reason, error, created_at, decided_at
             FROM actions WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("list pending actions")?;

        rows.into_iter().map(decode_row).collect()
    }

    pub async fn list_history(&self, limit: usize) -> anyhow::Result<Vec<ProposedAction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT id, status, payload, reason, error, created_at, decided_at
             FROM actions ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list action history")?;

        rows.into_iter().map(decode_row).collect()
    }

    /// Remove terminal actions older than `window`. Pending actions are
    /// never purged. Invoked by an external scheduler or the CLI; the store
    /// does not self-schedule.
    pub async fn purge_older_than(&self, window: chrono::Duration) -> anyhow::Result<u64> {
        let cutoff = (Utc::now() - window).to_rfc3339();

        let expired: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM actions
             WHERE status IN ('executed', 'failed', 'rejected') AND created_at < ?1",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await
        .context("select purgeable actions")?;

        if expired.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "DELETE FROM actions
             WHERE status IN ('executed', 'failed', 'rejected') AND created_at < ?1",
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await
        .context("purge actions")?;

        let mut locks = self.locks.lock().await;
        for (id,) in &expired {
            locks.remove(id);
        }

        Ok(result.rows_affected())
    }

    // ── Approval state machine ───────────────────────────────────────────

    /// Approve and execute an action, at most once.
    ///
    /// The per-id lock plus the `status = 'pending'` compare-and-set
    /// guarantee a single external dispatch even under concurrent approval
    /// calls; the loser observes the decided state.
    pub async fn approve(
        &self,
        id: &str,
        executor: &ActionExecutor,
    ) -> anyhow::Result<ApproveOutcome> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let Some(action) = self.get(id).await? else {
            return Ok(ApproveOutcome::NotFound);
        };
        if action.status != ActionStatus::Pending {
            return Ok(ApproveOutcome::AlreadyDecided { action });
        }

        let updated =
            sqlx::query("UPDATE actions SET status = 'approved' WHERE id = ?1 AND status = 'pending'")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("approve transition")?;
        if updated.rows_affected() == 0 {
            let action = self
                .get(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("action {id} vanished during approval"))?;
            return Ok(ApproveOutcome::AlreadyDecided { action });
        }

        match executor.execute(&action.payload).await {
            Ok(receipt) => {
                let decided = Utc::now();
                sqlx::query("UPDATE actions SET status = 'executed', decided_at = ?1 WHERE id = ?2")
                    .bind(decided.to_rfc3339())
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .context("record executed action")?;

                let mut action = action;
                action.status = ActionStatus::Executed;
                action.decided_at = Some(decided);
                Ok(ApproveOutcome::Executed { action, receipt })
            }
            Err(error) => {
                // Full detail server-side only; the stored error is user-safe.
                tracing::warn!(id, %error, "action execution failed");
                let summary = format!("{} could not be completed", action.kind());
                let decided = Utc::now();
                sqlx::query(
                    "UPDATE actions SET status = 'failed', error = ?1, decided_at = ?2 WHERE id = ?3",
                )
                .bind(&summary)
                .bind(decided.to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await
                .context("record failed action")?;

                let mut action = action;
                action.status = ActionStatus::Failed;
                action.error = Some(summary.clone());
                action.decided_at = Some(decided);
                Ok(ApproveOutcome::Failed { action, summary })
            }
        }
    }

    /// Reject a pending action. Pure status transition, no external call.
    pub async fn reject(&self, id: &str) -> anyhow::Result<RejectOutcome> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let Some(action) = self.get(id).await? else {
            return Ok(RejectOutcome::NotFound);
        };
        if action.status != ActionStatus::Pending {
            return Ok(RejectOutcome::AlreadyDecided { action });
        }

        let decided = Utc::now();
        let updated = sqlx::query(
            "UPDATE actions SET status = 'rejected', decided_at = ?1
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(decided.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("reject transition")?;
        if updated.rows_affected() == 0 {
            let action = self
                .get(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("action {id} vanished during rejection"))?;
            return Ok(RejectOutcome::AlreadyDecided { action });
        }

        let mut action = action;
        action.status = ActionStatus::Rejected;
        action.decided_at = Some(decided);
        Ok(RejectOutcome::Rejected(action))
    }

    /// Per-action-id lock. Scoped per id so unrelated approvals never
    /// serialize against each other; the map mutex is held only for the
    /// lookup itself.
    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ── Row decoding ─────────────────────────────────────────────────────────────

type ActionRow = (
    String,         // id
    String,         // status
    String,         // payload
    String,         // reason
    Option<String>, // error
    String,         // created_at
    Option<String>, // decided_at
);

fn decode_row(row: ActionRow) -> anyhow::Result<ProposedAction> {
    let (id, status, payload, reason, error, created_at, decided_at) = row;

    let payload: ActionPayload =
        serde_json::from_str(&payload).context("decode action payload")?;
    let status = ActionStatus::from_str(&status)
        .map_err(|_| anyhow::anyhow!("unknown action status '{status}'"))?;

    Ok(ProposedAction {
        id,
        payload,
        reason,
        status,
        error,
        created_at: parse_timestamp(&created_at)?,
        decided_at: decided_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("parse timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::dispatch::{ProviderHandle, ProviderWriters, TaskWriter};
    use crate::actions::types::{TaskDraft, TaskUpdate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTasks {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl TaskWriter for CountingTasks {
        async fn create_task(&self, _draft: &TaskDraft) -> anyhow::Result<ProviderHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider said no: internal detail abc123");
            }
            Ok("task-1".into())
        }

        async fn update_task(&self, _update: &TaskUpdate) -> anyhow::Result<ProviderHandle> {
            Ok(String::new())
        }
    }

    fn executor(calls: Arc<AtomicUsize>, fail: bool) -> ActionExecutor {
        ActionExecutor::new(ProviderWriters {
            tasks: Some(Arc::new(CountingTasks { calls, fail })),
            ..ProviderWriters::default()
        })
    }

    fn pending_task(title: &str) -> ProposedAction {
        ProposedAction::pending(
            ActionPayload::CreateTask(TaskDraft {
                title: title.into(),
                body: None,
                due_date: None,
                list_id: None,
                importance: "normal".into(),
            }),
            "user asked",
        )
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        let fetched = store.get(&action.id).await.expect("get").expect("present");
        assert_eq!(fetched.id, action.id);
        assert_eq!(fetched.status, ActionStatus::Pending);
        assert_eq!(fetched.reason, "user asked");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = ActionStore::in_memory().await.expect("store");
        assert!(store.get("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn approve_executes_and_records() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = store
            .approve(&action.id, &executor(calls.clone(), false))
            .await
            .expect("approve");

        match outcome {
            ApproveOutcome::Executed { action, receipt } => {
                assert_eq!(action.status, ActionStatus::Executed);
                assert!(action.decided_at.is_some());
                assert_eq!(receipt.handle.as_deref(), Some("task-1"));
            }
            other => panic!("expected Executed, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = store.get(&action.id).await.expect("get").expect("present");
        assert_eq!(stored.status, ActionStatus::Executed);
    }

    #[tokio::test]
    async fn second_approve_observes_terminal_state_without_reexecution() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(calls.clone(), false);

        store.approve(&action.id, &exec).await.expect("first");
        let second = store.approve(&action.id, &exec).await.expect("second");

        match second {
            ApproveOutcome::AlreadyDecided { action } => {
                assert_eq!(action.status, ActionStatus::Executed);
            }
            other => panic!("expected AlreadyDecided, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_execution_records_user_safe_summary() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = store
            .approve(&action.id, &executor(calls, true))
            .await
            .expect("approve");

        match outcome {
            ApproveOutcome::Failed { action, summary } => {
                assert_eq!(action.status, ActionStatus::Failed);
                assert!(summary.contains("create_task"));
                // Internal provider detail is logged, never stored.
                assert!(!action.error.as_deref().unwrap_or("").contains("abc123"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reject_is_pure_status_transition() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        let outcome = store.reject(&action.id).await.expect("reject");
        match outcome {
            RejectOutcome::Rejected(action) => {
                assert_eq!(action.status, ActionStatus::Rejected);
                assert!(action.error.is_none());
                assert!(action.decided_at.is_some());
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approve_after_reject_is_already_decided() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        store.reject(&action.id).await.expect("reject");

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = store
            .approve(&action.id, &executor(calls.clone(), false))
            .await
            .expect("approve");

        assert!(matches!(outcome, ApproveOutcome::AlreadyDecided { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reject_after_reject_is_already_decided() {
        let store = ActionStore::in_memory().await.expect("store");
        let action = pending_task("Pay rent");
        store.create(&action).await.expect("create");

        store.reject(&action.id).await.expect("first");
        let outcome = store.reject(&action.id).await.expect("second");
        assert!(matches!(outcome, RejectOutcome::AlreadyDecided { .. }));
    }

    #[tokio::test]
    async fn list_pending_excludes_decided() {
        let store = ActionStore::in_memory().await.expect("store");
        let keep = pending_task("Keep");
        let drop = pending_task("Drop");
        store.create(&keep).await.expect("create");
        store.create(&drop).await.expect("create");
        store.reject(&drop.id).await.expect("reject");

        let pending = store.list_pending().await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, keep.id);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = ActionStore::in_memory().await.expect("store");
        for i in 0..5 {
            let mut action = pending_task(&format!("t{i}"));
            action.created_at = Utc::now() - chrono::Duration::minutes(5 - i);
            store.create(&action).await.expect("create");
        }

        let history = store.list_history(3).await.expect("history");
        assert_eq!(history.len(), 3);
        assert!(history[0].created_at >= history[1].created_at);
        assert!(history[1].created_at >= history[2].created_at);
    }

    #[tokio::test]
    async fn purge_removes_old_terminal_but_never_pending() {
        let store = ActionStore::in_memory().await.expect("store");

        let mut old_rejected = pending_task("old rejected");
        old_rejected.created_at = Utc::now() - chrono::Duration::hours(100);
        store.create(&old_rejected).await.expect("create");
        store.reject(&old_rejected.id).await.expect("reject");

        let mut old_pending = pending_task("old pending");
        old_pending.created_at = Utc::now() - chrono::Duration::hours(100);
        store.create(&old_pending).await.expect("create");

        let fresh = pending_task("fresh");
        store.create(&fresh).await.expect("create");
        store.reject(&fresh.id).await.expect("reject");

        let removed = store
            .purge_older_than(chrono::Duration::hours(48))
            .await
            .expect("purge");

        assert_eq!(removed, 1);
        assert!(store.get(&old_rejected.id).await.expect("get").is_none());
        assert!(store.get(&old_pending.id).await.expect("get").is_some());
        assert!(store.get(&fresh.id).await.expect("get").is_some());
    }
}
