//! Shared SQLite store.
//!
//! Every piece of cross-process state (rate-limit log, breaker state, task
//! queue, context history, dead letters, delivery records) lives in one
//! database file so several gateway and worker processes can share it.
//! Read-modify-write sequences go through [`Database::immediate`], which takes
//! SQLite's write lock up front.

use crate::errors::SwitchboardError;
use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run a synchronous store call on the blocking pool.
///
/// The connection mutex and SQLite's busy timeout can both wait, so calls on
/// request and worker paths go through here instead of running on the reactor.
pub async fn blocking<T, F>(f: F) -> Result<T, SwitchboardError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SwitchboardError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SwitchboardError::Internal(anyhow::anyhow!("store task failed: {e}")))?
}

pub struct Database {
    conn: Mutex<Connection>,
    db_path: String,
}

impl Database {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create database parent directory: {}",
                    parent.display()
                )
            })?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_string_lossy().to_string(),
        };
        db.ensure_schema().with_context(|| {
            format!(
                "Failed to initialize database schema at: {}",
                db_path.display()
            )
        })?;
        debug!("opened database at {}", db.db_path);
        Ok(db)
    }

    /// Private in-memory database, used by tests and `config check`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
            db_path: ":memory:".to_string(),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction and commit on success.
    ///
    /// The write lock is held from the first statement, so a read followed by
    /// a dependent write cannot interleave with another process.
    pub(crate) fn immediate<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, SwitchboardError>,
    ) -> Result<T, SwitchboardError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rate_limit_hits (
                key TEXT NOT NULL,
                hit_at_ms INTEGER NOT NULL,
                cost INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_rate_limit_key_ts ON rate_limit_hits(key, hit_at_ms);
            CREATE INDEX IF NOT EXISTS idx_rate_limit_ts ON rate_limit_hits(hit_at_ms);

            CREATE TABLE IF NOT EXISTS breaker_state (
                dependency TEXT NOT NULL,
                scope TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'closed',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                window_started_ms INTEGER NOT NULL DEFAULT 0,
                opened_at_ms INTEGER NOT NULL DEFAULT 0,
                cooldown_ms INTEGER NOT NULL DEFAULT 0,
                reopen_count INTEGER NOT NULL DEFAULT 0,
                probe_in_flight INTEGER NOT NULL DEFAULT 0,
                probe_started_ms INTEGER NOT NULL DEFAULT 0,
                updated_at_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (dependency, scope)
            );

            CREATE TABLE IF NOT EXISTS context_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                role TEXT NOT NULL,
                body TEXT NOT NULL,
                correlation_id TEXT,
                created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_context_conversation
                ON context_messages(tenant_id, recipient, id);

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_name TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                enqueued_at_ms INTEGER NOT NULL,
                available_at_ms INTEGER NOT NULL,
                lease_token TEXT,
                leased_until_ms INTEGER,
                last_error TEXT,
                completed_at_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_ready
                ON tasks(queue_name, status, available_at_ms);
            CREATE INDEX IF NOT EXISTS idx_tasks_lease
                ON tasks(queue_name, status, leased_until_ms);

            CREATE TABLE IF NOT EXISTS tenant_turns (
                queue_name TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                last_leased_ms INTEGER NOT NULL,
                PRIMARY KEY (queue_name, tenant_id)
            );

            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                queue_name TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                classification TEXT NOT NULL,
                error_detail TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                failed_at_ms INTEGER NOT NULL,
                requeued_task_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_dead_letters_status ON dead_letters(status);

            CREATE TABLE IF NOT EXISTS delivery_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                tenant_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                external_id TEXT,
                status TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                attempt INTEGER NOT NULL,
                error_detail TEXT,
                created_at_ms INTEGER NOT NULL,
                body TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_delivery_records_key
                ON delivery_records(idempotency_key);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_delivery_records_sent
                ON delivery_records(idempotency_key) WHERE status = 'sent';",
        )?;
        Ok(())
    }
}
