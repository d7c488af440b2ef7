//! Durable, tenant-fair task queue with dead-letter escalation.
//!
//! Tasks move `queued -> leased -> {completed | queued (retry) | dead}`.
//! Every transition runs in one IMMEDIATE transaction against the shared
//! store, and every transition after `lease` requires the lease token that
//! `lease` handed out, so a worker whose lease expired cannot clobber the
//! task's new owner.

use crate::backoff::BackoffSchedule;
use crate::config::QueueConfig;
use crate::errors::SwitchboardError;
use crate::payload::MessageKind;
use crate::storage::{Database, now_ms};
use crate::telemetry;
use rusqlite::{OptionalExtension, Row, Transaction, params};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LEASE_EXPIRED: &str = "lease-expired";
pub const PERMANENT_FAILURE: &str = "permanent-failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Primary,
    Reprocess,
}

impl QueueName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Reprocess => "reprocess",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "reprocess" {
            Self::Reprocess
        } else {
            Self::Primary
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Leased,
    Completed,
    Dead,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "leased" => Self::Leased,
            "completed" => Self::Completed,
            "dead" => Self::Dead,
            _ => Self::Queued,
        }
    }
}

/// Work accepted by the gateway, before it gets an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub tenant_id: String,
    pub recipient: String,
    pub body: String,
    pub kind: MessageKind,
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub queue: QueueName,
    pub tenant_id: String,
    pub recipient: String,
    pub body: String,
    pub kind: MessageKind,
    pub correlation_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at_ms: i64,
    pub available_at_ms: i64,
    pub lease_token: Option<String>,
    pub leased_until_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl Task {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

const TASK_COLUMNS: &str = "id, queue_name, tenant_id, recipient, body, kind, correlation_id, \
                            status, attempts, max_attempts, enqueued_at_ms, available_at_ms, \
                            lease_token, leased_until_ms, last_error";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let queue: String = row.get(1)?;
    let kind: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        queue: QueueName::parse(&queue),
        tenant_id: row.get(2)?,
        recipient: row.get(3)?,
        body: row.get(4)?,
        kind: MessageKind::parse(&kind),
        correlation_id: row.get(6)?,
        status: TaskStatus::parse(&status),
        attempts: row.get(8)?,
        max_attempts: row.get(9)?,
        enqueued_at_ms: row.get(10)?,
        available_at_ms: row.get(11)?,
        lease_token: row.get(12)?,
        leased_until_ms: row.get(13)?,
        last_error: row.get(14)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    Pending,
    Requeued,
}

impl DeadLetterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Requeued => "requeued",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "requeued" => Some(Self::Requeued),
            _ => None,
        }
    }
}

/// Terminal failure of a task, kept until an operator requeues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEntry {
    pub id: i64,
    pub task_id: i64,
    pub queue: QueueName,
    pub tenant_id: String,
    pub recipient: String,
    pub body: String,
    pub kind: MessageKind,
    pub correlation_id: String,
    pub attempts: u32,
    /// `delivery-exhausted`, `generation-exhausted`, `delivery-rejected`,
    /// `lease-expired`, `permanent-failure`, ...
    pub classification: String,
    pub error_detail: String,
    /// The task as JSON, for replay outside this process.
    pub payload: String,
    pub status: DeadLetterStatus,
    pub failed_at_ms: i64,
    pub requeued_task_id: Option<i64>,
}

const DEAD_LETTER_COLUMNS: &str = "id, task_id, queue_name, tenant_id, recipient, body, kind, \
                                   correlation_id, attempts, classification, error_detail, \
                                   payload, status, failed_at_ms, requeued_task_id";

fn dead_letter_from_row(row: &Row<'_>) -> rusqlite::Result<DeadLetterEntry> {
    let queue: String = row.get(2)?;
    let kind: String = row.get(6)?;
    let status: String = row.get(12)?;
    Ok(DeadLetterEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        queue: QueueName::parse(&queue),
        tenant_id: row.get(3)?,
        recipient: row.get(4)?,
        body: row.get(5)?,
        kind: MessageKind::parse(&kind),
        correlation_id: row.get(7)?,
        attempts: row.get(8)?,
        classification: row.get(9)?,
        error_detail: row.get(10)?,
        payload: row.get(11)?,
        status: DeadLetterStatus::parse(&status).unwrap_or(DeadLetterStatus::Pending),
        failed_at_ms: row.get(13)?,
        requeued_task_id: row.get(14)?,
    })
}

/// Outcome of [`TaskQueue::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { available_at_ms: i64 },
    DeadLettered { dead_letter_id: i64 },
    /// The caller no longer holds the lease; nothing changed.
    LeaseLost,
}

pub struct TaskQueue {
    db: Arc<Database>,
    max_attempts: u32,
    schedule: BackoffSchedule,
    lease_ms: i64,
}

impl TaskQueue {
    pub fn new(db: Arc<Database>, config: &QueueConfig) -> Self {
        Self {
            db,
            max_attempts: config.max_attempts.max(1),
            schedule: BackoffSchedule::from_secs(&config.retry_schedule_secs),
            lease_ms: i64::try_from(config.lease_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn enqueue(&self, queue: QueueName, task: &NewTask) -> Result<i64, SwitchboardError> {
        self.enqueue_at(queue, task, now_ms())
    }

    pub fn enqueue_at(
        &self,
        queue: QueueName,
        task: &NewTask,
        now: i64,
    ) -> Result<i64, SwitchboardError> {
        let id = self
            .db
            .immediate(|tx| insert_task(tx, queue, task, self.max_attempts, now))?;
        telemetry::record_enqueued(&task.tenant_id, queue.as_str());
        debug!(
            "enqueued task {} on {} for {} ({})",
            id, queue, task.tenant_id, task.correlation_id
        );
        Ok(id)
    }

    pub fn lease(&self, queue: QueueName) -> Result<Option<Task>, SwitchboardError> {
        self.lease_at(queue, now_ms())
    }

    /// Lease the next ready task, rotating across tenants.
    ///
    /// Ready means queued and available, or leased with an expired lease.
    /// The tenant served least recently wins; within a tenant the oldest
    /// ready task wins. Expired leases on a task with no attempts left are
    /// dead-lettered (`lease-expired`) instead of being handed out again.
    pub fn lease_at(&self, queue: QueueName, now: i64) -> Result<Option<Task>, SwitchboardError> {
        let lease_token = uuid::Uuid::new_v4().to_string();
        let lease_ms = self.lease_ms;
        let (task, expired) = self.db.immediate(|tx| {
            let expired = expire_final_leases(tx, queue, now)?;

            let next: Option<(String, i64)> = tx
                .query_row(
                    "SELECT r.tenant_id, r.first_id FROM (
                         SELECT tenant_id, MIN(id) AS first_id FROM tasks
                         WHERE queue_name = ?1
                           AND ((status = 'queued' AND available_at_ms <= ?2)
                             OR (status = 'leased' AND leased_until_ms <= ?2))
                         GROUP BY tenant_id
                     ) r
                     LEFT JOIN tenant_turns tt
                       ON tt.queue_name = ?1 AND tt.tenant_id = r.tenant_id
                     ORDER BY COALESCE(tt.last_leased_ms, -1) ASC, r.first_id ASC
                     LIMIT 1",
                    params![queue.as_str(), now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((tenant_id, task_id)) = next else {
                return Ok((None, expired));
            };

            tx.execute(
                "UPDATE tasks
                 SET status = 'leased', attempts = attempts + 1,
                     lease_token = ?1, leased_until_ms = ?2
                 WHERE id = ?3",
                params![lease_token, now.saturating_add(lease_ms), task_id],
            )?;
            // Strictly increasing turn stamps keep the rotation total even
            // when several leases land in the same millisecond.
            tx.execute(
                "INSERT INTO tenant_turns (queue_name, tenant_id, last_leased_ms)
                 VALUES (?1, ?2, MAX(?3, COALESCE(
                     (SELECT MAX(last_leased_ms) + 1 FROM tenant_turns WHERE queue_name = ?1), ?3)))
                 ON CONFLICT(queue_name, tenant_id) DO UPDATE SET last_leased_ms = excluded.last_leased_ms",
                params![queue.as_str(), tenant_id, now],
            )?;
            let task = load_task(tx, task_id)?;
            Ok((task, expired))
        })?;

        for entry in &expired {
            warn!(
                "task {} for {} lost its final lease, dead-lettered as {}",
                entry.0, entry.1, LEASE_EXPIRED
            );
            telemetry::record_dead_letter(&entry.1, LEASE_EXPIRED);
        }
        if let Some(task) = &task {
            debug!(
                "leased task {} on {} for {} (attempt {}/{})",
                task.id, queue, task.tenant_id, task.attempts, task.max_attempts
            );
        }
        Ok(task)
    }

    /// Mark a leased task done. Returns false if the lease was lost.
    pub fn complete(&self, task: &Task) -> Result<bool, SwitchboardError> {
        let now = now_ms();
        let updated = self.db.immediate(|tx| {
            Ok(tx.execute(
                "UPDATE tasks
                 SET status = 'completed', completed_at_ms = ?1,
                     lease_token = NULL, leased_until_ms = NULL
                 WHERE id = ?2 AND status = 'leased' AND lease_token = ?3",
                params![now, task.id, task.lease_token],
            )?)
        })?;
        if updated == 0 {
            warn!("task {} lease lost before completion", task.id);
            return Ok(false);
        }
        telemetry::record_completed(&task.tenant_id);
        Ok(true)
    }

    pub fn retry(
        &self,
        task: &Task,
        stage: &str,
        error: &str,
    ) -> Result<RetryDecision, SwitchboardError> {
        self.retry_at(task, stage, error, now_ms())
    }

    /// Schedule another attempt after a retryable failure in `stage`, or
    /// dead-letter the task as `<stage>-exhausted` if it has none left.
    pub fn retry_at(
        &self,
        task: &Task,
        stage: &str,
        error: &str,
        now: i64,
    ) -> Result<RetryDecision, SwitchboardError> {
        let classification = format!("{stage}-exhausted");
        let decision = self.db.immediate(|tx| {
            let Some(current) = leased_task(tx, task)? else {
                return Ok(RetryDecision::LeaseLost);
            };
            if current.is_final_attempt() {
                let dead_letter_id = dead_letter_tx(tx, &current, &classification, error, now)?;
                return Ok(RetryDecision::DeadLettered { dead_letter_id });
            }
            let delay = self.schedule.delay_for(current.attempts.saturating_sub(1));
            let available_at_ms = now.saturating_add(duration_ms(delay));
            tx.execute(
                "UPDATE tasks
                 SET status = 'queued', available_at_ms = ?1, last_error = ?2,
                     lease_token = NULL, leased_until_ms = NULL
                 WHERE id = ?3",
                params![available_at_ms, error, current.id],
            )?;
            Ok(RetryDecision::Scheduled { available_at_ms })
        })?;

        match decision {
            RetryDecision::Scheduled { available_at_ms } => {
                telemetry::record_retry(&task.tenant_id, stage);
                info!(
                    "task {} for {} scheduled for retry in {}ms after {} failure (attempt {}/{})",
                    task.id,
                    task.tenant_id,
                    available_at_ms - now,
                    stage,
                    task.attempts,
                    task.max_attempts
                );
            }
            RetryDecision::DeadLettered { dead_letter_id } => {
                telemetry::record_dead_letter(&task.tenant_id, &classification);
                warn!(
                    "task {} for {} dead-lettered as {} (entry {}): {}",
                    task.id, task.tenant_id, classification, dead_letter_id, error
                );
            }
            RetryDecision::LeaseLost => {
                warn!("task {} lease lost before retry", task.id);
            }
        }
        Ok(decision)
    }

    pub fn defer(&self, task: &Task, delay: Duration, reason: &str) -> Result<bool, SwitchboardError> {
        self.defer_at(task, delay, reason, now_ms())
    }

    /// Put a leased task back without consuming an attempt, e.g. while a
    /// dependency's circuit breaker is open.
    pub fn defer_at(
        &self,
        task: &Task,
        delay: Duration,
        reason: &str,
        now: i64,
    ) -> Result<bool, SwitchboardError> {
        let available_at_ms = now.saturating_add(duration_ms(delay));
        let updated = self.db.immediate(|tx| {
            Ok(tx.execute(
                "UPDATE tasks
                 SET status = 'queued', attempts = MAX(attempts - 1, 0),
                     available_at_ms = ?1, last_error = ?2,
                     lease_token = NULL, leased_until_ms = NULL
                 WHERE id = ?3 AND status = 'leased' AND lease_token = ?4",
                params![available_at_ms, reason, task.id, task.lease_token],
            )?)
        })?;
        if updated == 0 {
            warn!("task {} lease lost before deferral", task.id);
            return Ok(false);
        }
        telemetry::record_deferral(&task.tenant_id);
        debug!(
            "task {} for {} deferred {}ms: {}",
            task.id,
            task.tenant_id,
            duration_ms(delay),
            reason
        );
        Ok(true)
    }

    /// Move a leased task straight to the dead-letter store. Returns the entry
    /// id, or `None` if the lease was lost.
    pub fn dead_letter(
        &self,
        task: &Task,
        classification: &str,
        error: &str,
    ) -> Result<Option<i64>, SwitchboardError> {
        let now = now_ms();
        let id = self.db.immediate(|tx| match leased_task(tx, task)? {
            Some(current) => dead_letter_tx(tx, &current, classification, error, now).map(Some),
            None => Ok(None),
        })?;
        match id {
            Some(id) => {
                telemetry::record_dead_letter(&task.tenant_id, classification);
                warn!(
                    "task {} for {} dead-lettered as {} (entry {}): {}",
                    task.id, task.tenant_id, classification, id, error
                );
            }
            None => warn!("task {} lease lost before dead-lettering", task.id),
        }
        Ok(id)
    }

    /// Re-enqueue a pending dead letter onto the reprocess queue with a fresh
    /// attempt budget. Returns the new task id.
    pub fn requeue_dead_letter(&self, id: i64) -> Result<i64, SwitchboardError> {
        let now = now_ms();
        let max_attempts = self.max_attempts;
        let (task_id, tenant_id) = self.db.immediate(|tx| {
            let entry = tx
                .query_row(
                    &format!("SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE id = ?1"),
                    params![id],
                    dead_letter_from_row,
                )
                .optional()?
                .ok_or_else(|| anyhow::anyhow!("dead letter {id} not found"))?;
            if entry.status != DeadLetterStatus::Pending {
                return Err(anyhow::anyhow!(
                    "dead letter {id} was already requeued as task {}",
                    entry.requeued_task_id.unwrap_or_default()
                )
                .into());
            }
            let task = NewTask {
                tenant_id: entry.tenant_id.clone(),
                recipient: entry.recipient,
                body: entry.body,
                kind: entry.kind,
                correlation_id: entry.correlation_id,
            };
            let task_id = insert_task(tx, QueueName::Reprocess, &task, max_attempts, now)?;
            tx.execute(
                "UPDATE dead_letters SET status = 'requeued', requeued_task_id = ?1 WHERE id = ?2",
                params![task_id, id],
            )?;
            Ok((task_id, entry.tenant_id))
        })?;
        telemetry::record_enqueued(&tenant_id, QueueName::Reprocess.as_str());
        info!("dead letter {} requeued as task {} on reprocess", id, task_id);
        Ok(task_id)
    }

    pub fn list_dead_letters(
        &self,
        status: Option<DeadLetterStatus>,
    ) -> Result<Vec<DeadLetterEntry>, SwitchboardError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id"
        ))?;
        let entries = stmt
            .query_map(params![status.map(DeadLetterStatus::as_str)], dead_letter_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn get(&self, id: i64) -> Result<Option<Task>, SwitchboardError> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?)
    }

    /// Queued plus leased tasks on `queue`. Also published as a gauge.
    pub fn depth(&self, queue: QueueName) -> Result<u64, SwitchboardError> {
        let depth: i64 = self.db.lock().query_row(
            "SELECT COUNT(*) FROM tasks WHERE queue_name = ?1 AND status IN ('queued', 'leased')",
            params![queue.as_str()],
            |row| row.get(0),
        )?;
        let depth = depth as u64;
        telemetry::set_queue_depth(queue.as_str(), depth);
        Ok(depth)
    }
}

fn duration_ms(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

fn insert_task(
    tx: &Transaction<'_>,
    queue: QueueName,
    task: &NewTask,
    max_attempts: u32,
    now: i64,
) -> Result<i64, SwitchboardError> {
    tx.execute(
        "INSERT INTO tasks
             (queue_name, tenant_id, recipient, body, kind, correlation_id,
              status, attempts, max_attempts, enqueued_at_ms, available_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?8, ?8)",
        params![
            queue.as_str(),
            task.tenant_id,
            task.recipient,
            task.body,
            task.kind.as_str(),
            task.correlation_id,
            max_attempts,
            now,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn load_task(tx: &Transaction<'_>, id: i64) -> Result<Option<Task>, SwitchboardError> {
    Ok(tx
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()?)
}

/// Current row for `task`, only if it is still leased under the same token.
fn leased_task(tx: &Transaction<'_>, task: &Task) -> Result<Option<Task>, SwitchboardError> {
    Ok(load_task(tx, task.id)?.filter(|current| {
        current.status == TaskStatus::Leased && current.lease_token == task.lease_token
    }))
}

/// Dead-letter leased tasks whose lease ran out on their final attempt.
/// Returns `(task id, tenant)` pairs.
fn expire_final_leases(
    tx: &Transaction<'_>,
    queue: QueueName,
    now: i64,
) -> Result<Vec<(i64, String)>, SwitchboardError> {
    let stale = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE queue_name = ?1 AND status = 'leased'
               AND leased_until_ms <= ?2 AND attempts >= max_attempts"
        ))?;
        stmt.query_map(params![queue.as_str(), now], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?
    };
    let mut expired = Vec::with_capacity(stale.len());
    for task in stale {
        dead_letter_tx(
            tx,
            &task,
            LEASE_EXPIRED,
            "lease expired on the final attempt",
            now,
        )?;
        expired.push((task.id, task.tenant_id));
    }
    Ok(expired)
}

fn dead_letter_tx(
    tx: &Transaction<'_>,
    task: &Task,
    classification: &str,
    error: &str,
    now: i64,
) -> Result<i64, SwitchboardError> {
    let payload = serde_json::json!({
        "taskId": task.id,
        "queue": task.queue.as_str(),
        "tenant": task.tenant_id,
        "recipient": task.recipient,
        "body": task.body,
        "kind": task.kind,
        "correlationId": task.correlation_id,
        "attempts": task.attempts,
        "maxAttempts": task.max_attempts,
        "enqueuedAtMs": task.enqueued_at_ms,
        "lastError": error,
    })
    .to_string();
    tx.execute(
        "INSERT INTO dead_letters
             (task_id, queue_name, tenant_id, recipient, body, kind, correlation_id,
              attempts, classification, error_detail, payload, status, failed_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12)",
        params![
            task.id,
            task.queue.as_str(),
            task.tenant_id,
            task.recipient,
            task.body,
            task.kind.as_str(),
            task.correlation_id,
            task.attempts,
            classification,
            error,
            payload,
            now,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE tasks
         SET status = 'dead', last_error = ?1, lease_token = NULL, leased_until_ms = NULL
         WHERE id = ?2",
        params![error, task.id],
    )?;
    Ok(id)
}
