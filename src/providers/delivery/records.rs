use crate::errors::SwitchboardError;
use crate::storage::Database;
use rusqlite::{OptionalExtension, Row, params};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    FailedTemporary,
    FailedPermanent,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::FailedTemporary => "failed_temporary",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "failed_permanent" => Self::FailedPermanent,
            _ => Self::FailedTemporary,
        }
    }
}

/// One delivery attempt. Rows are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub id: i64,
    pub task_id: i64,
    pub tenant_id: String,
    pub recipient: String,
    pub idempotency_key: String,
    pub external_id: Option<String>,
    pub status: DeliveryStatus,
    pub latency_ms: i64,
    pub attempt: u32,
    pub error_detail: Option<String>,
    pub created_at_ms: i64,
    /// Text handed to the provider on this attempt.
    pub body: String,
}

const COLUMNS: &str = "id, task_id, tenant_id, recipient, idempotency_key, external_id, \
                       status, latency_ms, attempt, error_detail, created_at_ms, body";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let status: String = row.get(6)?;
    Ok(DeliveryRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        tenant_id: row.get(2)?,
        recipient: row.get(3)?,
        idempotency_key: row.get(4)?,
        external_id: row.get(5)?,
        status: DeliveryStatus::parse(&status),
        latency_ms: row.get(7)?,
        attempt: row.get(8)?,
        error_detail: row.get(9)?,
        created_at_ms: row.get(10)?,
        body: row.get(11)?,
    })
}

/// Append-only log of delivery attempts in the shared store.
///
/// A partial unique index allows at most one `sent` row per idempotency key.
pub struct DeliveryLog {
    db: Arc<Database>,
}

impl DeliveryLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn find_sent(&self, idempotency_key: &str) -> Result<Option<DeliveryRecord>, SwitchboardError> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM delivery_records
                     WHERE idempotency_key = ?1 AND status = 'sent'"
                ),
                params![idempotency_key],
                from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Append `record` (its `id` is ignored) and return the stored row.
    ///
    /// Appending a second `sent` row for a key is a no-op that returns the
    /// existing one, so concurrent deliveries converge on a single record.
    pub fn append(&self, record: &DeliveryRecord) -> Result<DeliveryRecord, SwitchboardError> {
        self.db.immediate(|tx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO delivery_records
                     (task_id, tenant_id, recipient, idempotency_key, external_id,
                      status, latency_ms, attempt, error_detail, created_at_ms, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.task_id,
                    record.tenant_id,
                    record.recipient,
                    record.idempotency_key,
                    record.external_id,
                    record.status.as_str(),
                    record.latency_ms,
                    record.attempt,
                    record.error_detail,
                    record.created_at_ms,
                    record.body,
                ],
            )?;
            if inserted == 0 {
                let existing = tx.query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM delivery_records
                         WHERE idempotency_key = ?1 AND status = 'sent'"
                    ),
                    params![record.idempotency_key],
                    from_row,
                )?;
                return Ok(existing);
            }
            Ok(DeliveryRecord {
                id: tx.last_insert_rowid(),
                ..record.clone()
            })
        })
    }

    pub fn for_task(&self, task_id: i64) -> Result<Vec<DeliveryRecord>, SwitchboardError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM delivery_records WHERE task_id = ?1 ORDER BY id"
        ))?;
        let records = stmt
            .query_map(params![task_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_sent(&self, idempotency_key: &str) -> Result<u64, SwitchboardError> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM delivery_records WHERE idempotency_key = ?1 AND status = 'sent'",
            params![idempotency_key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
