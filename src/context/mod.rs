use crate::errors::SwitchboardError;
use crate::storage::{Database, now_ms};
use moka::sync::Cache;
use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "assistant" {
            Self::Assistant
        } else {
            Self::User
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: Role,
    pub body: String,
    pub correlation_id: Option<String>,
    pub created_at_ms: i64,
}

impl ContextMessage {
    pub fn user(body: impl Into<String>, correlation_id: Option<&str>) -> Self {
        Self::new(Role::User, body, correlation_id)
    }

    pub fn assistant(body: impl Into<String>, correlation_id: Option<&str>) -> Self {
        Self::new(Role::Assistant, body, correlation_id)
    }

    fn new(role: Role, body: impl Into<String>, correlation_id: Option<&str>) -> Self {
        Self {
            role,
            body: body.into(),
            correlation_id: correlation_id.map(str::to_string),
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Volatile,
    Durable,
}

/// Recent conversation window, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedContext {
    pub messages: Vec<ContextMessage>,
    pub source: ContextSource,
}

impl MergedContext {
    pub fn from_volatile(&self) -> bool {
        self.source == ContextSource::Volatile
    }
}

/// Fast, lossy tier holding the last few messages per conversation.
///
/// Implementations may be shared between processes (e.g. a network cache);
/// every method may fail and callers treat failures as cache misses.
pub trait VolatileTier: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<ContextMessage>>>;
    fn put(&self, key: &str, window: Vec<ContextMessage>) -> anyhow::Result<()>;
    fn invalidate(&self, key: &str) -> anyhow::Result<()>;
}

/// In-process volatile tier with a per-entry TTL.
pub struct MemoryTier {
    cache: Cache<String, Arc<Vec<ContextMessage>>>,
}

impl MemoryTier {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl VolatileTier for MemoryTier {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<ContextMessage>>> {
        Ok(self.cache.get(key).map(|w| w.as_ref().clone()))
    }

    fn put(&self, key: &str, window: Vec<ContextMessage>) -> anyhow::Result<()> {
        self.cache.insert(key.to_string(), Arc::new(window));
        Ok(())
    }

    fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        self.cache.invalidate(key);
        Ok(())
    }
}

/// Cache-aside conversation store.
///
/// The durable `context_messages` table is the source of truth and is only
/// ever appended to. The volatile tier is always rebuilt from its tail.
pub struct ContextStore {
    db: Arc<Database>,
    volatile: Arc<dyn VolatileTier>,
    max_messages: usize,
}

impl ContextStore {
    pub fn new(db: Arc<Database>, volatile: Arc<dyn VolatileTier>, max_messages: usize) -> Self {
        Self {
            db,
            volatile,
            max_messages,
        }
    }

    fn key(tenant: &str, recipient: &str) -> String {
        format!("{tenant}:{recipient}")
    }

    pub fn load(&self, tenant: &str, recipient: &str) -> Result<MergedContext, SwitchboardError> {
        let key = Self::key(tenant, recipient);
        match self.volatile.get(&key) {
            Ok(Some(messages)) => {
                return Ok(MergedContext {
                    messages,
                    source: ContextSource::Volatile,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("volatile context read failed for {tenant}: {e}"),
        }

        let messages = self.durable_tail(tenant, recipient)?;
        if let Err(e) = self.volatile.put(&key, messages.clone()) {
            warn!("volatile context repopulate failed for {tenant}: {e}");
        }
        Ok(MergedContext {
            messages,
            source: ContextSource::Durable,
        })
    }

    pub fn append(
        &self,
        tenant: &str,
        recipient: &str,
        message: &ContextMessage,
    ) -> Result<(), SwitchboardError> {
        self.append_all(tenant, recipient, std::slice::from_ref(message))
    }

    /// Durably insert `messages` in order, then refresh the volatile tier.
    ///
    /// Durable errors propagate; volatile errors are logged only.
    pub fn append_all(
        &self,
        tenant: &str,
        recipient: &str,
        messages: &[ContextMessage],
    ) -> Result<(), SwitchboardError> {
        self.db.immediate(|tx| {
            for message in messages {
                tx.execute(
                    "INSERT INTO context_messages
                         (tenant_id, recipient, role, body, correlation_id, created_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        tenant,
                        recipient,
                        message.role.as_str(),
                        message.body,
                        message.correlation_id,
                        message.created_at_ms,
                    ],
                )?;
            }
            Ok(())
        })?;
        debug!("appended {} context message(s) for {tenant}", messages.len());

        let key = Self::key(tenant, recipient);
        match self.durable_tail(tenant, recipient) {
            Ok(window) => {
                if let Err(e) = self.volatile.put(&key, window) {
                    warn!("volatile context update failed for {tenant}: {e}");
                }
            }
            Err(e) => {
                warn!("could not rebuild volatile context for {tenant}: {e}");
                let _ = self.volatile.invalidate(&key);
            }
        }
        Ok(())
    }

    /// Drop the volatile entry. The durable history is untouched.
    pub fn flush(&self, tenant: &str, recipient: &str) -> Result<(), SwitchboardError> {
        self.volatile
            .invalidate(&Self::key(tenant, recipient))
            .map_err(SwitchboardError::Internal)
    }

    fn durable_tail(
        &self,
        tenant: &str,
        recipient: &str,
    ) -> Result<Vec<ContextMessage>, SwitchboardError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT role, body, correlation_id, created_at_ms FROM context_messages
             WHERE tenant_id = ?1 AND recipient = ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let mut messages = stmt
            .query_map(
                params![tenant, recipient, self.max_messages as i64],
                |row| {
                    let role: String = row.get(0)?;
                    Ok(ContextMessage {
                        role: Role::parse(&role),
                        body: row.get(1)?,
                        correlation_id: row.get(2)?,
                        created_at_ms: row.get(3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests;
