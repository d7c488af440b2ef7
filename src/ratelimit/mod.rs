use crate::errors::SwitchboardError;
use crate::storage::{Database, now_ms};
use rusqlite::{Transaction, params};
use std::sync::Arc;
use tracing::debug;

/// Which identity tripped the limiter. The string codes are stable and used
/// as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    Address,
    Sender,
}

impl RateLimitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Address => "rate_limited_ip",
            Self::Sender => "rate_limited_number",
        }
    }
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-window quotas for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub per_address: u32,
    pub per_sender: u32,
}

/// Sliding-window log limiter backed by the shared store.
///
/// Each accepted request is one row in `rate_limit_hits`. Pruning, counting
/// and insertion run in a single IMMEDIATE transaction so concurrent
/// processes cannot over-admit. Rejections write nothing.
pub struct RateLimiter {
    db: Arc<Database>,
    window_ms: i64,
}

impl RateLimiter {
    pub fn new(db: Arc<Database>, window_secs: u64) -> Self {
        Self {
            db,
            window_ms: i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
        }
    }

    /// Admit `cost` units against `key` if the window has room under `limit`.
    pub fn allow(&self, key: &str, limit: u32, cost: u32) -> Result<bool, SwitchboardError> {
        self.allow_at(key, limit, cost, now_ms())
    }

    pub fn allow_at(
        &self,
        key: &str,
        limit: u32,
        cost: u32,
        now: i64,
    ) -> Result<bool, SwitchboardError> {
        self.db
            .immediate(|tx| self.admit(tx, &[(key, limit)], cost, now))
            .map(|rejected| rejected.is_none())
    }

    /// Check both the source-address and sender quotas for `tenant`.
    ///
    /// Both keys are admitted together or not at all.
    pub fn check(
        &self,
        tenant: &str,
        quotas: Quotas,
        address: &str,
        sender: &str,
    ) -> Result<(), SwitchboardError> {
        self.check_at(tenant, quotas, address, sender, now_ms())
    }

    pub fn check_at(
        &self,
        tenant: &str,
        quotas: Quotas,
        address: &str,
        sender: &str,
        now: i64,
    ) -> Result<(), SwitchboardError> {
        let address_key = address_key(tenant, address);
        let sender_key = sender_key(tenant, sender);
        let rejected = self.db.immediate(|tx| {
            self.admit(
                tx,
                &[
                    (address_key.as_str(), quotas.per_address),
                    (sender_key.as_str(), quotas.per_sender),
                ],
                1,
                now,
            )
        })?;
        match rejected {
            None => Ok(()),
            Some(0) => Err(SwitchboardError::RateLimited(RateLimitReason::Address)),
            Some(_) => Err(SwitchboardError::RateLimited(RateLimitReason::Sender)),
        }
    }

    /// Returns the index of the first key over quota, or `None` after recording
    /// a hit on every key.
    fn admit(
        &self,
        tx: &Transaction<'_>,
        keys: &[(&str, u32)],
        cost: u32,
        now: i64,
    ) -> Result<Option<usize>, SwitchboardError> {
        let window_start = now - self.window_ms;
        let pruned = tx.execute(
            "DELETE FROM rate_limit_hits WHERE hit_at_ms <= ?1",
            params![window_start],
        )?;
        if pruned > 0 {
            debug!("pruned {} expired rate limit hits", pruned);
        }

        for (idx, (key, limit)) in keys.iter().enumerate() {
            let used: i64 = tx.query_row(
                "SELECT COALESCE(SUM(cost), 0) FROM rate_limit_hits
                 WHERE key = ?1 AND hit_at_ms > ?2",
                params![key, window_start],
                |row| row.get(0),
            )?;
            if used + i64::from(cost) > i64::from(*limit) {
                return Ok(Some(idx));
            }
        }

        for (key, _) in keys {
            tx.execute(
                "INSERT INTO rate_limit_hits (key, hit_at_ms, cost) VALUES (?1, ?2, ?3)",
                params![key, now, cost],
            )?;
        }
        Ok(None)
    }
}

pub fn address_key(tenant: &str, address: &str) -> String {
    format!("{tenant}:ip:{address}")
}

pub fn sender_key(tenant: &str, sender: &str) -> String {
    format!("{tenant}:num:{sender}")
}
