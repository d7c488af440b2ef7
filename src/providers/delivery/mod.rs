mod http;
mod records;

pub use http::{HttpDeliveryProvider, IDEMPOTENCY_HEADER};
pub use records::{DeliveryLog, DeliveryRecord, DeliveryStatus};

use crate::backoff::BackoffSchedule;
use crate::breaker::{CircuitBreaker, Dependency};
use crate::config::DeliveryConfig;
use crate::errors::SwitchboardError;
use crate::security::mask_phone;
use crate::storage::now_ms;
use crate::telemetry;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub recipient: &'a str,
    pub body: &'a str,
    pub idempotency_key: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub external_id: Option<String>,
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(&self, request: DeliveryRequest<'_>) -> Result<DeliveryReceipt, SwitchboardError>;
}

/// Stable key for one logical reply: the same tenant, recipient and
/// correlation id always map to the same key, however many times the task is
/// replayed.
pub fn idempotency_key(tenant_id: &str, recipient: &str, correlation_id: &str) -> String {
    let digest = Sha256::digest(format!("{tenant_id}:{recipient}:{correlation_id}").as_bytes());
    hex::encode(digest)
}

/// What to deliver, and for which task.
#[derive(Debug, Clone, Copy)]
pub struct Outbound<'a> {
    pub task_id: i64,
    pub tenant_id: &'a str,
    pub recipient: &'a str,
    pub body: &'a str,
    pub correlation_id: &'a str,
}

impl Outbound<'_> {
    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.tenant_id, self.recipient, self.correlation_id)
    }
}

pub struct DeliveryClient {
    provider: Arc<dyn DeliveryProvider>,
    breaker: Arc<CircuitBreaker>,
    log: DeliveryLog,
    attempts: u32,
    backoff: BackoffSchedule,
}

impl DeliveryClient {
    pub fn new(
        provider: Arc<dyn DeliveryProvider>,
        breaker: Arc<CircuitBreaker>,
        log: DeliveryLog,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            provider,
            breaker,
            log,
            attempts: config.retry_attempts.max(1),
            backoff: BackoffSchedule::from_millis(&config.retry_backoff_ms),
        }
    }

    pub fn log(&self) -> &DeliveryLog {
        &self.log
    }

    /// The `sent` record for this reply, if an earlier pass already delivered it.
    pub fn already_sent(
        &self,
        tenant_id: &str,
        recipient: &str,
        correlation_id: &str,
    ) -> Result<Option<DeliveryRecord>, SwitchboardError> {
        self.log
            .find_sent(&idempotency_key(tenant_id, recipient, correlation_id))
    }

    /// Send `outbound` unless it was already sent, and return the `sent` record.
    ///
    /// Errors: `BreakerOpen` when the breaker refused the first attempt and
    /// nothing reached the provider, `TransientDependency` once the retry
    /// budget is spent or the breaker opens after an attempt was made,
    /// `PermanentDependency` on the first rejection.
    pub async fn deliver(&self, outbound: Outbound<'_>) -> Result<DeliveryRecord, SwitchboardError> {
        let key = outbound.idempotency_key();
        if let Some(existing) = self.log.find_sent(&key)? {
            info!(
                "reply for {} to {} already delivered (record {}), skipping send",
                outbound.correlation_id,
                mask_phone(outbound.recipient),
                existing.id
            );
            return Ok(existing);
        }

        let request = DeliveryRequest {
            recipient: outbound.recipient,
            body: outbound.body,
            idempotency_key: &key,
        };

        let mut last_error = String::new();
        let mut made = 0;
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                let delay = self.backoff.delay_for(attempt - 2);
                debug!(
                    "retrying delivery for {} in {}ms (attempt {}/{})",
                    outbound.tenant_id,
                    delay.as_millis(),
                    attempt,
                    self.attempts
                );
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let result = self
                .breaker
                .call(outbound.tenant_id, || self.provider.send(request))
                .await;
            let elapsed = started.elapsed();
            let latency_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

            let record = |status: DeliveryStatus,
                          external_id: Option<String>,
                          error_detail: Option<String>| DeliveryRecord {
                id: 0,
                task_id: outbound.task_id,
                tenant_id: outbound.tenant_id.to_string(),
                recipient: outbound.recipient.to_string(),
                idempotency_key: key.clone(),
                external_id,
                status,
                latency_ms,
                attempt,
                error_detail,
                created_at_ms: now_ms(),
                body: outbound.body.to_string(),
            };

            if !matches!(result, Err(SwitchboardError::BreakerOpen { .. })) {
                made += 1;
            }
            match result {
                Ok(receipt) => {
                    telemetry::record_dependency_call(
                        Dependency::Delivery,
                        outbound.tenant_id,
                        "ok",
                        elapsed.as_secs_f64(),
                    );
                    telemetry::record_delivery(outbound.tenant_id, DeliveryStatus::Sent.as_str());
                    let stored = self
                        .log
                        .append(&record(DeliveryStatus::Sent, receipt.external_id, None))?;
                    info!(
                        "delivered reply to {} for {} in {}ms",
                        mask_phone(outbound.recipient),
                        outbound.tenant_id,
                        latency_ms
                    );
                    return Ok(stored);
                }
                Err(e @ SwitchboardError::BreakerOpen { .. }) if made == 0 => return Err(e),
                Err(SwitchboardError::BreakerOpen { .. }) => {
                    debug!(
                        "delivery breaker opened for {} after {} attempt(s), giving up this pass",
                        outbound.tenant_id, made
                    );
                    break;
                }
                Err(e @ SwitchboardError::Storage(_)) => return Err(e),
                Err(e @ SwitchboardError::PermanentDependency { .. }) => {
                    telemetry::record_dependency_call(
                        Dependency::Delivery,
                        outbound.tenant_id,
                        "permanent",
                        elapsed.as_secs_f64(),
                    );
                    telemetry::record_delivery(
                        outbound.tenant_id,
                        DeliveryStatus::FailedPermanent.as_str(),
                    );
                    self.log.append(&record(
                        DeliveryStatus::FailedPermanent,
                        None,
                        Some(e.to_string()),
                    ))?;
                    warn!(
                        "delivery to {} rejected for {}: {}",
                        mask_phone(outbound.recipient),
                        outbound.tenant_id,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    telemetry::record_dependency_call(
                        Dependency::Delivery,
                        outbound.tenant_id,
                        "transient",
                        elapsed.as_secs_f64(),
                    );
                    telemetry::record_delivery(
                        outbound.tenant_id,
                        DeliveryStatus::FailedTemporary.as_str(),
                    );
                    self.log.append(&record(
                        DeliveryStatus::FailedTemporary,
                        None,
                        Some(e.to_string()),
                    ))?;
                    warn!(
                        "delivery attempt {}/{} to {} failed for {}: {}",
                        attempt,
                        self.attempts,
                        mask_phone(outbound.recipient),
                        outbound.tenant_id,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(SwitchboardError::transient(
            Dependency::Delivery,
            format!("delivery failed after {} attempt(s): {}", made, last_error),
        ))
    }
}
