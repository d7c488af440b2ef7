//! Per-task processing: context, generation, delivery, bookkeeping.

use crate::context::{ContextMessage, ContextStore};
use crate::errors::SwitchboardError;
use crate::providers::{DeliveryClient, GenerationClient, Outbound};
use crate::queue::{PERMANENT_FAILURE, RetryDecision, Task, TaskQueue};
use crate::security::mask_phone;
use crate::tenants::TenantRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

/// Where a task ended up after one pass through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Retried(RetryDecision),
    Deferred,
    DeadLettered,
    LeaseLost,
}

/// A failure tagged with the pipeline stage it happened in. The stage names
/// the dead-letter classification (`<stage>-exhausted`, `<stage>-rejected`).
#[derive(Debug)]
struct StageError {
    stage: &'static str,
    error: SwitchboardError,
}

trait AtStage<T> {
    fn at(self, stage: &'static str) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, SwitchboardError> {
    fn at(self, stage: &'static str) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

pub struct Pipeline {
    tenants: Arc<TenantRegistry>,
    queue: Arc<TaskQueue>,
    context: Arc<ContextStore>,
    generation: Arc<GenerationClient>,
    delivery: Arc<DeliveryClient>,
}

impl Pipeline {
    pub fn new(
        tenants: Arc<TenantRegistry>,
        queue: Arc<TaskQueue>,
        context: Arc<ContextStore>,
        generation: Arc<GenerationClient>,
        delivery: Arc<DeliveryClient>,
    ) -> Self {
        Self {
            tenants,
            queue,
            context,
            generation,
            delivery,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Run one leased task to a queue transition.
    ///
    /// Only failures of the queue transition itself are returned; everything
    /// else is settled through retry, deferral or dead-lettering.
    pub async fn process(&self, task: Task) -> Result<TaskOutcome, SwitchboardError> {
        let span = info_span!(
            "task",
            tenant = %task.tenant_id,
            correlation_id = %task.correlation_id,
            task_id = task.id,
            attempt = task.attempts,
        );
        async move {
            match self.run(&task).await {
                Ok(()) => {
                    if self.queue.complete(&task)? {
                        Ok(TaskOutcome::Completed)
                    } else {
                        Ok(TaskOutcome::LeaseLost)
                    }
                }
                Err(failure) => self.settle(&task, failure),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, task: &Task) -> Result<(), StageError> {
        let Some(tenant) = self.tenants.get(&task.tenant_id) else {
            return Err(StageError {
                stage: "tenant",
                error: SwitchboardError::Config(format!(
                    "tenant '{}' is not configured or disabled",
                    task.tenant_id
                )),
            });
        };

        let history = self
            .context
            .load(&tenant.id, &task.recipient)
            .at("context")?;
        debug!(
            "loaded {} context message(s) from {:?} tier",
            history.messages.len(),
            history.source
        );

        let record = match self
            .delivery
            .already_sent(&tenant.id, &task.recipient, &task.correlation_id)
            .at("delivery")?
        {
            Some(record) => {
                info!(
                    "reply already delivered (record {}), finishing bookkeeping only",
                    record.id
                );
                record
            }
            None => {
                let generated = self
                    .generation
                    .generate(&tenant, &history.messages, &task.body)
                    .await
                    .at("generation")?;
                debug!("reply source: {:?}", generated.source);

                self.delivery
                    .deliver(Outbound {
                        task_id: task.id,
                        tenant_id: &tenant.id,
                        recipient: &task.recipient,
                        body: &generated.text,
                        correlation_id: &task.correlation_id,
                    })
                    .await
                    .at("delivery")?
            }
        };

        // The assistant turn is the text the recipient actually received.
        self.context
            .append_all(
                &tenant.id,
                &task.recipient,
                &[
                    ContextMessage::user(task.body.as_str(), Some(&task.correlation_id)),
                    ContextMessage::assistant(record.body.as_str(), Some(&task.correlation_id)),
                ],
            )
            .at("context")?;

        info!(
            "reply delivered to {} (record {}, attempt {})",
            mask_phone(&task.recipient),
            record.id,
            record.attempt
        );
        Ok(())
    }

    fn settle(&self, task: &Task, failure: StageError) -> Result<TaskOutcome, SwitchboardError> {
        let StageError { stage, error } = failure;
        let detail = error.to_string();

        if let SwitchboardError::BreakerOpen { remaining_secs, .. } = error {
            let delay = Duration::from_secs(remaining_secs.max(1));
            info!("{} breaker open, deferring task {}s", stage, delay.as_secs());
            return Ok(if self.queue.defer(task, delay, &detail)? {
                TaskOutcome::Deferred
            } else {
                TaskOutcome::LeaseLost
            });
        }

        if error.is_retryable() {
            warn!("{} failed ({}): {}", stage, error.kind(), detail);
            let decision = self.queue.retry(task, stage, &detail)?;
            return Ok(match decision {
                RetryDecision::LeaseLost => TaskOutcome::LeaseLost,
                RetryDecision::DeadLettered { .. } => TaskOutcome::DeadLettered,
                RetryDecision::Scheduled { .. } => TaskOutcome::Retried(decision),
            });
        }

        let classification = match error {
            SwitchboardError::PermanentDependency { .. } => format!("{stage}-rejected"),
            _ => PERMANENT_FAILURE.to_string(),
        };
        warn!("{} failed permanently ({}): {}", stage, classification, detail);
        Ok(match self.queue.dead_letter(task, &classification, &detail)? {
            Some(_) => TaskOutcome::DeadLettered,
            None => TaskOutcome::LeaseLost,
        })
    }
}
