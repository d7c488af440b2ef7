//! Queue workers: lease, process, repeat until shutdown.

use crate::config::WorkersConfig;
use crate::errors::SwitchboardError;
use crate::pipeline::{Pipeline, TaskOutcome};
use crate::queue::QueueName;
use crate::storage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    config: WorkersConfig,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, config: WorkersConfig) -> Self {
        Self { pipeline, config }
    }

    /// Spawn the primary and reprocess workers. Each stops after finishing
    /// its current task once `shutdown` flips to `true`.
    pub fn spawn(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let lanes = [
            (QueueName::Primary, self.config.primary),
            (QueueName::Reprocess, self.config.reprocess),
        ];

        let mut handles = Vec::new();
        for (queue, count) in lanes {
            for index in 0..count {
                let pipeline = self.pipeline.clone();
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move {
                    run_worker(pipeline, queue, index, poll, shutdown).await;
                }));
            }
        }
        info!(
            "started {} primary and {} reprocess worker(s), polling every {}ms",
            self.config.primary,
            self.config.reprocess,
            poll.as_millis()
        );
        handles
    }
}

async fn run_worker(
    pipeline: Arc<Pipeline>,
    queue: QueueName,
    index: usize,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("{} worker {} started", queue, index);
    loop {
        if *shutdown.borrow() {
            break;
        }

        match process_next(&pipeline, queue).await {
            Ok(Some(outcome)) => {
                debug!("{} worker {}: {:?}", queue, index, outcome);
                continue;
            }
            Ok(None) => {
                if let Err(e) = pipeline.queue().depth(queue) {
                    error!("failed to read {} queue depth: {}", queue, e);
                }
            }
            Err(e) => error!("{} worker {} failed: {}", queue, index, e),
        }

        tokio::select! {
            () = tokio::time::sleep(poll) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("{} worker {} stopped", queue, index);
}

/// Lease and process one ready task. `None` when the queue has nothing ready.
pub async fn process_next(
    pipeline: &Pipeline,
    queue: QueueName,
) -> Result<Option<TaskOutcome>, SwitchboardError> {
    let tasks = pipeline.queue().clone();
    let Some(task) = storage::blocking(move || tasks.lease(queue)).await? else {
        return Ok(None);
    };
    pipeline.process(task).await.map(Some)
}

/// Process tasks until none is ready. Used by the one-shot `worker` command.
pub async fn drain(
    pipeline: &Pipeline,
    queue: QueueName,
) -> Result<Vec<TaskOutcome>, SwitchboardError> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = process_next(pipeline, queue).await? {
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests;
