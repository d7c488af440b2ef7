//! Metric registration and recording helpers.
//!
//! Everything goes through the `metrics` facade; `install` wires up the
//! Prometheus recorder whose handle backs `GET /metrics`.

use crate::breaker::{BreakerMode, Dependency};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder globally and register metric descriptions.
///
/// Only one recorder can be installed per process.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    register_metrics();
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Register all switchboard metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "switchboard_webhook_received_total",
        "Inbound webhook requests by tenant and outcome"
    );
    describe_counter!(
        "switchboard_tasks_enqueued_total",
        "Tasks written to the queue"
    );
    describe_counter!(
        "switchboard_tasks_completed_total",
        "Tasks that finished successfully"
    );
    describe_counter!(
        "switchboard_task_retries_total",
        "Task attempts rescheduled after a retryable failure"
    );
    describe_counter!(
        "switchboard_task_deferrals_total",
        "Tasks deferred without consuming an attempt"
    );
    describe_counter!(
        "switchboard_dead_letters_total",
        "Tasks moved to the dead-letter store"
    );
    describe_gauge!("switchboard_queue_depth", "Queued or leased tasks per queue");
    describe_counter!(
        "switchboard_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "switchboard_breaker_short_circuits_total",
        "Calls rejected by an open circuit breaker"
    );
    describe_gauge!(
        "switchboard_breaker_open",
        "1 while a circuit breaker is open or half-open"
    );
    describe_histogram!(
        "switchboard_dependency_latency_seconds",
        "Latency of generation and delivery provider calls"
    );
    describe_counter!(
        "switchboard_dependency_calls_total",
        "Provider calls by dependency and outcome"
    );
    describe_counter!(
        "switchboard_safety_blocks_total",
        "Inbound messages blocked by the prompt guard"
    );
    describe_counter!(
        "switchboard_fallback_replies_total",
        "Replies served from a template instead of the generation provider"
    );
    describe_counter!(
        "switchboard_deliveries_total",
        "Delivery attempts by final status"
    );
}

pub fn record_webhook(tenant: &str, status: &str) {
    metrics::counter!(
        "switchboard_webhook_received_total",
        "tenant" => tenant.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_enqueued(tenant: &str, queue: &str) {
    metrics::counter!(
        "switchboard_tasks_enqueued_total",
        "tenant" => tenant.to_string(),
        "queue" => queue.to_string()
    )
    .increment(1);
}

pub fn record_completed(tenant: &str) {
    metrics::counter!("switchboard_tasks_completed_total", "tenant" => tenant.to_string())
        .increment(1);
}

pub fn record_retry(tenant: &str, stage: &str) {
    metrics::counter!(
        "switchboard_task_retries_total",
        "tenant" => tenant.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

pub fn record_deferral(tenant: &str) {
    metrics::counter!("switchboard_task_deferrals_total", "tenant" => tenant.to_string())
        .increment(1);
}

pub fn record_dead_letter(tenant: &str, classification: &str) {
    metrics::counter!(
        "switchboard_dead_letters_total",
        "tenant" => tenant.to_string(),
        "classification" => classification.to_string()
    )
    .increment(1);
}

pub fn set_queue_depth(queue: &str, depth: u64) {
    metrics::gauge!("switchboard_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

pub fn record_breaker_transition(
    dependency: Dependency,
    scope: &str,
    from: BreakerMode,
    to: BreakerMode,
) {
    metrics::counter!(
        "switchboard_breaker_transitions_total",
        "dependency" => dependency.as_str(),
        "tenant" => scope.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    let open = if to == BreakerMode::Closed { 0.0 } else { 1.0 };
    metrics::gauge!(
        "switchboard_breaker_open",
        "dependency" => dependency.as_str(),
        "tenant" => scope.to_string()
    )
    .set(open);
}

pub fn record_breaker_short_circuit(dependency: Dependency, scope: &str) {
    metrics::counter!(
        "switchboard_breaker_short_circuits_total",
        "dependency" => dependency.as_str(),
        "tenant" => scope.to_string()
    )
    .increment(1);
}

/// Record one provider call. `outcome` is `ok`, `transient` or `permanent`.
pub fn record_dependency_call(dependency: Dependency, tenant: &str, outcome: &str, seconds: f64) {
    metrics::histogram!(
        "switchboard_dependency_latency_seconds",
        "dependency" => dependency.as_str(),
        "tenant" => tenant.to_string()
    )
    .record(seconds);
    metrics::counter!(
        "switchboard_dependency_calls_total",
        "dependency" => dependency.as_str(),
        "tenant" => tenant.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_safety_block(tenant: &str, category: &str) {
    metrics::counter!(
        "switchboard_safety_blocks_total",
        "tenant" => tenant.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn record_fallback(tenant: &str, reason: &str) {
    metrics::counter!(
        "switchboard_fallback_replies_total",
        "tenant" => tenant.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_delivery(tenant: &str, status: &str) {
    metrics::counter!(
        "switchboard_deliveries_total",
        "tenant" => tenant.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_render_with_prefix_and_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            record_webhook("acme", "accepted");
            record_webhook("acme", "accepted");
            record_breaker_short_circuit(Dependency::Delivery, "acme");
            record_dependency_call(Dependency::Generation, "acme", "ok", 0.25);
        });

        let rendered = handle.render();
        let line = rendered
            .lines()
            .find(|l| l.starts_with("switchboard_webhook_received_total{"))
            .expect("webhook counter rendered");
        assert!(line.contains("tenant=\"acme\""));
        assert!(line.contains("status=\"accepted\""));
        assert!(line.ends_with(" 2"));
        assert!(rendered.contains("switchboard_breaker_short_circuits_total"));
        assert!(rendered.contains("switchboard_dependency_latency_seconds"));
    }
}
