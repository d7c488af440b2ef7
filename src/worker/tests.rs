use super::*;
use crate::breaker::{CircuitBreaker, Dependency};
use crate::config::Config;
use crate::context::{ContextStore, MemoryTier};
use crate::payload::MessageKind;
use crate::providers::{
    DeliveryClient, DeliveryLog, DeliveryProvider, DeliveryReceipt, DeliveryRequest,
    GenerationClient, GenerationProvider, GenerationRequest,
};
use crate::queue::{NewTask, TaskQueue};
use crate::storage::Database;
use crate::tenants::TenantRegistry;
use async_trait::async_trait;
use std::sync::Mutex;

struct StaticGeneration;

#[async_trait]
impl GenerationProvider for StaticGeneration {
    async fn generate(&self, _request: GenerationRequest<'_>) -> Result<String, SwitchboardError> {
        Ok("Thanks for reaching out!".into())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DeliveryProvider for RecordingDelivery {
    async fn send(&self, request: DeliveryRequest<'_>) -> Result<DeliveryReceipt, SwitchboardError> {
        self.sent
            .lock()
            .unwrap()
            .push((request.recipient.to_string(), request.body.to_string()));
        Ok(DeliveryReceipt::default())
    }
}

fn pipeline(delivery: Arc<RecordingDelivery>) -> Arc<Pipeline> {
    let mut config = Config::default();
    config.tenants.insert(
        "acme".into(),
        serde_json::from_value(serde_json::json!({"domain": "acme.example.com"})).unwrap(),
    );
    let db = Arc::new(Database::open_in_memory().unwrap());
    let breaker = |dependency| {
        Arc::new(CircuitBreaker::new(
            db.clone(),
            dependency,
            Default::default(),
        ))
    };
    Arc::new(Pipeline::new(
        Arc::new(TenantRegistry::from_config(&config)),
        Arc::new(TaskQueue::new(db.clone(), &config.queue)),
        Arc::new(ContextStore::new(
            db.clone(),
            Arc::new(MemoryTier::new(Duration::from_secs(600), 100)),
            5,
        )),
        Arc::new(GenerationClient::new(
            Arc::new(StaticGeneration),
            breaker(Dependency::Generation),
            &config.generation,
        )),
        Arc::new(DeliveryClient::new(
            delivery,
            breaker(Dependency::Delivery),
            DeliveryLog::new(db.clone()),
            &config.delivery,
        )),
    ))
}

fn new_task(body: &str, queue_hint: &str) -> NewTask {
    NewTask {
        tenant_id: "acme".into(),
        recipient: "5511999990000".into(),
        body: body.into(),
        kind: MessageKind::Text,
        correlation_id: format!("{queue_hint}-{body}"),
    }
}

#[tokio::test]
async fn test_drain_processes_every_ready_task() {
    let delivery = Arc::new(RecordingDelivery::default());
    let pipeline = pipeline(delivery.clone());
    for body in ["one", "two"] {
        pipeline
            .queue()
            .enqueue(QueueName::Primary, &new_task(body, "p"))
            .unwrap();
    }

    let outcomes = drain(&pipeline, QueueName::Primary).await.unwrap();
    assert_eq!(outcomes, [TaskOutcome::Completed, TaskOutcome::Completed]);
    assert_eq!(delivery.sent.lock().unwrap().len(), 2);
    assert!(process_next(&pipeline, QueueName::Primary).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pool_serves_both_queues_and_stops_on_shutdown() {
    let delivery = Arc::new(RecordingDelivery::default());
    let pipeline = pipeline(delivery.clone());
    pipeline
        .queue()
        .enqueue(QueueName::Primary, &new_task("hello", "p"))
        .unwrap();
    pipeline
        .queue()
        .enqueue(QueueName::Reprocess, &new_task("again", "r"))
        .unwrap();

    let pool = WorkerPool::new(
        pipeline.clone(),
        WorkersConfig {
            primary: 2,
            reprocess: 1,
            poll_interval_ms: 10,
        },
    );
    let (tx, rx) = watch::channel(false);
    let handles = pool.spawn(&rx);
    assert_eq!(handles.len(), 3);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while delivery.sent.lock().unwrap().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "workers did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(pipeline.queue().depth(QueueName::Primary).unwrap(), 0);
    assert_eq!(pipeline.queue().depth(QueueName::Reprocess).unwrap(), 0);
}
