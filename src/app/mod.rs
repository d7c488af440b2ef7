//! Wiring: builds every long-lived component from a validated `Config`.

use crate::breaker::{CircuitBreaker, Dependency};
use crate::config::Config;
use crate::context::{ContextStore, MemoryTier};
use crate::gateway::GatewayState;
use crate::pipeline::Pipeline;
use crate::providers::{
    DeliveryClient, DeliveryLog, GeminiProvider, GenerationClient, HttpDeliveryProvider,
};
use crate::queue::TaskQueue;
use crate::ratelimit::RateLimiter;
use crate::storage::Database;
use crate::tenants::TenantRegistry;
use crate::worker::WorkerPool;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Components {
    pub db: Arc<Database>,
    pub tenants: Arc<TenantRegistry>,
    pub queue: Arc<TaskQueue>,
    pub context: Arc<ContextStore>,
    pub generation_breaker: Arc<CircuitBreaker>,
    pub delivery_breaker: Arc<CircuitBreaker>,
    pub delivery: Arc<DeliveryClient>,
    pub pipeline: Arc<Pipeline>,
    pub gateway: GatewayState,
    pub workers: WorkerPool,
}

impl Components {
    /// Open the configured database file and build everything on top of it.
    pub fn open(config: &Config, metrics: Option<PrometheusHandle>) -> Result<Self> {
        let path = config.database_path()?;
        let db = Database::open(&path)?;
        Ok(Self::build(config, Arc::new(db), metrics))
    }

    pub fn build(config: &Config, db: Arc<Database>, metrics: Option<PrometheusHandle>) -> Self {
        let tenants = Arc::new(TenantRegistry::from_config(config));
        let queue = Arc::new(TaskQueue::new(db.clone(), &config.queue));
        let context = Arc::new(ContextStore::new(
            db.clone(),
            Arc::new(MemoryTier::new(
                Duration::from_secs(config.context.ttl_secs),
                config.context.cache_capacity,
            )),
            config.context.max_messages,
        ));

        let generation_breaker = Arc::new(CircuitBreaker::new(
            db.clone(),
            Dependency::Generation,
            config.breaker.generation.clone(),
        ));
        let delivery_breaker = Arc::new(CircuitBreaker::new(
            db.clone(),
            Dependency::Delivery,
            config.breaker.delivery.clone(),
        ));

        let generation = Arc::new(GenerationClient::new(
            Arc::new(GeminiProvider::new(&config.generation)),
            generation_breaker.clone(),
            &config.generation,
        ));
        let delivery = Arc::new(DeliveryClient::new(
            Arc::new(HttpDeliveryProvider::new(&config.delivery)),
            delivery_breaker.clone(),
            DeliveryLog::new(db.clone()),
            &config.delivery,
        ));

        let pipeline = Arc::new(Pipeline::new(
            tenants.clone(),
            queue.clone(),
            context.clone(),
            generation,
            delivery.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(db.clone(), config.rate_limit.window_secs));
        let gateway = GatewayState::new(config, tenants.clone(), limiter, queue.clone(), metrics);
        let workers = WorkerPool::new(pipeline.clone(), config.workers.clone());

        info!(
            "loaded {} tenant(s), database {}",
            tenants.len(),
            db.path()
        );
        Self {
            db,
            tenants,
            queue,
            context,
            generation_breaker,
            delivery_breaker,
            delivery,
            pipeline,
            gateway,
            workers,
        }
    }
}
