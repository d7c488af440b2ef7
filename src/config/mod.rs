pub mod credentials;
pub mod loader;
pub mod schema;

pub use loader::{get_config_path, get_switchboard_home, load_config};
pub use schema::{
    BreakersConfig, CircuitBreakerConfig, Config, ContextConfig, DeliveryConfig,
    GatewayConfig, GenerationConfig, IngestConfig, QueueConfig, RateLimitConfig,
    SecurityConfig, StorageConfig, TenantConfig, WorkersConfig,
};
