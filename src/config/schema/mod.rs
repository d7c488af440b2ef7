use crate::errors::SwitchboardError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::warn;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`            prints normally via `&self.field_name`
/// - `redact(field_name)`    `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules are declared after the macro so they can use `redact_debug!`
mod providers;
mod tenants;

pub use providers::*;
pub use tenants::*;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Requests with a larger body are rejected with 413 before verification.
    #[serde(default = "default_max_body_bytes", rename = "maxBodyBytes")]
    pub max_body_bytes: usize,
    /// Tenant used when neither `X-Tenant-Domain` nor `Host` match a configured domain.
    #[serde(default, rename = "defaultTenant")]
    pub default_tenant: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            default_tenant: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

fn default_timestamp_tolerance_secs() -> u64 {
    300
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// HMAC-SHA256 key shared with the webhook source.
    #[serde(default, rename = "sharedSecret")]
    pub shared_secret: String,
    /// Optional static token checked against `X-Webhook-Token`. Empty disables the check.
    #[serde(default, rename = "webhookToken")]
    pub webhook_token: String,
    #[serde(
        default = "default_timestamp_tolerance_secs",
        rename = "timestampToleranceSecs"
    )]
    pub timestamp_tolerance_secs: u64,
}

redact_debug!(
    SecurityConfig,
    redact(shared_secret),
    redact(webhook_token),
    timestamp_tolerance_secs,
);

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            webhook_token: String::new(),
            timestamp_tolerance_secs: default_timestamp_tolerance_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

fn default_window_secs() -> u64 {
    60
}

fn default_per_address() -> u32 {
    60
}

fn default_per_sender() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs", rename = "windowSecs")]
    pub window_secs: u64,
    /// Accepted requests per source address per window.
    #[serde(default = "default_per_address", rename = "perAddress")]
    pub per_address: u32,
    /// Accepted requests per sender number per window.
    #[serde(default = "default_per_sender", rename = "perSender")]
    pub per_sender: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            per_address: default_per_address(),
            per_sender: default_per_sender(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

fn default_country_code() -> String {
    "55".to_string()
}

fn default_max_text_chars() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Prefixed to sender numbers that don't already start with it.
    #[serde(default = "default_country_code", rename = "defaultCountryCode")]
    pub default_country_code: String,
    #[serde(default = "default_max_text_chars", rename = "maxTextChars")]
    pub max_text_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

fn default_context_ttl_secs() -> u64 {
    600
}

fn default_max_messages() -> usize {
    5
}

fn default_cache_capacity() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_ttl_secs", rename = "ttlSecs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_messages", rename = "maxMessages")]
    pub max_messages: usize,
    #[serde(default = "default_cache_capacity", rename = "cacheCapacity")]
    pub cache_capacity: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_context_ttl_secs(),
            max_messages: default_max_messages(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue & workers
// ---------------------------------------------------------------------------

fn default_max_attempts() -> u32 {
    6
}

fn default_retry_schedule_secs() -> Vec<u64> {
    vec![5, 15, 45, 90]
}

fn default_lease_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts", rename = "maxAttempts")]
    pub max_attempts: u32,
    /// Delay before attempt n+1; the last value repeats.
    #[serde(default = "default_retry_schedule_secs", rename = "retryScheduleSecs")]
    pub retry_schedule_secs: Vec<u64>,
    #[serde(default = "default_lease_secs", rename = "leaseSecs")]
    pub lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_schedule_secs: default_retry_schedule_secs(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_primary_workers() -> usize {
    4
}

fn default_reprocess_workers() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_primary_workers")]
    pub primary: usize,
    #[serde(default = "default_reprocess_workers")]
    pub reprocess: usize,
    #[serde(default = "default_poll_interval_ms", rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_workers(),
            reprocess: default_reprocess_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database file. Defaults to `~/.switchboard/switchboard.db`.
    #[serde(default)]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub breaker: BreakersConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tenants: HashMap<String, TenantConfig>,
    /// Global reply template overrides, keyed by template name.
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl Config {
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.storage.path {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(crate::config::loader::get_switchboard_home()?.join("switchboard.db")),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), SwitchboardError> {
        self.validate_gateway()?;
        self.validate_security()?;
        self.validate_rate_limit()?;
        self.validate_context()?;
        self.validate_breakers()?;
        self.validate_providers()?;
        self.validate_queue()?;
        self.validate_tenants()?;
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), SwitchboardError> {
        if self.gateway.port == 0 {
            return Err(SwitchboardError::Config("gateway.port must be > 0".into()));
        }
        if self.gateway.port < 1024 {
            warn!(
                "gateway.port {} is a privileged port (< 1024), may require elevated permissions",
                self.gateway.port
            );
        }
        if self.gateway.max_body_bytes == 0 {
            return Err(SwitchboardError::Config(
                "gateway.maxBodyBytes must be > 0".into(),
            ));
        }
        if let Some(default_tenant) = &self.gateway.default_tenant
            && !self.tenants.contains_key(default_tenant)
        {
            return Err(SwitchboardError::Config(format!(
                "gateway.defaultTenant '{default_tenant}' is not a configured tenant"
            )));
        }
        Ok(())
    }

    fn validate_security(&self) -> Result<(), SwitchboardError> {
        if self.security.timestamp_tolerance_secs == 0 {
            return Err(SwitchboardError::Config(
                "security.timestampToleranceSecs must be > 0".into(),
            ));
        }
        if self.security.timestamp_tolerance_secs > 3600 {
            warn!("security.timestampToleranceSecs is very long (> 3600s), replay window is wide");
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), SwitchboardError> {
        let r = &self.rate_limit;
        if r.window_secs == 0 {
            return Err(SwitchboardError::Config(
                "rateLimit.windowSecs must be > 0".into(),
            ));
        }
        if r.per_address == 0 || r.per_sender == 0 {
            return Err(SwitchboardError::Config(
                "rateLimit.perAddress and rateLimit.perSender must be > 0".into(),
            ));
        }
        if self.ingest.max_text_chars == 0 {
            return Err(SwitchboardError::Config(
                "ingest.maxTextChars must be > 0".into(),
            ));
        }
        if !self
            .ingest
            .default_country_code
            .chars()
            .all(|c| c.is_ascii_digit())
        {
            return Err(SwitchboardError::Config(
                "ingest.defaultCountryCode must contain only digits".into(),
            ));
        }
        Ok(())
    }

    fn validate_context(&self) -> Result<(), SwitchboardError> {
        let c = &self.context;
        if c.ttl_secs == 0 {
            return Err(SwitchboardError::Config("context.ttlSecs must be > 0".into()));
        }
        if c.max_messages == 0 {
            return Err(SwitchboardError::Config(
                "context.maxMessages must be > 0".into(),
            ));
        }
        if c.cache_capacity == 0 {
            return Err(SwitchboardError::Config(
                "context.cacheCapacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_breakers(&self) -> Result<(), SwitchboardError> {
        for (name, b) in [
            ("generation", &self.breaker.generation),
            ("delivery", &self.breaker.delivery),
        ] {
            if !b.enabled {
                continue;
            }
            if b.failure_threshold == 0 {
                return Err(SwitchboardError::Config(format!(
                    "breaker.{name}.failureThreshold must be > 0 when enabled"
                )));
            }
            if b.window_secs == 0 || b.cooldown_secs == 0 {
                return Err(SwitchboardError::Config(format!(
                    "breaker.{name}.windowSecs and breaker.{name}.cooldownSecs must be > 0 when enabled"
                )));
            }
            if b.max_cooldown_secs < b.cooldown_secs {
                return Err(SwitchboardError::Config(format!(
                    "breaker.{name}.maxCooldownSecs must be >= cooldownSecs"
                )));
            }
        }
        Ok(())
    }

    fn validate_providers(&self) -> Result<(), SwitchboardError> {
        let g = &self.generation;
        if g.timeout_secs == 0 {
            return Err(SwitchboardError::Config(
                "generation.timeoutSecs must be > 0".into(),
            ));
        }
        if g.retry_attempts == 0 {
            return Err(SwitchboardError::Config(
                "generation.retryAttempts must be > 0".into(),
            ));
        }
        let d = &self.delivery;
        if d.timeout_secs == 0 {
            return Err(SwitchboardError::Config(
                "delivery.timeoutSecs must be > 0".into(),
            ));
        }
        if d.retry_attempts == 0 {
            return Err(SwitchboardError::Config(
                "delivery.retryAttempts must be > 0".into(),
            ));
        }
        if !d.api_url.is_empty()
            && !(d.api_url.starts_with("http://") || d.api_url.starts_with("https://"))
        {
            return Err(SwitchboardError::Config(
                "delivery.apiUrl must be an http(s) URL".into(),
            ));
        }
        Ok(())
    }

    fn validate_queue(&self) -> Result<(), SwitchboardError> {
        let q = &self.queue;
        if q.max_attempts == 0 {
            return Err(SwitchboardError::Config(
                "queue.maxAttempts must be > 0".into(),
            ));
        }
        if q.retry_schedule_secs.is_empty() {
            return Err(SwitchboardError::Config(
                "queue.retryScheduleSecs must not be empty".into(),
            ));
        }
        if q.lease_secs == 0 {
            return Err(SwitchboardError::Config("queue.leaseSecs must be > 0".into()));
        }
        if self.workers.primary == 0 {
            return Err(SwitchboardError::Config(
                "workers.primary must be > 0".into(),
            ));
        }
        if self.workers.poll_interval_ms == 0 {
            return Err(SwitchboardError::Config(
                "workers.pollIntervalMs must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_tenants(&self) -> Result<(), SwitchboardError> {
        let mut domains = HashSet::new();
        for (id, tenant) in &self.tenants {
            if id.is_empty() || id.contains(':') {
                return Err(SwitchboardError::Config(format!(
                    "tenant id '{id}' must be non-empty and must not contain ':'"
                )));
            }
            let domain = crate::tenants::normalize_domain(&tenant.domain);
            if domain.is_empty() {
                return Err(SwitchboardError::Config(format!(
                    "tenants.{id}.domain is required"
                )));
            }
            if !domains.insert(domain.clone()) {
                return Err(SwitchboardError::Config(format!(
                    "tenants.{id}.domain '{domain}' is used by more than one tenant"
                )));
            }
            if tenant.rate_limit_per_address == Some(0) || tenant.rate_limit_per_sender == Some(0)
            {
                return Err(SwitchboardError::Config(format!(
                    "tenants.{id} rate limit overrides must be > 0"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
