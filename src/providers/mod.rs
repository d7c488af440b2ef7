//! Outbound dependencies: the generation provider and the delivery provider.
//!
//! Each side has a provider trait (one HTTP call, classified errors) and a
//! client that wraps it with the circuit breaker, bounded retries and the
//! fallback policy.

pub mod delivery;
pub mod errors;
pub mod generation;

pub use delivery::{
    DeliveryClient, DeliveryLog, DeliveryProvider, DeliveryReceipt, DeliveryRecord,
    DeliveryRequest, DeliveryStatus, HttpDeliveryProvider, Outbound, idempotency_key,
};
pub use errors::ProviderErrorHandler;
pub use generation::{
    FallbackReason, GeminiProvider, Generated, GenerationClient, GenerationProvider,
    GenerationRequest, GenerationSource,
};

use reqwest::Client;
use std::time::Duration;

/// Connect timeout for provider HTTP clients (seconds).
pub(crate) const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Build a `reqwest::Client` with a 10 s connect timeout and the given overall timeout.
pub(crate) fn provider_http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}
