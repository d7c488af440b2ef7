#![warn(clippy::pedantic)]
// Noisy doc/signature lints
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference: format!("{}", x) over format!("{x}")
#![allow(clippy::uninlined_format_args)]
// Timestamps and counters move between i64 (SQLite), u64 (metrics) and f64 (latency)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod backoff;
pub mod breaker;
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod payload;
pub mod pipeline;
pub mod providers;
pub mod queue;
pub mod ratelimit;
pub mod security;
pub mod storage;
pub mod telemetry;
pub mod templates;
pub mod tenants;
pub mod worker;

pub use errors::{AuthError, SwitchboardError};

/// Re-exports for fuzz targets. Not part of the public API.
#[doc(hidden)]
pub mod fuzz_api {
    pub use crate::payload::normalize_payload;

    /// Wrapper around `SignatureVerifier::verify` with a fixed clock for fuzz targets.
    pub fn verify_signature(secret: &str, timestamp: &str, signature: &str, body: &[u8]) -> bool {
        let verifier = crate::security::SignatureVerifier::new(secret, "", 300);
        verifier
            .verify_at(body, Some(timestamp), Some(signature), 1_700_000_000)
            .is_ok()
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
