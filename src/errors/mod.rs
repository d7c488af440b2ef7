use crate::breaker::Dependency;
use crate::ratelimit::RateLimitReason;
use thiserror::Error;

/// Reasons an inbound webhook fails authentication.
///
/// Always terminal: the request is rejected synchronously and never enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("timestamp header is not a Unix timestamp")]
    MalformedTimestamp,

    #[error("timestamp outside tolerance ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: i64 },

    #[error("signature mismatch")]
    BadSignature,

    #[error("webhook token mismatch")]
    BadToken,

    #[error("no shared secret configured")]
    NotConfigured,
}

impl AuthError {
    /// Stable label used in rejection counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) => "missing_header",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::StaleTimestamp { .. } => "stale_timestamp",
            Self::BadSignature => "bad_signature",
            Self::BadToken => "bad_token",
            Self::NotConfigured => "not_configured",
        }
    }

    /// Stale and malformed timestamps are client errors (400); everything
    /// else is an authorization failure (401).
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::StaleTimestamp { .. } | Self::MalformedTimestamp)
    }
}

/// Typed error hierarchy for switchboard.
///
/// Use at module boundaries (verifier, limiter, providers, queue, storage).
/// Setup code can keep using `anyhow::Result`; the `Internal` variant allows
/// seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(RateLimitReason),

    #[error("{dependency} transient failure: {message}")]
    TransientDependency {
        dependency: Dependency,
        message: String,
    },

    #[error("{dependency} permanent failure: {message}")]
    PermanentDependency {
        dependency: Dependency,
        message: String,
    },

    #[error("{dependency} circuit breaker is open ({remaining_secs}s remaining)")]
    BreakerOpen {
        dependency: Dependency,
        remaining_secs: u64,
    },

    #[error("Content safety violation: {0}")]
    SafetyViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SwitchboardError {
    pub fn transient(dependency: Dependency, message: impl Into<String>) -> Self {
        Self::TransientDependency {
            dependency,
            message: message.into(),
        }
    }

    pub fn permanent(dependency: Dependency, message: impl Into<String>) -> Self {
        Self::PermanentDependency {
            dependency,
            message: message.into(),
        }
    }

    /// Whether the queue should schedule another attempt for this failure.
    ///
    /// `BreakerOpen` is retryable but is deferred without consuming an attempt;
    /// see `TaskQueue::defer`.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientDependency { .. }
            | Self::BreakerOpen { .. }
            | Self::Storage(_)
            | Self::Internal(_) => true,
            Self::Auth(_)
            | Self::RateLimited(_)
            | Self::PermanentDependency { .. }
            | Self::SafetyViolation(_)
            | Self::Config(_) => false,
        }
    }

    /// Short label for logs and dead-letter classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimited(_) => "rate_limited",
            Self::TransientDependency { .. } => "transient",
            Self::PermanentDependency { .. } => "permanent",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::SafetyViolation(_) => "safety",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests;
