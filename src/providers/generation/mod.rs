mod gemini;

pub use gemini::GeminiProvider;

use crate::backoff::BackoffSchedule;
use crate::breaker::{CircuitBreaker, Dependency};
use crate::config::GenerationConfig;
use crate::context::ContextMessage;
use crate::errors::SwitchboardError;
use crate::security::{PromptGuard, preview};
use crate::telemetry;
use crate::templates::{self, TemplateVars};
use crate::tenants::TenantContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One completion request: system prompt, prior turns, then the new message.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [ContextMessage],
    pub message: &'a str,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce reply text. An empty string means the provider answered with no
    /// usable candidate.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, SwitchboardError>;

    fn name(&self) -> &str;
}

/// Why a templated reply was used instead of generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    BreakerOpen,
    Exhausted,
    Rejected,
    Empty,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BreakerOpen => "breaker_open",
            Self::Exhausted => "exhausted",
            Self::Rejected => "rejected",
            Self::Empty => "empty",
        }
    }

    fn template(self) -> &'static str {
        match self {
            Self::Empty => templates::FALLBACK,
            Self::BreakerOpen | Self::Exhausted | Self::Rejected => templates::TECHNICAL_ISSUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationSource {
    Provider,
    SafetyBlock,
    AiDisabled,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub source: GenerationSource,
}

/// Generation provider behind the prompt guard, the circuit breaker and a
/// bounded in-process retry loop.
///
/// Provider trouble never surfaces as an error: the caller always gets text
/// to deliver. Only store failures (breaker state) propagate.
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    breaker: Arc<CircuitBreaker>,
    guard: PromptGuard,
    attempts: u32,
    backoff: BackoffSchedule,
}

enum Failure {
    Transient,
    Empty,
}

impl GenerationClient {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        breaker: Arc<CircuitBreaker>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            provider,
            breaker,
            guard: PromptGuard::new(),
            attempts: config.retry_attempts.max(1),
            backoff: BackoffSchedule::from_millis(&config.retry_backoff_ms),
        }
    }

    pub async fn generate(
        &self,
        tenant: &TenantContext,
        history: &[ContextMessage],
        message: &str,
    ) -> Result<Generated, SwitchboardError> {
        if !tenant.ai_enabled {
            telemetry::record_fallback(&tenant.id, "ai_disabled");
            return Ok(Self::templated(
                tenant,
                message,
                templates::AI_DISABLED,
                GenerationSource::AiDisabled,
            ));
        }

        if message.trim().is_empty() {
            return Ok(Self::fallback(tenant, message, FallbackReason::Empty));
        }

        if let Err(SwitchboardError::SafetyViolation(category)) = self.guard.check(message) {
            warn!(
                "prompt guard blocked message for tenant {} ({}): {}",
                tenant.id,
                category,
                preview(message, 80)
            );
            telemetry::record_safety_block(&tenant.id, &category);
            return Ok(Self::templated(
                tenant,
                message,
                templates::SAFETY_BLOCK,
                GenerationSource::SafetyBlock,
            ));
        }

        let request = GenerationRequest {
            system_prompt: &tenant.system_prompt,
            history,
            message,
        };

        let mut last_failure = Failure::Transient;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                let delay = self.backoff.delay_for(attempt - 1);
                debug!(
                    "retrying generation for {} in {}ms (attempt {}/{})",
                    tenant.id,
                    delay.as_millis(),
                    attempt + 1,
                    self.attempts
                );
                tokio::time::sleep(delay).await;
            }

            let permit = match self.breaker.acquire(&tenant.id) {
                Ok(permit) => permit,
                Err(SwitchboardError::BreakerOpen { remaining_secs, .. }) => {
                    info!(
                        "generation breaker open for {} ({}s remaining), using fallback",
                        tenant.id, remaining_secs
                    );
                    return Ok(Self::fallback(tenant, message, FallbackReason::BreakerOpen));
                }
                Err(e) => return Err(e),
            };

            let started = Instant::now();
            let result = self.provider.generate(request).await;
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(text) if !text.trim().is_empty() => {
                    telemetry::record_dependency_call(Dependency::Generation, &tenant.id, "ok", elapsed);
                    self.breaker.record_success(&permit)?;
                    let text = tenant.templates.render(
                        templates::DEFAULT,
                        &TemplateVars {
                            user_message: message,
                            reply: text.trim(),
                            tenant: &tenant.label,
                        },
                    );
                    return Ok(Generated {
                        text,
                        source: GenerationSource::Provider,
                    });
                }
                Ok(_) => {
                    telemetry::record_dependency_call(
                        Dependency::Generation,
                        &tenant.id,
                        "empty",
                        elapsed,
                    );
                    warn!(
                        "{} returned an empty response for {} (attempt {}/{})",
                        self.provider.name(),
                        tenant.id,
                        attempt + 1,
                        self.attempts
                    );
                    self.breaker.record_failure(&permit, true)?;
                    last_failure = Failure::Empty;
                }
                Err(e) if e.is_retryable() => {
                    telemetry::record_dependency_call(
                        Dependency::Generation,
                        &tenant.id,
                        "transient",
                        elapsed,
                    );
                    warn!(
                        "generation attempt {}/{} failed for {}: {}",
                        attempt + 1,
                        self.attempts,
                        tenant.id,
                        e
                    );
                    self.breaker.record_failure(&permit, true)?;
                    last_failure = Failure::Transient;
                }
                Err(e) => {
                    telemetry::record_dependency_call(
                        Dependency::Generation,
                        &tenant.id,
                        "permanent",
                        elapsed,
                    );
                    warn!("generation rejected for {}: {}", tenant.id, e);
                    self.breaker.record_failure(&permit, false)?;
                    return Ok(Self::fallback(tenant, message, FallbackReason::Rejected));
                }
            }
        }

        let reason = match last_failure {
            Failure::Empty => FallbackReason::Empty,
            Failure::Transient => FallbackReason::Exhausted,
        };
        Ok(Self::fallback(tenant, message, reason))
    }

    fn fallback(tenant: &TenantContext, message: &str, reason: FallbackReason) -> Generated {
        telemetry::record_fallback(&tenant.id, reason.as_str());
        Self::templated(
            tenant,
            message,
            reason.template(),
            GenerationSource::Fallback(reason),
        )
    }

    fn templated(
        tenant: &TenantContext,
        message: &str,
        name: &str,
        source: GenerationSource,
    ) -> Generated {
        let text = tenant.templates.render(
            name,
            &TemplateVars {
                user_message: message,
                reply: "",
                tenant: &tenant.label,
            },
        );
        Generated { text, source }
    }
}

#[cfg(test)]
mod tests;
