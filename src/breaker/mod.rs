use crate::config::CircuitBreakerConfig;
use crate::errors::SwitchboardError;
use crate::storage::{Database, now_ms};
use crate::telemetry;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External dependency guarded by a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Generation,
    Delivery,
}

impl Dependency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Delivery => "delivery",
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerMode {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl BreakerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "half_open" => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for BreakerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Persisted state of one (dependency, scope) breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub mode: BreakerMode,
    pub consecutive_failures: u32,
    pub window_started_ms: i64,
    pub opened_at_ms: i64,
    pub cooldown_ms: i64,
    pub reopen_count: u32,
    pub probe_in_flight: bool,
    pub probe_started_ms: i64,
}

/// Admission ticket returned by [`CircuitBreaker::acquire`]. Pass it back to
/// `record_success` / `record_failure` so the outcome lands on the right scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerPermit {
    pub scope: String,
    /// This call is the single half-open probe.
    pub probe: bool,
}

/// Circuit breaker whose state lives in the shared store.
///
/// Closed: transient failures within `windowSecs` are counted; reaching
/// `failureThreshold` opens the breaker. Open: calls fail fast with
/// `BreakerOpen` until the cooldown elapses. HalfOpen: exactly one probe is
/// admitted; success closes, a transient failure reopens with the cooldown
/// doubled (capped at `maxCooldownSecs`). A probe that never reports back is
/// abandoned after one cooldown and another probe is admitted.
pub struct CircuitBreaker {
    db: Arc<Database>,
    dependency: Dependency,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(db: Arc<Database>, dependency: Dependency, config: CircuitBreakerConfig) -> Self {
        Self {
            db,
            dependency,
            config,
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn scope_for(&self, tenant: &str) -> String {
        if self.config.per_tenant {
            tenant.to_string()
        } else {
            "global".to_string()
        }
    }

    fn base_cooldown_ms(&self) -> i64 {
        secs_to_ms(self.config.cooldown_secs)
    }

    fn cooldown_for(&self, reopen_count: u32) -> i64 {
        let factor = 1i64.checked_shl(reopen_count.min(32)).unwrap_or(i64::MAX);
        self.base_cooldown_ms()
            .saturating_mul(factor)
            .min(secs_to_ms(self.config.max_cooldown_secs))
    }

    pub fn acquire(&self, tenant: &str) -> Result<BreakerPermit, SwitchboardError> {
        self.acquire_at(tenant, now_ms())
    }

    /// Decide whether a call may proceed. Never performs I/O against the dependency.
    pub fn acquire_at(&self, tenant: &str, now: i64) -> Result<BreakerPermit, SwitchboardError> {
        let scope = self.scope_for(tenant);
        if !self.config.enabled {
            return Ok(BreakerPermit {
                scope,
                probe: false,
            });
        }

        let dependency = self.dependency;
        let decision = self.db.immediate(|tx| {
            let mut state = load_state(tx, dependency, &scope)?;
            match state.mode {
                BreakerMode::Closed => Ok(Ok(false)),
                BreakerMode::Open => {
                    let reopen_at = state.opened_at_ms.saturating_add(state.cooldown_ms);
                    if now < reopen_at {
                        return Ok(Err(reopen_at - now));
                    }
                    info!(
                        "circuit breaker {}/{} transitioning Open -> HalfOpen after {}s",
                        dependency,
                        scope,
                        (now - state.opened_at_ms) / 1000
                    );
                    state.mode = BreakerMode::HalfOpen;
                    state.probe_in_flight = true;
                    state.probe_started_ms = now;
                    store_state(tx, dependency, &scope, &state, now)?;
                    telemetry::record_breaker_transition(
                        dependency,
                        &scope,
                        BreakerMode::Open,
                        BreakerMode::HalfOpen,
                    );
                    Ok(Ok(true))
                }
                BreakerMode::HalfOpen => {
                    let probe_deadline = state.probe_started_ms.saturating_add(state.cooldown_ms);
                    if state.probe_in_flight && now < probe_deadline {
                        return Ok(Err(probe_deadline - now));
                    }
                    if state.probe_in_flight {
                        warn!(
                            "circuit breaker {}/{} probe timed out, admitting a new probe",
                            dependency, scope
                        );
                    }
                    state.probe_in_flight = true;
                    state.probe_started_ms = now;
                    store_state(tx, dependency, &scope, &state, now)?;
                    Ok(Ok(true))
                }
            }
        })?;

        match decision {
            Ok(probe) => Ok(BreakerPermit { scope, probe }),
            Err(remaining_ms) => {
                let remaining_secs = u64::try_from((remaining_ms + 999) / 1000).unwrap_or(0);
                debug!(
                    "circuit breaker {}/{} short-circuited ({}s remaining)",
                    dependency, scope, remaining_secs
                );
                telemetry::record_breaker_short_circuit(dependency, &scope);
                Err(SwitchboardError::BreakerOpen {
                    dependency,
                    remaining_secs,
                })
            }
        }
    }

    pub fn record_success(&self, permit: &BreakerPermit) -> Result<(), SwitchboardError> {
        self.record_success_at(permit, now_ms())
    }

    pub fn record_success_at(
        &self,
        permit: &BreakerPermit,
        now: i64,
    ) -> Result<(), SwitchboardError> {
        if !self.config.enabled {
            return Ok(());
        }
        let dependency = self.dependency;
        let scope = permit.scope.as_str();
        self.db.immediate(|tx| {
            let state = load_state(tx, dependency, scope)?;
            match state.mode {
                BreakerMode::HalfOpen if permit.probe => {
                    info!(
                        "circuit breaker {}/{} probe succeeded: HalfOpen -> Closed",
                        dependency, scope
                    );
                    store_state(tx, dependency, scope, &BreakerSnapshot::default(), now)?;
                    telemetry::record_breaker_transition(
                        dependency,
                        scope,
                        BreakerMode::HalfOpen,
                        BreakerMode::Closed,
                    );
                }
                BreakerMode::Closed if state.consecutive_failures > 0 => {
                    let reset = BreakerSnapshot {
                        consecutive_failures: 0,
                        window_started_ms: 0,
                        ..state
                    };
                    store_state(tx, dependency, scope, &reset, now)?;
                }
                _ => {}
            }
            Ok(())
        })
    }

    pub fn record_failure(
        &self,
        permit: &BreakerPermit,
        transient: bool,
    ) -> Result<(), SwitchboardError> {
        self.record_failure_at(permit, transient, now_ms())
    }

    /// Only transient failures count toward tripping. A non-transient failure
    /// proves the dependency is reachable and is recorded as a success.
    pub fn record_failure_at(
        &self,
        permit: &BreakerPermit,
        transient: bool,
        now: i64,
    ) -> Result<(), SwitchboardError> {
        if !self.config.enabled {
            return Ok(());
        }
        if !transient {
            return self.record_success_at(permit, now);
        }

        let dependency = self.dependency;
        let scope = permit.scope.as_str();
        let window_ms = secs_to_ms(self.config.window_secs);
        let threshold = self.config.failure_threshold;
        self.db.immediate(|tx| {
            let mut state = load_state(tx, dependency, scope)?;
            match state.mode {
                BreakerMode::Closed => {
                    if state.consecutive_failures == 0
                        || now - state.window_started_ms >= window_ms
                    {
                        state.window_started_ms = now;
                        state.consecutive_failures = 1;
                    } else {
                        state.consecutive_failures += 1;
                    }
                    if state.consecutive_failures >= threshold {
                        warn!(
                            "circuit breaker {}/{} tripped after {} failures: Closed -> Open",
                            dependency, scope, state.consecutive_failures
                        );
                        state.mode = BreakerMode::Open;
                        state.opened_at_ms = now;
                        state.reopen_count = 0;
                        state.cooldown_ms = self.cooldown_for(0);
                        telemetry::record_breaker_transition(
                            dependency,
                            scope,
                            BreakerMode::Closed,
                            BreakerMode::Open,
                        );
                    }
                    store_state(tx, dependency, scope, &state, now)?;
                }
                BreakerMode::HalfOpen if permit.probe => {
                    state.reopen_count = state.reopen_count.saturating_add(1);
                    state.cooldown_ms = self.cooldown_for(state.reopen_count);
                    warn!(
                        "circuit breaker {}/{} probe failed: HalfOpen -> Open (cooldown {}s)",
                        dependency,
                        scope,
                        state.cooldown_ms / 1000
                    );
                    state.mode = BreakerMode::Open;
                    state.opened_at_ms = now;
                    state.probe_in_flight = false;
                    store_state(tx, dependency, scope, &state, now)?;
                    telemetry::record_breaker_transition(
                        dependency,
                        scope,
                        BreakerMode::HalfOpen,
                        BreakerMode::Open,
                    );
                }
                // Late results from calls admitted before the breaker opened
                _ => {}
            }
            Ok(())
        })
    }

    /// Run `op` behind the breaker: acquire, call, record the outcome.
    ///
    /// `TransientDependency` and `Internal` errors count toward tripping;
    /// every other error is treated as a reachable-but-rejecting dependency.
    pub async fn call<T, F, Fut>(&self, tenant: &str, op: F) -> Result<T, SwitchboardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SwitchboardError>>,
    {
        let permit = self.acquire(tenant)?;
        let result = op().await;
        let recorded = match &result {
            Ok(_) => self.record_success(&permit),
            Err(e) => self.record_failure(
                &permit,
                matches!(
                    e,
                    SwitchboardError::TransientDependency { .. } | SwitchboardError::Internal(_)
                ),
            ),
        };
        if let Err(e) = recorded {
            warn!(
                "failed to record circuit breaker outcome for {}/{}: {}",
                self.dependency, permit.scope, e
            );
        }
        result
    }

    pub fn snapshot(&self, tenant: &str) -> Result<BreakerSnapshot, SwitchboardError> {
        let scope = self.scope_for(tenant);
        load_state(&self.db.lock(), self.dependency, &scope)
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn load_state(
    conn: &Connection,
    dependency: Dependency,
    scope: &str,
) -> Result<BreakerSnapshot, SwitchboardError> {
    let state = conn
        .query_row(
            "SELECT mode, consecutive_failures, window_started_ms, opened_at_ms, cooldown_ms,
                    reopen_count, probe_in_flight, probe_started_ms
             FROM breaker_state WHERE dependency = ?1 AND scope = ?2",
            params![dependency.as_str(), scope],
            |row| {
                let mode: String = row.get(0)?;
                Ok(BreakerSnapshot {
                    mode: BreakerMode::parse(&mode),
                    consecutive_failures: row.get(1)?,
                    window_started_ms: row.get(2)?,
                    opened_at_ms: row.get(3)?,
                    cooldown_ms: row.get(4)?,
                    reopen_count: row.get(5)?,
                    probe_in_flight: row.get(6)?,
                    probe_started_ms: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(state.unwrap_or_default())
}

fn store_state(
    tx: &Transaction<'_>,
    dependency: Dependency,
    scope: &str,
    state: &BreakerSnapshot,
    now: i64,
) -> Result<(), SwitchboardError> {
    tx.execute(
        "INSERT INTO breaker_state (dependency, scope, mode, consecutive_failures,
             window_started_ms, opened_at_ms, cooldown_ms, reopen_count, probe_in_flight,
             probe_started_ms, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(dependency, scope) DO UPDATE SET
             mode = excluded.mode,
             consecutive_failures = excluded.consecutive_failures,
             window_started_ms = excluded.window_started_ms,
             opened_at_ms = excluded.opened_at_ms,
             cooldown_ms = excluded.cooldown_ms,
             reopen_count = excluded.reopen_count,
             probe_in_flight = excluded.probe_in_flight,
             probe_started_ms = excluded.probe_started_ms,
             updated_at_ms = excluded.updated_at_ms",
        params![
            dependency.as_str(),
            scope,
            state.mode.as_str(),
            state.consecutive_failures,
            state.window_started_ms,
            state.opened_at_ms,
            state.cooldown_ms,
            state.reopen_count,
            state.probe_in_flight,
            state.probe_started_ms,
            now,
        ],
    )?;
    Ok(())
}
