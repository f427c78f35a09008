use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{CircuitBreaker, Config, StateMachine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::SourceError;
use crate::models::SourceId;

pub type SourceBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Longest pause, in multiples of the pacing interval, before a source is retried.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Creates a circuit breaker guarding one external source.
///
/// # Configuration
///
/// - **Failure threshold**: `threshold` consecutive failures (across candidates) trigger OPEN state.
/// - **Backoff**: Exponential, from twice `pacing` up to `MAX_BACKOFF_FACTOR` times it.
///   Sources are called once per candidate, so the first open period always
///   covers at least the next candidate.
///
/// # States
///
/// - **CLOSED**: Normal operation, calls pass through.
/// - **OPEN**: Too many failures, the source is skipped.
/// - **HALF_OPEN**: One trial call decides whether the source recovered.
pub fn create_source_circuit_breaker(threshold: u32, pacing: Duration) -> SourceBreaker {
    let pacing = pacing.max(Duration::from_secs(1));
    let backoff_strategy = backoff::exponential(
        pacing * 2,                  // Initial delay
        pacing * MAX_BACKOFF_FACTOR, // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(threshold.max(1), backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[derive(Debug, Default)]
struct Cooldown {
    until: Option<Instant>,
    streak: u32,
}

/// Breaker, rate-limit cooldown and disable-on-auth-error switch of one source.
pub struct SourceGuard {
    source: SourceId,
    breaker: SourceBreaker,
    pacing: Duration,
    cooldown: Mutex<Cooldown>,
    disabled: AtomicBool,
}

impl SourceGuard {
    /// `pacing` is the delay between two candidates; backoffs are multiples of it.
    pub fn new(source: SourceId, threshold: u32, pacing: Duration) -> Self {
        Self {
            source,
            breaker: create_source_circuit_breaker(threshold, pacing),
            pacing,
            cooldown: Mutex::new(Cooldown::default()),
            disabled: AtomicBool::new(false),
        }
    }

    /// Whether a call may go out right now.
    pub fn check(&self) -> Result<(), SourceError> {
        if self.disabled.load(Ordering::Relaxed) {
            return Err(SourceError::Disabled(self.source.to_string()));
        }
        if let Some(until) = self.cooldown_until() {
            if Instant::now() < until {
                return Err(SourceError::CoolingDown(self.source.to_string()));
            }
        }
        if !self.breaker.is_call_permitted() {
            return Err(SourceError::CircuitOpen(self.source.to_string()));
        }
        Ok(())
    }

    /// Empty responses count as success: the provider answered.
    pub fn record_success(&self) {
        let _ = self.breaker.call(|| Ok::<(), ()>(()));
        if let Ok(mut cooldown) = self.cooldown.lock() {
            *cooldown = Cooldown::default();
        }
    }

    pub fn record_failure(&self, error: &SourceError) {
        match error {
            SourceError::RateLimited(_) => {
                let _ = self.breaker.call(|| Err::<(), ()>(()));
                let delay = self.start_cooldown();
                tracing::warn!(
                    "Source {} rate limited, pausing it for {}s",
                    self.source,
                    delay.as_secs()
                );
            }
            SourceError::Auth(_) => {
                if !self.disabled.swap(true, Ordering::Relaxed) {
                    tracing::error!(
                        "Source {} disabled after authentication failure: {}",
                        self.source,
                        error
                    );
                }
            }
            SourceError::CircuitOpen(_) | SourceError::CoolingDown(_) | SourceError::Disabled(_) => {}
            _ => {
                let _ = self.breaker.call(|| Err::<(), ()>(()));
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown.lock().ok().and_then(|c| c.until)
    }

    /// Doubles with every consecutive rate limit, from one pacing interval up
    /// to `MAX_BACKOFF_FACTOR` of them.
    fn start_cooldown(&self) -> Duration {
        let Ok(mut cooldown) = self.cooldown.lock() else {
            return Duration::ZERO;
        };
        cooldown.streak = cooldown.streak.saturating_add(1);
        let factor = 1u32
            .checked_shl(cooldown.streak - 1)
            .unwrap_or(MAX_BACKOFF_FACTOR)
            .min(MAX_BACKOFF_FACTOR);
        let delay = self.pacing * factor;
        cooldown.until = Some(Instant::now() + delay);
        delay
    }
}
