//! Per-adapter circuit breaker
//!
//! Closed admits every attempt. Enough consecutive failures open the
//! breaker; once the reset timeout elapses exactly one trial attempt is
//! admitted (half-open). A trial success closes it, a trial failure reopens
//! it and restarts the timer.

use crate::config::CircuitBreakerSettings;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(60_000),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
        }
    }
}

/// Outcome of asking the breaker for an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal attempt while closed
    Allowed,
    /// The single half-open trial
    Trial,
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Breaker state as reported by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    /// Time left before a trial is admitted, while open
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn reset_elapsed(&self, now: Instant, timeout: Duration) -> bool {
        self.opened_at
            .is_none_or(|opened| now.duration_since(opened) >= timeout)
    }

    fn admits(&self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.reset_elapsed(now, timeout),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for one attempt; a granted trial must be resolved with a
    /// recorded outcome or [`release`](Self::release)
    pub fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                if state.reset_elapsed(now, self.config.reset_timeout) {
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen if state.trial_in_flight => Admission::Rejected,
            CircuitState::HalfOpen => {
                state.trial_in_flight = true;
                Admission::Trial
            }
        }
    }

    /// Whether an attempt would currently be admitted, without taking it
    pub fn would_admit(&self) -> bool {
        let now = Instant::now();
        self.lock().admits(now, self.config.reset_timeout)
    }

    /// Open with the reset timeout elapsed, so the next attempt is a trial
    pub fn is_trial_eligible(&self) -> bool {
        let now = Instant::now();
        let state = self.lock();
        state.state != CircuitState::Closed && state.admits(now, self.config.reset_timeout)
    }

    /// Record a success for the attempt granted by `admission`
    ///
    /// Only a trial can close a half-open breaker. A normal attempt that
    /// finishes after the breaker left `Closed` changes nothing.
    pub fn record_success(&self, admission: Admission) {
        let mut state = self.lock();
        match (admission, state.state) {
            (Admission::Allowed, CircuitState::Closed) => state.failures = 0,
            (Admission::Trial, CircuitState::HalfOpen) => {
                info!("Circuit closed after successful trial");
                state.state = CircuitState::Closed;
                state.failures = 0;
                state.opened_at = None;
                state.trial_in_flight = false;
            }
            _ => debug!(?admission, state = ?state.state, "Ignoring late success"),
        }
    }

    /// Count a failure for the attempt granted by `admission`; returns true
    /// when this failure opened the breaker
    pub fn record_failure(&self, admission: Admission) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        if admission == Admission::Rejected {
            return false;
        }
        state.failures = state.failures.saturating_add(1);
        match (admission, state.state) {
            (Admission::Allowed, CircuitState::Closed)
                if state.failures >= self.config.failure_threshold =>
            {
                warn!(
                    failures = state.failures,
                    "Circuit opened after consecutive failures"
                );
                state.open(now);
                true
            }
            (Admission::Trial, CircuitState::HalfOpen) => {
                warn!("Trial failed, circuit reopened");
                state.open(now);
                true
            }
            _ => false,
        }
    }

    /// Give back an unresolved trial, e.g. after cancellation
    pub fn release(&self, admission: Admission) {
        if admission == Admission::Trial {
            let mut state = self.lock();
            if state.state == CircuitState::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let state = self.lock();
        let retry_in = match (state.state, state.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                Some(self.config.reset_timeout.saturating_sub(now.duration_since(opened)))
            }
            _ => None,
        };
        BreakerSnapshot {
            state: state.state,
            failures: state.failures,
            retry_in,
        }
    }
}
