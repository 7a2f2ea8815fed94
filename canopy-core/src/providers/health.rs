//! Health and metrics tracking for one adapter
//!
//! Health and metrics live behind a single lock so a probe and an in-flight
//! call for the same adapter never interleave their updates. Readers get
//! cloned snapshots.

use crate::protocol::TokenUsage;
use crate::providers::rate_limit::RateLimitSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Outcomes kept for the rolling success rate
const SUCCESS_WINDOW: usize = 100;

/// Success rate below which a working adapter reports `degraded`
const DEGRADED_SUCCESS_RATE: f64 = 0.8;

/// Liveness classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Live health signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    /// Success rate over the most recent attempts, 1.0 when nothing was measured
    pub success_rate: f64,
    pub rate_limit_remaining: Option<u32>,
    pub rate_limit_reset: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_latency_ms: None,
            consecutive_failures: 0,
            success_rate: 1.0,
            rate_limit_remaining: None,
            rate_limit_reset: None,
            last_check: None,
        }
    }
}

/// Cumulative counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
    pub average_latency_ms: f64,
    pub cache_hits: u64,
}

impl ProviderMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Share of served requests answered from cache
    pub fn cache_hit_rate(&self) -> f64 {
        let served = self.successes + self.cache_hits;
        if served == 0 {
            0.0
        } else {
            self.cache_hits as f64 / served as f64
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    health: ProviderHealth,
    metrics: ProviderMetrics,
    outcomes: VecDeque<bool>,
}

impl HealthState {
    fn push_outcome(&mut self, success: bool) {
        if self.outcomes.len() == SUCCESS_WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        self.health.success_rate = successes as f64 / self.outcomes.len() as f64;
    }

    fn record_latency(&mut self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.health.last_latency_ms = Some(ms);

        let n = self.metrics.requests as f64;
        self.metrics.average_latency_ms = if n <= 1.0 {
            ms as f64
        } else {
            self.metrics.average_latency_ms + (ms as f64 - self.metrics.average_latency_ms) / n
        };
    }
}

/// Mutex-guarded health and metrics pair
#[derive(Debug, Default)]
pub struct HealthTracker {
    state: Mutex<HealthState>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn health(&self) -> ProviderHealth {
        self.lock().health.clone()
    }

    pub fn metrics(&self) -> ProviderMetrics {
        self.lock().metrics.clone()
    }

    /// Health and metrics read under one lock
    pub fn snapshot(&self) -> (ProviderHealth, ProviderMetrics) {
        let state = self.lock();
        (state.health.clone(), state.metrics.clone())
    }

    /// Record a successful attempt
    pub fn record_success(&self, latency: Duration, usage: &TokenUsage, cost: f64) {
        let mut state = self.lock();
        state.metrics.requests += 1;
        state.metrics.successes += 1;
        state.metrics.prompt_tokens += usage.prompt_tokens as u64;
        state.metrics.completion_tokens += usage.completion_tokens as u64;
        state.metrics.total_cost += cost;
        state.record_latency(latency);
        state.push_outcome(true);

        state.health.consecutive_failures = 0;
        state.health.status = if state.health.success_rate < DEGRADED_SUCCESS_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }

    /// Record a failed attempt; returns the new consecutive-failure count
    pub fn record_failure(&self, latency: Duration, timed_out: bool) -> u32 {
        let mut state = self.lock();
        state.metrics.requests += 1;
        state.metrics.failures += 1;
        if timed_out {
            state.metrics.timeouts += 1;
        }
        state.record_latency(latency);
        state.push_outcome(false);

        state.health.consecutive_failures += 1;
        if state.health.status != HealthStatus::Unhealthy {
            state.health.status = HealthStatus::Degraded;
        }
        state.health.consecutive_failures
    }

    /// Called when the circuit breaker trips
    pub fn mark_unhealthy(&self) {
        self.lock().health.status = HealthStatus::Unhealthy;
    }

    /// Apply the result of a liveness probe
    pub fn record_probe(&self, available: bool) {
        let mut state = self.lock();
        state.health.last_check = Some(Utc::now());
        state.health.status = if !available {
            HealthStatus::Unhealthy
        } else if state.health.consecutive_failures == 0
            && state.health.success_rate >= DEGRADED_SUCCESS_RATE
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
    }

    pub fn record_cache_hit(&self) {
        self.lock().metrics.cache_hits += 1;
    }

    pub fn update_rate_limit(&self, snapshot: RateLimitSnapshot) {
        let mut state = self.lock();
        if snapshot.remaining.is_some() {
            state.health.rate_limit_remaining = snapshot.remaining;
        }
        if snapshot.reset_at.is_some() {
            state.health.rate_limit_reset = snapshot.reset_at;
        }
    }

    /// How long to hold off when the backend reported an exhausted quota
    pub fn rate_limit_wait(&self) -> Option<Duration> {
        let state = self.lock();
        if state.health.rate_limit_remaining != Some(0) {
            return None;
        }
        let reset = state.health.rate_limit_reset?;
        (reset - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn reset_metrics(&self) {
        self.lock().metrics = ProviderMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_then_success_resets_count() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.record_failure(Duration::from_millis(10), false), 1);
        assert_eq!(tracker.record_failure(Duration::from_millis(10), true), 2);
        assert_eq!(tracker.health().status, HealthStatus::Degraded);

        tracker.record_success(Duration::from_millis(40), &TokenUsage::new(10, 5), 0.01);
        let (health, metrics) = tracker.snapshot();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_latency_ms, Some(40));
        assert_eq!(metrics.requests, 3);
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.total_tokens(), 15);
        assert!((health.success_rate - 1.0 / 3.0).abs() < 1e-9);
        // one success in three is below the degraded threshold
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_average_latency() {
        let tracker = HealthTracker::new();
        tracker.record_success(Duration::from_millis(100), &TokenUsage::default(), 0.0);
        tracker.record_success(Duration::from_millis(300), &TokenUsage::default(), 0.0);
        assert!((tracker.metrics().average_latency_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_probe_failure_marks_unhealthy() {
        let tracker = HealthTracker::new();
        tracker.record_probe(false);
        assert_eq!(tracker.health().status, HealthStatus::Unhealthy);
        tracker.record_probe(true);
        assert_eq!(tracker.health().status, HealthStatus::Healthy);
        assert!(tracker.health().last_check.is_some());
    }

    #[test]
    fn test_unhealthy_survives_further_failures() {
        let tracker = HealthTracker::new();
        tracker.mark_unhealthy();
        tracker.record_failure(Duration::ZERO, false);
        assert_eq!(tracker.health().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_cache_hit_rate() {
        let tracker = HealthTracker::new();
        tracker.record_success(Duration::ZERO, &TokenUsage::default(), 0.0);
        tracker.record_cache_hit();
        assert!((tracker.metrics().cache_hit_rate() - 0.5).abs() < 1e-9);

        tracker.reset_metrics();
        assert_eq!(tracker.metrics(), ProviderMetrics::default());
    }

    #[test]
    fn test_rate_limit_wait() {
        let tracker = HealthTracker::new();
        tracker.update_rate_limit(RateLimitSnapshot {
            remaining: Some(0),
            reset_at: Some(Utc::now() + chrono::Duration::seconds(30)),
        });
        let wait = tracker.rate_limit_wait().unwrap();
        assert!(wait <= Duration::from_secs(30));
        assert!(wait > Duration::from_secs(25));

        tracker.update_rate_limit(RateLimitSnapshot {
            remaining: Some(10),
            reset_at: None,
        });
        assert!(tracker.rate_limit_wait().is_none());
    }
}
