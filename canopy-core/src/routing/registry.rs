//! Registered adapters with their circuit breakers

use crate::protocol::ModelRequest;
use crate::providers::{ProviderAdapter, ProviderHealth, ProviderMetrics};
use crate::routing::circuit::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::routing::selection::CandidateInfo;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Output tokens assumed when the request sets no ceiling
const ESTIMATE_OUTPUT_TOKENS: u32 = 500;

/// One adapter and the breaker guarding it
pub struct ProviderSlot {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub breaker: CircuitBreaker,
}

impl ProviderSlot {
    pub fn id(&self) -> &str {
        self.adapter.id()
    }
}

/// Per-provider state as reported by [`ProviderRegistry::snapshot`]
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub health: ProviderHealth,
    pub metrics: ProviderMetrics,
    pub breaker: BreakerSnapshot,
}

/// Adapters in registration order
#[derive(Default)]
pub struct ProviderRegistry {
    slots: Vec<ProviderSlot>,
    breaker_config: CircuitBreakerConfig,
}

impl ProviderRegistry {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            slots: Vec::new(),
            breaker_config,
        }
    }

    /// Add an adapter; a duplicate id replaces the earlier registration in place
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let slot = ProviderSlot {
            adapter,
            breaker: CircuitBreaker::new(self.breaker_config.clone()),
        };
        match self.slots.iter().position(|s| s.id() == slot.id()) {
            Some(index) => {
                warn!(provider = slot.id(), "Replacing registered provider");
                self.slots[index] = slot;
            }
            None => {
                debug!(provider = slot.id(), "Registered provider");
                self.slots.push(slot);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderSlot> {
        self.slots.iter().find(|slot| slot.id() == id)
    }

    pub fn slot(&self, index: usize) -> Option<&ProviderSlot> {
        self.slots.get(index)
    }

    pub fn ids(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Selection inputs for every slot, aligned with registration order
    pub fn candidates(&self, request: &ModelRequest) -> Vec<CandidateInfo> {
        self.slots
            .iter()
            .map(|slot| {
                let config = slot.adapter.config();
                CandidateInfo {
                    id: config.id.clone(),
                    capabilities: config.capabilities.clone(),
                    health: slot.adapter.health().health(),
                    breaker_admits: slot.breaker.would_admit(),
                    trial_eligible: slot.breaker.is_trial_eligible(),
                    estimated_cost: config.pricing.estimate(request, ESTIMATE_OUTPUT_TOKENS),
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> Vec<ProviderStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let (health, metrics) = slot.adapter.health().snapshot();
                ProviderStatus {
                    id: slot.id().to_string(),
                    health,
                    metrics,
                    breaker: slot.breaker.snapshot(),
                }
            })
            .collect()
    }

    /// Zero the counters of one provider; false when the id is unknown
    pub fn reset_metrics(&self, id: &str) -> bool {
        match self.get(id) {
            Some(slot) => {
                slot.adapter.health().reset_metrics();
                true
            }
            None => false,
        }
    }

    /// One independent probe task per adapter, stopped by `shutdown`
    pub fn spawn_health_checks(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        info!(
            providers = self.slots.len(),
            interval_secs = interval.as_secs(),
            "Starting health checks"
        );
        self.slots
            .iter()
            .map(|slot| {
                let adapter = Arc::clone(&slot.adapter);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = ticker.tick() => {
                                let available = tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    available = adapter.is_available() => available,
                                };
                                if !available {
                                    warn!(provider = adapter.id(), "Health probe failed");
                                }
                                adapter.health().record_probe(available);
                            }
                        }
                    }
                    debug!(provider = adapter.id(), "Health check task stopped");
                })
            })
            .collect()
    }
}
