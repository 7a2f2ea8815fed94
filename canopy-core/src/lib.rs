//! Canopy Core Library
//!
//! Model-provider orchestration for the Canopy cultivation assistant:
//! interchangeable backend adapters behind one request shape, health-aware
//! selection with retry, circuit breaking and fallback, a response cache,
//! a cost ledger with budget enforcement, and per-session history.

pub mod cache;
pub mod config;
pub mod conversation;
pub mod cost;
pub mod http;
pub mod protocol;
pub mod providers;
pub mod routing;
pub mod telemetry;

pub use cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
pub use config::{load_from_json, load_from_yaml, CanopyConfig, ConfigError};
pub use conversation::ConversationStore;
pub use cost::{Budget, BudgetAlert, BudgetPeriod, CostLedger, CostRecord};
pub use protocol::{Message, ModelRequest, ModelResponse, StreamEvent};
pub use providers::{ProviderAdapter, ProviderError, ProviderKind};
pub use routing::{QualityMode, Router, RouterError, SelectionCriteria};

/// Returns the version of the Canopy Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
