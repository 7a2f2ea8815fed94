//! Caller-facing routing errors

use crate::config::ConfigError;
use crate::cost::{BudgetExceeded, BudgetPeriod};
use crate::providers::ProviderError;
use crate::routing::selection::SelectionError;
use thiserror::Error;

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    /// No registered adapter offers what the request needs; never retried
    #[error("No provider supports the required capability: {requirement}")]
    CapabilityMismatch { requirement: String },

    /// Capable adapters exist but all are unhealthy, open, or excluded
    #[error("No healthy provider is available")]
    NoHealthyProviders,

    /// Every candidate failed
    #[error("All providers failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },

    /// A `stop` budget threshold refused dispatch
    #[error("{period} budget exceeded: spent ${spent:.4} of ${limit:.4}")]
    BudgetExceeded {
        period: BudgetPeriod,
        spent: f64,
        limit: f64,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RouterError {
    /// The adapter error behind an exhausted request
    pub fn last_provider_error(&self) -> Option<&ProviderError> {
        match self {
            RouterError::Exhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl From<BudgetExceeded> for RouterError {
    fn from(err: BudgetExceeded) -> Self {
        RouterError::BudgetExceeded {
            period: err.period,
            spent: err.spent,
            limit: err.limit,
        }
    }
}

impl From<SelectionError> for RouterError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::CapabilityMismatch { requirement } => {
                RouterError::CapabilityMismatch { requirement }
            }
            SelectionError::NoHealthyProviders => RouterError::NoHealthyProviders,
        }
    }
}

impl From<ConfigError> for RouterError {
    fn from(err: ConfigError) -> Self {
        RouterError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_error_carries_window() {
        let err: RouterError = BudgetExceeded {
            period: BudgetPeriod::Daily,
            spent: 0.96,
            limit: 1.0,
        }
        .into();
        assert!(matches!(
            err,
            RouterError::BudgetExceeded {
                period: BudgetPeriod::Daily,
                ..
            }
        ));
        assert_eq!(err.to_string(), "daily budget exceeded: spent $0.9600 of $1.0000");
    }

    #[test]
    fn test_exhausted_exposes_last_error() {
        let err = RouterError::Exhausted {
            attempts: 3,
            last: ProviderError::Timeout(std::time::Duration::from_secs(30)),
        };
        assert!(err.last_provider_error().is_some_and(ProviderError::is_timeout));
        assert!(RouterError::Cancelled.last_provider_error().is_none());
    }
}
