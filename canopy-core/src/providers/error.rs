//! Provider error types and handling

use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when calling a single backend
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Rate limit exceeded, retry after specified duration
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    /// Request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Temporary server error (5xx)
    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Invalid request that should not be retried (4xx)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Authentication failure
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Model not available or unsupported
    #[error("Model '{model}' not available")]
    ModelNotAvailable { model: String },

    /// Generic network error
    #[error("Network error: {message}")]
    Network { message: String },

    /// Response body could not be mapped to the canonical shape
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The adapter does not offer what the request asks for
    #[error("Unsupported by {provider}: {feature}")]
    Unsupported { provider: String, feature: String },

    /// Adapter misconfiguration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Determine if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Timeout(_) => true,
            Self::ServerError { .. } => true,
            Self::Network { .. } => true,
            Self::Parse(_) => true,
            Self::ModelNotAvailable { .. } => false,
            Self::InvalidRequest { .. } => false,
            Self::Authentication(_) => false,
            Self::Unsupported { .. } => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get the delay the backend asked for, if any
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimit { retry_after: None }.is_retryable());
        assert!(ProviderError::ServerError {
            status_code: 503,
            message: "overloaded".to_string()
        }
        .is_retryable());
        assert!(!ProviderError::Authentication("bad key".to_string()).is_retryable());
        assert!(!ProviderError::InvalidRequest {
            message: "nope".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_rate_limit_display() {
        let err = ProviderError::RateLimit {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 2s");
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(2)));
    }
}
