//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use crate::cost::Budget;
use crate::providers::{Capabilities, Pricing, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CanopyConfig {
    /// Schema version (required - no default)
    pub version: String,

    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub budget: Budget,

    #[serde(default)]
    pub health_check: HealthCheckSettings,

    #[serde(default)]
    pub conversation: ConversationSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// One configured backend
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    /// Unique provider id
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ProviderKind,

    /// Credential; may be omitted for local backends
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Defaults to the backend's public endpoint
    #[serde(default)]
    pub base_url: Option<String>,

    pub default_model: String,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per routing round, overriding `retry.max_attempts`
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub pricing: Pricing,
}

impl ProviderEntry {
    /// Resolve into the immutable adapter description
    pub fn to_provider_config(&self, probe_timeout: Duration) -> ProviderConfig {
        let mut config = ProviderConfig::new(&self.id, self.kind, &self.default_model)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_capabilities(self.capabilities.clone())
            .with_pricing(self.pricing.clone());
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key.clone());
        }
        if let Some(attempts) = self.max_retries {
            config = config.with_max_attempts(attempts);
        }
        config.probe_timeout = probe_timeout;
        config
    }
}

/// Backoff between attempts on the same candidate
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter as a fraction of the delay (0.1 = ±10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Aggregate size ceiling in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl(),
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationSettings {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay() -> u64 { 1_000 }
fn default_max_delay() -> u64 { 10_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_jitter() -> f64 { 0.1 }
fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout() -> u64 { 60_000 }
fn default_ttl() -> u64 { 3_600 }
fn default_max_entries() -> usize { 10_000 }
fn default_max_bytes() -> usize { 500 * 1024 * 1024 }
fn default_sweep_interval() -> u64 { 300 }
fn default_health_interval() -> u64 { 60 }
fn default_probe_timeout() -> u64 { 5_000 }
fn default_max_messages() -> usize { 50 }
fn default_log_level() -> String { "info".to_string() }

const SUPPORTED_VERSION: &str = "0.1";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl CanopyConfig {
    /// Structural validation of the whole document
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }
        if self.version != SUPPORTED_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SUPPORTED_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        if self.providers.is_empty() {
            return Err(ValidationError::required("providers")
                .with_context("At least one provider must be configured"));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if !seen_ids.insert(&provider.id) {
                return Err(ValidationError::new(
                    format!("providers[{}].id", i),
                    ValidationErrorKind::DuplicateValue {
                        value: provider.id.clone(),
                    },
                ));
            }
            provider.validate(&format!("providers[{}]", i))?;
        }

        self.retry.validate("retry")?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ValidationError::out_of_range(
                "circuit_breaker.failure_threshold",
                "Must be greater than 0",
            ));
        }

        if self.cache.enabled && (self.cache.max_entries == 0 || self.cache.max_bytes == 0) {
            return Err(ValidationError::out_of_range(
                "cache",
                "max_entries and max_bytes must be greater than 0",
            ));
        }

        if self.conversation.max_messages == 0 {
            return Err(ValidationError::out_of_range(
                "conversation.max_messages",
                "Must be greater than 0",
            ));
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ValidationError::invalid_value(
                "logging.level",
                LOG_LEVELS.join("|"),
                self.logging.level.clone(),
            ));
        }

        Ok(())
    }
}

impl ProviderEntry {
    /// Validate provider configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::required(format!("{}.id", path)));
        }
        if self.default_model.is_empty() {
            return Err(ValidationError::required(format!("{}.default_model", path)));
        }

        if self.enabled && self.kind.requires_credential() {
            let missing = self.api_key.as_ref().map_or(true, |key| key.is_empty());
            if missing {
                return Err(ValidationError::required(format!("{}.api_key", path))
                    .with_context(format!("{:?} backends need a credential", self.kind)));
            }
        }

        if let Some(base_url) = &self.base_url {
            match url::Url::parse(base_url) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(url) => {
                    return Err(ValidationError::new(
                        format!("{}.base_url", path),
                        ValidationErrorKind::InvalidUrl {
                            message: format!(
                                "URL scheme must be http or https, got: {}",
                                url.scheme()
                            ),
                        },
                    ));
                }
                Err(e) => {
                    return Err(ValidationError::new(
                        format!("{}.base_url", path),
                        ValidationErrorKind::InvalidUrl {
                            message: e.to_string(),
                        },
                    ));
                }
            }
        }

        if self.timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.timeout_ms", path),
                "Must be greater than 0",
            ));
        }

        if self.max_retries == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{}.max_retries", path),
                "Must be greater than 0",
            ));
        }

        let pricing = &self.pricing;
        let negative = pricing.input_per_1k < 0.0
            || pricing.output_per_1k < 0.0
            || pricing.per_image.is_some_and(|cost| cost < 0.0);
        if negative {
            return Err(ValidationError::out_of_range(
                format!("{}.pricing", path),
                "Must be non-negative",
            ));
        }

        Ok(())
    }
}

impl RetrySettings {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.max_attempts", path),
                "Must be greater than 0",
            ));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(ValidationError::new(
                format!("{}.max_delay_ms", path),
                ValidationErrorKind::Incompatible {
                    message: "Must be >= base_delay_ms".to_string(),
                },
            ));
        }

        if self.multiplier <= 1.0 {
            return Err(ValidationError::out_of_range(
                format!("{}.multiplier", path),
                "Must be greater than 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ValidationError::out_of_range(
                format!("{}.jitter", path),
                "Must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}
