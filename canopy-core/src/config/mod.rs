//! Configuration loading and validation
//!
//! A `CanopyConfig` is read once at startup from YAML or JSON, with `${VAR}`
//! placeholders resolved from the environment, then validated. It is never
//! reloaded.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::interpolate_env_vars;
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    CacheSettings, CanopyConfig, CircuitBreakerSettings, ConversationSettings,
    HealthCheckSettings, LoggingSettings, ProviderEntry, RetrySettings,
};
pub use secrets::SecretString;
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

fn read(path: &Path) -> ConfigResult<String> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    env::interpolate_env_vars(&content)
}

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<CanopyConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<CanopyConfig> {
    let path = path.as_ref();
    let content = read(path)?;

    let config: CanopyConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Parse and validate an in-memory YAML document
///
/// `${VAR}` placeholders are resolved first, as with [`load_from_yaml`].
pub fn load_from_yaml_str(content: &str) -> ConfigResult<CanopyConfig> {
    let content = env::interpolate_env_vars(content)?;
    parse_yaml(&content, "<inline>")
}

fn parse_yaml(content: &str, origin: &str) -> ConfigResult<CanopyConfig> {
    let config: CanopyConfig =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_valid_yaml_str() {
        std::env::set_var("CANOPY_MOD_TEST_KEY", "sk-test-abcdef123456");
        let yaml = r#"
version: "0.1"
providers:
  - id: openai
    type: openai
    api_key: ${CANOPY_MOD_TEST_KEY}
    default_model: gpt-4o-mini
    capabilities:
      vision: true
      json_mode: true
    pricing:
      input_per_1k: 0.00015
      output_per_1k: 0.0006
  - id: local
    type: ollama
    default_model: llama3
budget:
  daily: 5.0
  alerts:
    - percentage: 75
      action: warn
"#;
        let config = load_from_yaml_str(yaml).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(
            config.providers[0].api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-test-abcdef123456")
        );
        assert!(config.providers[0].capabilities.vision);
        assert_eq!(config.budget.alerts.len(), 1);
        std::env::remove_var("CANOPY_MOD_TEST_KEY");
    }

    #[test]
    fn test_parse_error_reports_location() {
        let err = load_from_yaml_str("version: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
