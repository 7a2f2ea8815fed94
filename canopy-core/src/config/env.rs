//! Environment variable interpolation for configuration

use super::error::ConfigError;
use regex::{Captures, Regex};
use std::env;

const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Replace every `${VAR}` in a configuration document with its value
///
/// Fails on the first variable that is not set.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Invalid {
        message: format!("env var pattern: {}", e),
    })?;

    let mut missing = None;
    let result = pattern.replace_all(content, |cap: &Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::EnvVarNotFound { var }),
        None => Ok(result.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("CANOPY_TEST_VAR", "test_value");

        let content = "api_key: ${CANOPY_TEST_VAR}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "api_key: test_value");

        env::remove_var("CANOPY_TEST_VAR");
    }

    #[test]
    fn test_missing_env_var() {
        let content = "api_key: ${CANOPY_MISSING_VAR}";
        let result = interpolate_env_vars(content);

        if let Err(ConfigError::EnvVarNotFound { var }) = result {
            assert_eq!(var, "CANOPY_MISSING_VAR");
        } else {
            panic!("Expected EnvVarNotFound error");
        }
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("CANOPY_VAR1", "value1");
        env::set_var("CANOPY_VAR2", "value2");

        let content = "key1: ${CANOPY_VAR1}, key2: ${CANOPY_VAR2}, again: ${CANOPY_VAR1}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "key1: value1, key2: value2, again: value1");

        env::remove_var("CANOPY_VAR1");
        env::remove_var("CANOPY_VAR2");
    }

    #[test]
    fn test_lowercase_placeholders_are_left_alone() {
        let content = "note: ${not_a_var}";
        assert_eq!(interpolate_env_vars(content).unwrap(), content);
    }
}
