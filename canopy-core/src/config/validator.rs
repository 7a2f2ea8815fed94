//! Cross-section validation rules

use super::error::{ValidationError, ValidationErrorKind};
use super::schema::CanopyConfig;
use crate::cost::BudgetPeriod;

/// Configuration validator with rules spanning several sections
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &CanopyConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_enabled_providers(config)?;
        self.validate_budget(config)?;

        Ok(())
    }

    fn validate_enabled_providers(&self, config: &CanopyConfig) -> Result<(), ValidationError> {
        let enabled_count = config.providers.iter().filter(|p| p.enabled).count();
        if enabled_count == 0 {
            return Err(ValidationError::new(
                "providers",
                ValidationErrorKind::Custom {
                    message: "At least one provider must be enabled".to_string(),
                },
            ));
        }
        Ok(())
    }

    fn validate_budget(&self, config: &CanopyConfig) -> Result<(), ValidationError> {
        let budget = &config.budget;

        for period in BudgetPeriod::ALL {
            if let Some(limit) = budget.limit(period) {
                if limit <= 0.0 {
                    return Err(ValidationError::out_of_range(
                        format!("budget.{}", period.as_str()),
                        "Must be greater than 0",
                    ));
                }
            }
        }

        for (i, alert) in budget.alerts.iter().enumerate() {
            if !(alert.percentage > 0.0 && alert.percentage <= 100.0) {
                return Err(ValidationError::out_of_range(
                    format!("budget.alerts[{}].percentage", i),
                    "Must be in (0, 100]",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{AlertAction, AlertThreshold};

    fn config() -> CanopyConfig {
        serde_yaml::from_str(
            r#"
version: "0.1"
providers:
  - id: local
    type: ollama
    default_model: llama3
budget:
  daily: 10.0
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ConfigValidator::new().validate(&config()).is_ok());
    }

    #[test]
    fn test_all_disabled_is_rejected() {
        let mut config = config();
        config.providers[0].enabled = false;
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field_path, "providers");
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = config();
        config.budget.alerts.push(AlertThreshold {
            percentage: 120.0,
            action: AlertAction::Stop,
        });
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field_path, "budget.alerts[2].percentage");
    }

    #[test]
    fn test_non_positive_ceiling() {
        let mut config = config();
        config.budget.monthly = Some(0.0);
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field_path, "budget.monthly");
    }
}
