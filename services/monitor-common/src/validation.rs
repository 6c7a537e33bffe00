//! Configuration validation.
//!
//! Checks that cron expressions parse, timeouts are non-zero and the logging
//! section names a known level and format.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{Config, MarketConfig, ObservabilityConfig, ProviderConfig, SchedulerConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid cron expression for {field}: {reason}")]
    InvalidCron { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 4] = [
            &self.provider,
            &self.market,
            &self.scheduler,
            &self.observability,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "provider.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.page_size == 0 {
            return Err(ValidationError::InvalidValue {
                field: "provider.page_size".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for MarketConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ValidationError::InvalidValue {
                field: "market.utc_offset_hours".into(),
                reason: format!("{} is not a valid UTC offset", self.utc_offset_hours),
            });
        }
        Ok(())
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> ValidationResult<()> {
        for (field, expr) in [
            ("scheduler.ingest_cron", &self.ingest_cron),
            ("scheduler.calendar_cron", &self.calendar_cron),
        ] {
            cron::Schedule::from_str(expr).map_err(|e| ValidationError::InvalidCron {
                field: field.into(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_cron() {
        let mut config = Config::default();
        config.scheduler.ingest_cron = "every day at four".into();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCron { .. }));
        assert!(err.to_string().contains("scheduler.ingest_cron"));
    }

    #[test]
    fn test_multiple_errors() {
        let mut config = Config::default();
        config.provider.timeout_secs = 0;
        config.observability.log_level = "loud".into();

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_offset() {
        let market = MarketConfig { utc_offset_hours: 20 };
        assert!(market.validate().is_err());
    }
}
