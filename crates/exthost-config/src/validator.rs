//! Configuration validation.

use crate::schema::{Config, PartialActivationPolicy};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_extensions(config, &mut result);
        Self::validate_hooks(config, &mut result);
        Self::validate_mcp(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_extensions(config: &Config, result: &mut ValidationResult) {
        let ext = &config.extensions;

        if !ext.disable_auto_update && ext.update_check_interval_seconds == 0 {
            result.add_error(ValidationError::new(
                "extensions.update_check_interval_seconds",
                "Interval must be positive while automatic update checks are enabled",
            ));
        }

        if !ext.hot_reload {
            result.add_warning(ValidationWarning::new(
                "extensions.hot_reload",
                "Hot reload disabled; extension updates apply after a restart",
            ));
        }
    }

    fn validate_hooks(config: &Config, result: &mut ValidationResult) {
        if config.hooks.timeout_ms == 0 {
            result.add_error(ValidationError::new("hooks.timeout_ms", "Timeout must be positive"));
        } else if config.hooks.timeout_ms > 600_000 {
            result.add_warning(ValidationWarning::new(
                "hooks.timeout_ms",
                "Hook timeout over 10 minutes may stall agent turns",
            ));
        }
    }

    fn validate_mcp(config: &Config, result: &mut ValidationResult) {
        if config.mcp.connect_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "mcp.connect_timeout_ms",
                "Timeout must be positive",
            ));
        }

        if let PartialActivationPolicy::Fraction(fraction) = config.mcp.partial_activation {
            if !(fraction > 0.0 && fraction <= 1.0) {
                result.add_error(ValidationError::new(
                    "mcp.partial_activation",
                    format!("Fraction must be in (0, 1], got {}", fraction),
                ));
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = config.logging.level.to_lowercase();
        if !valid_levels.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!("Unknown log level '{}', it will be used as a filter directive", config.logging.level),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
