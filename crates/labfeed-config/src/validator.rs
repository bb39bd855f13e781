//! Configuration validation.

use crate::schema::Config;

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

    /// All errors on one line, `path: message` separated by `; `.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
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

        Self::validate_broadcast(config, &mut result);
        Self::validate_connection(config, &mut result);
        Self::validate_reconnect(config, &mut result);

        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new("logging.level", "Log level cannot be empty"));
        }

        result
    }

    fn validate_broadcast(config: &Config, result: &mut ValidationResult) {
        let broadcast = &config.broadcast;

        if broadcast.app_key.trim().is_empty() {
            result.add_error(ValidationError::new(
                "broadcast.app_key",
                "Application key must be set",
            ));
        }

        let has_host = broadcast.host.as_deref().is_some_and(|h| !h.trim().is_empty());
        if !has_host && broadcast.cluster.trim().is_empty() {
            result.add_error(ValidationError::new(
                "broadcast.cluster",
                "Cluster must be set when no host is configured",
            ));
        }

        if broadcast.port == Some(0) {
            result.add_error(ValidationError::new("broadcast.port", "Port cannot be 0"));
        }

        if !broadcast.force_tls {
            result.add_warning(ValidationWarning::new(
                "broadcast.force_tls",
                "TLS is disabled, events will travel unencrypted",
            ));
        }
    }

    fn validate_connection(config: &Config, result: &mut ValidationResult) {
        let connection = &config.connection;

        for (path, value) in [
            ("connection.connect_timeout_secs", connection.connect_timeout_secs),
            ("connection.activity_timeout_secs", connection.activity_timeout_secs),
            ("connection.pong_timeout_secs", connection.pong_timeout_secs),
        ] {
            if value == 0 {
                result.add_error(ValidationError::new(path, "Timeout must be greater than 0"));
            }
        }
    }

    fn validate_reconnect(config: &Config, result: &mut ValidationResult) {
        let reconnect = &config.reconnect;

        if reconnect.initial_delay_ms == 0 {
            result.add_error(ValidationError::new(
                "reconnect.initial_delay_ms",
                "initial_delay_ms must be greater than 0",
            ));
        }

        if !(reconnect.multiplier >= 1.0) {
            result.add_error(ValidationError::new(
                "reconnect.multiplier",
                "multiplier must be at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&reconnect.jitter) {
            result.add_error(ValidationError::new(
                "reconnect.jitter",
                "jitter must be between 0.0 and 1.0",
            ));
        }

        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            result.add_warning(ValidationWarning::new(
                "reconnect.max_delay_ms",
                "max_delay_ms is below initial_delay_ms, every retry will wait max_delay_ms",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
