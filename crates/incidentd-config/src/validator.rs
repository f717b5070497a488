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

        Self::validate_database(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_handlers(config, &mut result);

        result
    }

    fn validate_database(config: &Config, result: &mut ValidationResult) {
        if config.database.path.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "database.path",
                "Database path cannot be empty",
            ));
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        if config.queue.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "queue.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        } else if config.queue.poll_interval_ms < 50 {
            result.add_warning(ValidationWarning::new(
                "queue.poll_interval_ms",
                "poll interval below 50ms keeps the database busy while idle",
            ));
        }

        if config.queue.handler_timeout_secs == Some(0) {
            result.add_error(ValidationError::new(
                "queue.handler_timeout_secs",
                "handler_timeout_secs must be greater than 0 when set",
            ));
        }

        for tag in config.queue.ack_policies.keys() {
            if tag.trim().is_empty() {
                result.add_error(ValidationError::new(
                    "queue.ack_policies",
                    "task tag cannot be empty",
                ));
            }
        }
    }

    fn validate_handlers(config: &Config, result: &mut ValidationResult) {
        let urls = [
            ("handlers.llm.endpoint", config.handlers.llm.endpoint.as_deref()),
            (
                "handlers.corrective.advisor_url",
                config.handlers.corrective.advisor_url.as_deref(),
            ),
            (
                "handlers.notify.webhook_url",
                config.handlers.notify.webhook_url.as_deref(),
            ),
        ];

        for (path, url) in urls {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    result.add_error(ValidationError::new(
                        path,
                        "URL must start with http:// or https://",
                    ));
                }
            }
        }

        if config.handlers.llm.endpoint.is_none() {
            result.add_warning(ValidationWarning::new(
                "handlers.llm.endpoint",
                "endpoint not set, llm_invoke tasks will be treated as unknown",
            ));
        }

        if config.handlers.corrective.advisor_url.is_none() {
            result.add_warning(ValidationWarning::new(
                "handlers.corrective.advisor_url",
                "advisor_url not set, set_corrective_action tasks will be treated as unknown",
            ));
        }
    }
}
