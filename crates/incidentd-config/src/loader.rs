//! Configuration loader.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::InvalidValue {
            field: "env".to_string(),
            message: e.to_string(),
        })?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.incidentd`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AckPolicy, UnknownTaskPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.queue.poll_interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = ConfigLoader::load_str(include_str!("../../../config/incidentd.toml")).unwrap();
        assert_eq!(config.queue.max_retries, 3);
        assert!(config.handlers.notify.enabled);
        assert!(crate::ConfigValidator::validate(&config).is_valid());
    }

    #[test]
    fn test_expand_path() {
        let expanded = ConfigLoader::expand_path("~/.incidentd");
        assert!(!expanded.starts_with('~'));
    }

    #[test]
    fn test_load_queue_section() {
        let content = r#"
            [queue]
            poll_interval_ms = 250
            max_retries = 5
            unknown_task_policy = "dead_letter"

            [queue.ack_policies]
            llm_invoke = "before_execute"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.queue.poll_interval_ms, 250);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.unknown_task_policy, UnknownTaskPolicy::DeadLetter);
        assert_eq!(
            config.queue.ack_policies.get("llm_invoke"),
            Some(&AckPolicy::BeforeExecute)
        );
    }

    #[test]
    fn test_load_handler_sections() {
        let content = r#"
            [handlers.llm]
            endpoint = "http://localhost:9000/invoke"
            timeout_secs = 10

            [handlers.notify]
            webhook_url = "https://hooks.example.com/T000"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(
            config.handlers.llm.endpoint.as_deref(),
            Some("http://localhost:9000/invoke")
        );
        assert_eq!(config.handlers.llm.timeout_secs, 10);
        assert!(config.handlers.corrective.advisor_url.is_none());
        assert_eq!(
            config.handlers.notify.webhook_url.as_deref(),
            Some("https://hooks.example.com/T000")
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[queue]").unwrap();
        writeln!(file, "poll_interval_ms = 5000").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.queue.poll_interval_ms, 5000);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/incidentd.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_nonexistent_file() {
        let config =
            ConfigLoader::load_or_default(Path::new("/nonexistent/path/incidentd.toml")).unwrap();
        assert_eq!(config.queue.max_retries, 3);
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("INCIDENTD_TEST_CONFIG_VAR", "test_value");
        }
        let content = "value = \"${INCIDENTD_TEST_CONFIG_VAR}\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert!(expanded.contains("test_value"));
        unsafe {
            std::env::remove_var("INCIDENTD_TEST_CONFIG_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_INCIDENTD_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }
}
