//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, RelayConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &RelayConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(config)?;
    validate_handler_sections(config)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is 'file'",
        ));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    for module in logging.filters.keys() {
        if module.is_empty() || module.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid module name in logging.filters: '{module}'"
            )));
        }
    }

    Ok(())
}

fn validate_dispatch_config(config: &RelayConfig) -> ConfigResult<()> {
    if config.dispatch.default_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "dispatch.default_timeout_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_handler_sections(config: &RelayConfig) -> ConfigResult<()> {
    for name in config.handlers.keys() {
        if name.is_empty() || name.contains(' ') {
            return Err(ConfigError::validation(format!(
                "Invalid handler section name: '{name}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = RelayConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("relay.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = RelayConfig::default();
        config.dispatch.default_timeout_ms = Some(0);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_handler_section_names() {
        let mut config = RelayConfig::default();
        config
            .handlers
            .insert("two words".to_string(), serde_json::Value::Null);
        assert!(validate_config(&config).is_err());
    }
}
