use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_identity(config)?;
    validate_log_level(config)?;
    validate_stream(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_identity(config: &AppConfig) -> Result<(), ConfigError> {
    if config.provider.trim().is_empty() {
        return Err(validation_err("provider cannot be empty"));
    }
    if config.model.trim().is_empty() {
        return Err(validation_err("model cannot be empty"));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED", "TRACE",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is not one of {VALID_LOG_LEVELS:?}",
            config.features.log_level
        )));
    }
    Ok(())
}

fn validate_stream(config: &AppConfig) -> Result<(), ConfigError> {
    let stream = &config.stream;
    if stream.junk_tokens.iter().any(String::is_empty) {
        return Err(validation_err("stream.junk_tokens contains an empty token"));
    }
    if stream.internal_tools.iter().any(|name| name.trim().is_empty()) {
        return Err(validation_err(
            "stream.internal_tools contains an empty tool name",
        ));
    }
    if stream.max_consecutive_malformed_lines == Some(0) {
        return Err(validation_err(
            "stream.max_consecutive_malformed_lines must be greater than 0 when set",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = AppConfig::default();
        config.features.log_level = "loud".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("features.log_level"));
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let mut config = AppConfig::default();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_zero_malformed_limit() {
        let mut config = AppConfig::default();
        config.stream.max_consecutive_malformed_lines = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_empty_junk_token() {
        let mut config = AppConfig::default();
        config.stream.junk_tokens.push(String::new());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_blank_provider() {
        let mut config = AppConfig::default();
        config.provider = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }
}
