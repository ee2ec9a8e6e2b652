use super::{ConfigError, HostConfig};

/// Validate a merged configuration
pub(super) fn validate(config: &HostConfig) -> Result<(), ConfigError> {
    validate_server(config)?;
    validate_extensions(config)?;
    validate_session_key(config.session_api_key.as_deref())?;
    Ok(())
}

fn validate_server(config: &HostConfig) -> Result<(), ConfigError> {
    if config.host.trim().is_empty() {
        return Err(ConfigError::Invalid("server host must not be empty".into()));
    }
    Ok(())
}

fn validate_extensions(config: &HostConfig) -> Result<(), ConfigError> {
    if config.extensions.lifespan_timeout_seconds == Some(0) {
        return Err(ConfigError::Invalid(
            "extensions.lifespan_timeout_seconds must be greater than zero".into(),
        ));
    }
    if config.extensions.settings.keys().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "extensions.settings keys must be extension references".into(),
        ));
    }
    // Malformed references are reported per extension at load time
    Ok(())
}

fn validate_session_key(key: Option<&str>) -> Result<(), ConfigError> {
    match key {
        Some(key) if key.chars().any(char::is_whitespace) => Err(ConfigError::Invalid(
            "auth.session_api_key must not contain whitespace".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&HostConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_empty_host() {
        let mut config = HostConfig::default();
        config.host = " ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_blank_settings_key() {
        let mut config = HostConfig::default();
        config.extensions.settings.insert("".to_string(), json!({}));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_session_key_whitespace() {
        assert!(validate_session_key(Some("abc def")).is_err());
        assert!(validate_session_key(Some("abcdef")).is_ok());
        assert!(validate_session_key(None).is_ok());
    }

    #[test]
    fn test_malformed_reference_is_not_a_config_error() {
        let mut config = HostConfig::default();
        config.extensions.references = vec!["not a reference".to_string()];
        assert!(validate(&config).is_ok());
    }
}
