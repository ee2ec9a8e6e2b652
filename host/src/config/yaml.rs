use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// extensions:
///   references:
///     - "my_ext::routes:register"
///     - "other_ext:setup"
///   discover_entry_points: true
///   lifespan_timeout_seconds: 30
///   settings:
///     "my_ext::routes:register":
///       greeting: "hello"
///
/// auth:
///   session_api_key: "your-session-key"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub extensions: Option<ExtensionsYaml>,
    pub auth: Option<AuthYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Extension configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExtensionsYaml {
    pub references: Option<Vec<String>>,
    pub discover_entry_points: Option<bool>,
    pub lifespan_timeout_seconds: Option<u64>,
    /// Arbitrary per-extension values, handed to the extension as JSON
    pub settings: Option<HashMap<String, Value>>,
}

/// Authentication configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub session_api_key: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
extensions:
  references:
    - "a::b:register"
    - "c:setup"
  discover_entry_points: false
  lifespan_timeout_seconds: 10
  settings:
    "a::b:register":
      greeting: "hi"
      retries: 3
auth:
  session_api_key: "key"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(8080));

        let extensions = config.extensions.unwrap();
        assert_eq!(
            extensions.references,
            Some(vec!["a::b:register".to_string(), "c:setup".to_string()])
        );
        assert_eq!(extensions.discover_entry_points, Some(false));
        assert_eq!(extensions.lifespan_timeout_seconds, Some(10));
        let settings = extensions.settings.unwrap();
        assert_eq!(settings["a::b:register"]["retries"], 3);

        assert_eq!(config.auth.unwrap().session_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.extensions.is_none());
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "server:\n  port: 4000\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(config.server.unwrap().port, Some(4000));
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "server:\n  port: [not, a, port]\n").unwrap();

        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}
