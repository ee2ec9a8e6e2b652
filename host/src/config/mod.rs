//! Configuration module for the extension host
//!
//! This module handles host configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use extension_host::config::HostConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = HostConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = HostConfig::from_file(Path::new("config.yaml"))?;
//!
//! println!("Host listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::middleware::SessionGuard;
use crate::plugin::discovery::Discovery;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Extension loading configuration
///
/// # Example YAML
/// ```yaml
/// extensions:
///   references:
///     - "my_ext::routes:register"
///   discover_entry_points: true
///   lifespan_timeout_seconds: 30
///   settings:
///     "my_ext::routes:register":
///       greeting: "hello"
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionsConfig {
    /// References loaded before any entry point, in order
    pub references: Vec<String>,
    /// Whether declared entry points are discovered after `references`
    /// Default: true
    pub discover_entry_points: bool,
    /// Bound on each extension lifespan's enter and exit phase
    /// Default: None (unbounded)
    pub lifespan_timeout_seconds: Option<u64>,
    /// Per-extension settings keyed by reference
    pub settings: HashMap<String, Value>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            references: Vec::new(),
            discover_entry_points: true,
            lifespan_timeout_seconds: None,
            settings: HashMap::new(),
        }
    }
}

/// Host configuration
#[derive(Clone)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
    pub extensions: ExtensionsConfig,
    /// Key required by routes wrapped with the session guard
    /// Default: None (guard passes every request through)
    pub session_api_key: Option<String>,
}

/// Zeroize the session key when the configuration is dropped.
impl Drop for HostConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.session_api_key {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("extensions", &self.extensions)
            .field(
                "session_api_key",
                &self.session_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: merge::DEFAULT_HOST.to_string(),
            port: merge::DEFAULT_PORT,
            extensions: ExtensionsConfig::default(),
            session_api_key: None,
        }
    }
}

impl HostConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded in main.rs before this runs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(env::EnvConfig::load()?, None);
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(env::EnvConfig::load()?, Some(yaml_config));
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-phase bound applied to extension lifespans
    pub fn lifespan_timeout(&self) -> Option<Duration> {
        self.extensions
            .lifespan_timeout_seconds
            .map(Duration::from_secs)
    }

    /// Discovery over the configured references
    pub fn discovery(&self) -> Discovery {
        let discovery = Discovery::new(self.extensions.references.clone());
        if self.extensions.discover_entry_points {
            discovery
        } else {
            discovery.without_entry_points()
        }
    }

    /// Session guard for the configured key
    pub fn session_guard(&self) -> SessionGuard {
        SessionGuard::new(self.session_api_key.as_deref())
    }

    pub fn has_session_key(&self) -> bool {
        self.session_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}
