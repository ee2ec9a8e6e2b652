use std::env;

use super::ConfigError;
use crate::plugin::discovery::parse_reference_list;

/// Every variable read by [`EnvConfig::load`]
pub(super) const VARIABLES: [&str; 6] = [
    "HOST",
    "PORT",
    "EXTENSIONS",
    "EXTENSIONS_DISCOVER_ENTRY_POINTS",
    "EXTENSIONS_LIFESPAN_TIMEOUT_SECONDS",
    "SESSION_API_KEY",
];

/// Values taken from the process environment
#[derive(Debug, Default)]
pub(super) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub references: Option<Vec<String>>,
    pub discover_entry_points: Option<bool>,
    pub lifespan_timeout_seconds: Option<u64>,
    pub session_api_key: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host: var("HOST"),
            port: parse("PORT")?,
            references: var("EXTENSIONS").map(|v| parse_reference_list(&v)),
            discover_entry_points: parse_bool("EXTENSIONS_DISCOVER_ENTRY_POINTS")?,
            lifespan_timeout_seconds: parse("EXTENSIONS_LIFESPAN_TIMEOUT_SECONDS")?,
            session_api_key: var("SESSION_API_KEY"),
        })
    }
}

/// Non-empty trimmed value of `name`
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
                name,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    var(name)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnv {
                name,
                value,
                reason: "expected true or false".to_string(),
            }),
        })
        .transpose()
}
