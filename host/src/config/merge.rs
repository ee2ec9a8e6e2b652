use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ExtensionsConfig, HostConfig};

pub(super) const DEFAULT_HOST: &str = "0.0.0.0";
pub(super) const DEFAULT_PORT: u16 = 3001;

/// Merge environment values (base) with YAML overrides
pub(super) fn merge_config(env: EnvConfig, yaml: Option<YamlConfig>) -> HostConfig {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let extensions = yaml.extensions.unwrap_or_default();
    let auth = yaml.auth.unwrap_or_default();
    let defaults = ExtensionsConfig::default();

    HostConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        extensions: ExtensionsConfig {
            references: extensions
                .references
                .or(env.references)
                .unwrap_or(defaults.references),
            discover_entry_points: extensions
                .discover_entry_points
                .or(env.discover_entry_points)
                .unwrap_or(defaults.discover_entry_points),
            lifespan_timeout_seconds: extensions
                .lifespan_timeout_seconds
                .or(env.lifespan_timeout_seconds),
            settings: extensions.settings.unwrap_or(defaults.settings),
        },
        session_api_key: auth.session_api_key.or(env.session_api_key),
    }
}
