pub mod config;
pub mod handlers;
pub mod middleware;
pub mod plugin;
pub mod routes;
pub mod server;
pub mod state;

// Used by the export and entry point macros
pub use inventory;

// Re-export commonly used items for convenience
pub use config::{ConfigError, HostConfig};
pub use plugin::compat::HOST_API_VERSION;
pub use plugin::registry::ServiceRegistry;
pub use server::{Host, ServeError};
pub use state::AppState;
