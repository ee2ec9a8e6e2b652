//! Extension System
//!
//! This module loads independently packaged extensions into the running host:
//! - Discovery of configured references and declared entry points
//! - Resolution of references against link-time exports
//! - Compatibility gating against [`HOST_API_VERSION`]
//! - Router mounting under normalized prefixes
//! - Ordered composition of startup/shutdown scopes
//! - A first-wins service registry shared across extensions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Discovery ──▶ Catalog ──▶ Compat gate ──▶ PluginHandle ──▶ Commit    │
//! │ (config + entry points)   (semver)       (staged)     router/services│
//! │                                                        lifespans     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every stage is local to one extension: a failure is logged, recorded in
//! the [`LoadReport`] and loading continues with the next reference.
//!
//! # Usage
//!
//! ## Writing an Extension
//!
//! ```ignore
//! use extension_host::plugin::prelude::*;
//! use extension_host::{declare_entry_point, export_extension};
//!
//! fn register(handle: &mut PluginHandle) -> Result<(), BoxError> {
//!     handle.mount("/my-ext", Router::new().route("/health", get(|| async { "ok" })))?;
//!     handle.register_service(
//!         "conversation_manager",
//!         ServiceMode::Singleton,
//!         ServiceProvider::value("my-ext".to_string()),
//!     );
//!     Ok(())
//! }
//!
//! export_extension!(register, compatible = ">=1.0.0, <2.0.0");
//! declare_entry_point!(server_extensions, "my-ext", register);
//! ```
//!
//! ## Loading Extensions
//!
//! ```ignore
//! let catalog = Arc::new(PluginCatalog::from_inventory());
//! let services = Arc::new(ServiceRegistry::new());
//! let loaded = PluginLoader::new(catalog, services).load(&Discovery::new(refs), Router::new());
//! ```

pub mod builtin;
pub mod catalog;
pub mod compat;
pub mod discovery;
pub mod error;
pub mod handle;
pub mod isolation;
pub mod lifecycle;
pub mod loader;
#[macro_use]
pub mod macros;
pub mod mount;
pub mod registry;

// Re-exports for convenience
pub use catalog::{PluginCatalog, PluginDescriptor, PluginEntry, PluginExport};
pub use compat::{CompatibilityRange, HOST_API_VERSION, check_compatibility, is_compatible};
pub use discovery::{DiscoveredReference, Discovery, DiscoverySource, EntryPoint, EntryPointSource};
pub use error::{
    BoxError, DiscoveryError, IncompatiblePluginError, LifespanEnterError, LifespanExitError,
    LifespanStartupError, LoadError, MountError, RegistrationError, ResolutionError,
};
pub use handle::{ComponentContribution, PluginHandle};
pub use lifecycle::{CombinedLifespan, Lifespan, LifespanExt, LifespanFn, WithTimeout};
pub use loader::{LoadRecord, LoadReport, LoadStatus, LoadedExtensions, PluginLoader};
pub use mount::{MountedRouter, normalize_prefix};
pub use registry::{Registration, ServiceMode, ServiceProvider, ServiceRegistry};

/// Prelude module for convenient imports
///
/// Use this for extension development:
/// ```ignore
/// use extension_host::plugin::prelude::*;
/// ```
pub mod prelude {
    pub use super::error::BoxError;
    pub use super::handle::{ComponentContribution, PluginHandle};
    pub use super::lifecycle::{Lifespan, LifespanExt, LifespanFn};
    pub use super::registry::{ServiceMode, ServiceProvider, ServiceRegistry};

    // Re-export commonly needed external crates
    pub use async_trait::async_trait;
    pub use axum::Router;
    pub use axum::routing::{delete, get, post, put};
    pub use serde_json::Value;
    pub use std::sync::Arc;
}
