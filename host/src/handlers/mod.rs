//! HTTP request handlers
//!
//! This module organizes the host's own handlers:
//! - `extensions` - Health check and extension diagnostics

pub mod extensions;

// Re-export commonly used handlers for convenient access
pub use extensions::{health_check, list_extensions, list_services};
