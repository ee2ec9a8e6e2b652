//! Error types for extension loading and lifespan composition
//!
//! Loading errors (`ResolutionError`, `IncompatiblePluginError`,
//! `RegistrationError`) are local to one plugin: the loader records them and
//! moves on. Lifespan errors are global: a failed enter phase aborts host
//! startup, and exit failures are reported together once every exit ran.

use std::fmt;

/// Error type returned by plugin callables and lifespan phases
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A plugin reference could not be turned into a callable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The reference is not of the form `module::path:function`
    #[error("Malformed extension reference '{reference}': {reason}")]
    Malformed { reference: String, reason: String },

    /// Nothing is exported under this reference
    #[error("No extension exported under '{reference}'")]
    NotFound { reference: String },
}

/// Why a declared compatibility range rejected the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncompatibilityReason {
    /// The plugin did not declare a range
    MissingRange,

    /// The declared range is not a valid semver requirement
    InvalidRange { range: String, message: String },

    /// The host API version itself does not parse
    InvalidHostVersion { version: String, message: String },

    /// The host version lies outside the declared range
    OutOfRange { required: String, host: String },
}

impl fmt::Display for IncompatibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompatibilityReason::MissingRange => {
                write!(f, "no compatibility range declared")
            }
            IncompatibilityReason::InvalidRange { range, message } => {
                write!(f, "invalid compatibility range '{}': {}", range, message)
            }
            IncompatibilityReason::InvalidHostVersion { version, message } => {
                write!(f, "invalid host API version '{}': {}", version, message)
            }
            IncompatibilityReason::OutOfRange { required, host } => {
                write!(f, "requires host API {}, host provides {}", required, host)
            }
        }
    }
}

/// The compatibility gate rejected a plugin before it was invoked
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Extension '{reference}' is incompatible: {reason}")]
pub struct IncompatiblePluginError {
    pub reference: String,
    pub reason: IncompatibilityReason,
}

/// The plugin's own registration callable failed
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The callable returned an error
    #[error("Extension '{reference}' failed to register: {source}")]
    Raised {
        reference: String,
        #[source]
        source: BoxError,
    },

    /// The callable panicked
    #[error("Extension '{reference}' panicked during registration: {message}")]
    Panicked { reference: String, message: String },

    /// A contributed router could not be merged into the host surface
    #[error("Extension '{reference}' could not mount router at '{prefix}': {message}")]
    MountConflict {
        reference: String,
        prefix: String,
        message: String,
    },
}

/// Any reason a single plugin did not load
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Incompatible(#[from] IncompatiblePluginError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Errors raised by the router mount policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MountError {
    #[error("Invalid mount prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },
}

/// Errors reported by the entry point metadata backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Entry point metadata unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read entry points for group '{group}': {message}")]
    Group { group: String, message: String },
}

/// One contributor's failure during enter, exit or unwind
#[derive(Debug)]
pub struct ContributorFailure {
    pub contributor: String,
    pub error: BoxError,
}

impl fmt::Display for ContributorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.contributor, self.error)
    }
}

fn join_failures(failures: &[ContributorFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A contributor's enter phase failed
///
/// Contributors entered before it have already been exited in reverse order
/// when this error is returned; their exit failures, if any, are attached.
#[derive(Debug, thiserror::Error)]
#[error("Lifespan '{contributor}' failed to start: {source}")]
pub struct LifespanEnterError {
    pub contributor: String,
    #[source]
    pub source: BoxError,
    pub unwind_failures: Vec<ContributorFailure>,
}

/// One or more contributors failed to shut down
#[derive(Debug, thiserror::Error)]
#[error("{} lifespan(s) failed to shut down: {}", .failures.len(), join_failures(.failures))]
pub struct LifespanExitError {
    pub failures: Vec<ContributorFailure>,
}

/// The combined enter phase did not complete
#[derive(Debug, thiserror::Error)]
pub enum LifespanStartupError {
    #[error(transparent)]
    Enter(#[from] LifespanEnterError),

    /// Shutdown was requested while contributors were still starting
    #[error("Startup cancelled after {entered} lifespan(s) entered")]
    Cancelled {
        entered: usize,
        unwind_failures: Vec<ContributorFailure>,
    },
}

/// A wrapped lifespan phase exceeded its time budget
#[derive(Debug, Clone, thiserror::Error)]
#[error("Lifespan '{contributor}' {phase} phase timed out after {elapsed_ms}ms")]
pub struct LifespanTimeout {
    pub contributor: String,
    pub phase: &'static str,
    pub elapsed_ms: u128,
}
