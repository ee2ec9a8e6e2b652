//! Plugin Loader
//!
//! Works through discovered references one at a time:
//!
//! ```text
//!   reference ──▶ resolve ──▶ compatibility gate ──▶ invoke (isolated) ──▶ commit
//!                   │                │                      │                 │
//!                   ▼                ▼                      ▼                 ▼
//!           resolution-failed   incompatible       registration-raised    loaded
//! ```
//!
//! A failure at any step is logged with the reference, recorded in the
//! [`LoadReport`], and loading continues with the next reference. Nothing an
//! extension staged is kept unless every step succeeded.

use axum::Router;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::catalog::{PluginCatalog, PluginDescriptor, PluginEntry};
use super::compat::{HOST_API_VERSION, check_compatibility};
use super::discovery::{DiscoveredReference, DiscoverySource};
use super::error::{BoxError, IncompatiblePluginError, LoadError, RegistrationError};
use super::handle::{PluginHandle, StagedContributions};
use super::isolation::{call_plugin_catching, call_plugin_preserving_error};
use super::lifecycle::Lifespan;
use super::mount::attach;
use super::registry::{Registration, ServiceMode, ServiceRegistry};
use crate::middleware::SessionGuard;

/// Final state of one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStatus {
    Loaded,
    ResolutionFailed,
    Incompatible,
    RegistrationRaised,
}

impl LoadStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadStatus::Loaded)
    }
}

impl From<&LoadError> for LoadStatus {
    fn from(error: &LoadError) -> Self {
        match error {
            LoadError::Resolution(_) => LoadStatus::ResolutionFailed,
            LoadError::Incompatible(_) => LoadStatus::Incompatible,
            LoadError::Registration(_) => LoadStatus::RegistrationRaised,
        }
    }
}

/// A service committed on behalf of an extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    pub name: String,
    pub mode: ServiceMode,
    /// False when a singleton of that name already existed
    pub accepted: bool,
}

/// What happened to one discovered reference
#[derive(Debug, Clone, Serialize)]
pub struct LoadRecord {
    pub reference: String,
    pub source: DiscoverySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub outcome: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub mounts: Vec<String>,
    pub services: Vec<ServiceRecord>,
    pub lifespans: Vec<String>,
}

impl LoadRecord {
    fn new(discovered: &DiscoveredReference) -> Self {
        Self {
            reference: discovered.reference.clone(),
            source: discovered.source.clone(),
            kind: None,
            outcome: LoadStatus::Loaded,
            error: None,
            mounts: Vec::new(),
            services: Vec::new(),
            lifespans: Vec::new(),
        }
    }

    fn failed(mut self, error: &LoadError) -> Self {
        self.outcome = LoadStatus::from(error);
        self.error = Some(error.to_string());
        self
    }
}

/// Ordered outcome of a load pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub records: Vec<LoadRecord>,
}

impl LoadReport {
    pub fn loaded(&self) -> impl Iterator<Item = &LoadRecord> {
        self.records.iter().filter(|r| r.outcome.is_loaded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &LoadRecord> {
        self.records.iter().filter(|r| !r.outcome.is_loaded())
    }

    pub fn count(&self, status: LoadStatus) -> usize {
        self.records.iter().filter(|r| r.outcome == status).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Everything a load pass produced
pub struct LoadedExtensions {
    /// Base router with every committed mount attached
    pub router: Router,
    /// Committed lifespan contributors, in registration order
    pub lifespans: Vec<Box<dyn Lifespan>>,
    pub report: LoadReport,
}

/// Result of checking a reference without invoking it
#[derive(Debug, Clone, Serialize)]
pub struct PreflightRecord {
    pub reference: String,
    pub source: DiscoverySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,
    /// `Loaded` here means the reference would be invoked
    pub outcome: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolves, gates, invokes and commits extensions
pub struct PluginLoader {
    catalog: Arc<PluginCatalog>,
    services: Arc<ServiceRegistry>,
    host_version: String,
    settings: HashMap<String, Value>,
    session_guard: SessionGuard,
}

impl PluginLoader {
    pub fn new(catalog: Arc<PluginCatalog>, services: Arc<ServiceRegistry>) -> Self {
        Self {
            catalog,
            services,
            host_version: HOST_API_VERSION.to_string(),
            settings: HashMap::new(),
            session_guard: SessionGuard::disabled(),
        }
    }

    /// Gate against a different host API version
    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = version.into();
        self
    }

    /// Per-extension settings, keyed by reference
    pub fn with_settings(mut self, settings: HashMap<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_session_guard(mut self, guard: SessionGuard) -> Self {
        self.session_guard = guard;
        self
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Load every reference in order, attaching mounts to `router`
    pub fn load<I>(&self, references: I, router: Router) -> LoadedExtensions
    where
        I: IntoIterator<Item = DiscoveredReference>,
    {
        let mut router = router;
        let mut lifespans = Vec::new();
        let mut report = LoadReport::default();

        for discovered in references {
            let (next, record, contributed) = self.load_one(&discovered, router);
            router = next;
            lifespans.extend(contributed);
            report.records.push(record);
        }

        tracing::info!(
            loaded = report.count(LoadStatus::Loaded),
            failed = report.len() - report.count(LoadStatus::Loaded),
            lifespans = lifespans.len(),
            "Extension loading complete"
        );

        LoadedExtensions {
            router,
            lifespans,
            report,
        }
    }

    /// Load a single reference
    ///
    /// Returns the router to continue with (unchanged on failure), the
    /// record, and any lifespans to add.
    fn load_one(
        &self,
        discovered: &DiscoveredReference,
        router: Router,
    ) -> (Router, LoadRecord, Vec<Box<dyn Lifespan>>) {
        let reference = discovered.reference.as_str();
        let mut record = LoadRecord::new(discovered);

        let descriptor = match self.gate(reference) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(reference = %reference, source = %discovered.source, error = %e, "Extension skipped");
                return (router, record.failed(&e), Vec::new());
            }
        };
        record.kind = Some(descriptor.entry.kind());

        let staged = match self.invoke(&descriptor) {
            Ok(staged) => staged,
            Err(e) => {
                let e = LoadError::from(e);
                tracing::error!(reference = %reference, error = %e, "Extension failed to register");
                return (router, record.failed(&e), Vec::new());
            }
        };

        let StagedContributions {
            mounts,
            services,
            lifespans,
        } = staged;

        // Routers first: a rejected merge discards the whole extension
        let mut candidate = router.clone();
        let mut prefixes = Vec::with_capacity(mounts.len());
        for mounted in &mounts {
            let base = candidate;
            candidate = match call_plugin_catching(AssertUnwindSafe(|| attach(base, mounted))) {
                Ok(next) => next,
                Err(message) => {
                    let e = LoadError::from(RegistrationError::MountConflict {
                        reference: reference.to_string(),
                        prefix: mounted.display_prefix().to_string(),
                        message,
                    });
                    tracing::error!(reference = %reference, error = %e, "Extension router rejected");
                    return (router, record.failed(&e), Vec::new());
                }
            };
            prefixes.push(mounted.display_prefix().to_string());
        }
        record.mounts = prefixes;

        for service in services {
            let registration =
                self.services
                    .register_from(reference, &service.name, service.mode, service.provider);
            record.services.push(ServiceRecord {
                name: service.name,
                mode: service.mode,
                accepted: registration != Registration::Ignored,
            });
        }

        record.lifespans = lifespans.iter().map(|l| l.name().to_string()).collect();

        tracing::info!(
            reference = %reference,
            source = %discovered.source,
            kind = record.kind.unwrap_or("unknown"),
            mounts = record.mounts.len(),
            services = record.services.len(),
            lifespans = record.lifespans.len(),
            "Extension loaded"
        );

        (candidate, record, lifespans)
    }

    /// Resolve and check compatibility
    fn gate(&self, reference: &str) -> Result<Arc<PluginDescriptor>, LoadError> {
        let descriptor = self.catalog.resolve(reference)?;
        check_compatibility(&self.host_version, descriptor.compatibility.as_deref()).map_err(
            |reason| IncompatiblePluginError {
                reference: reference.to_string(),
                reason,
            },
        )?;
        Ok(descriptor)
    }

    /// Run the callable with a fresh handle under panic isolation
    fn invoke(&self, descriptor: &PluginDescriptor) -> Result<StagedContributions, RegistrationError> {
        let reference = descriptor.reference.clone();
        let mut handle = PluginHandle::new(
            reference.clone(),
            self.services.clone(),
            self.settings.get(&reference).cloned().unwrap_or(Value::Null),
            self.session_guard.clone(),
        );

        call_plugin_preserving_error(
            AssertUnwindSafe(|| {
                run_entry(&descriptor.entry, &mut handle).map_err(|source| RegistrationError::Raised {
                    reference: reference.clone(),
                    source,
                })
            }),
            |message| RegistrationError::Panicked {
                reference: reference.clone(),
                message,
            },
        )?;

        Ok(handle.into_staged())
    }

    /// Resolve and gate every reference without invoking anything
    pub fn preflight<I>(&self, references: I) -> Vec<PreflightRecord>
    where
        I: IntoIterator<Item = DiscoveredReference>,
    {
        references
            .into_iter()
            .map(|discovered| {
                let descriptor = self.catalog.resolve(&discovered.reference).ok();
                let (outcome, error) = match self.gate(&discovered.reference) {
                    Ok(_) => (LoadStatus::Loaded, None),
                    Err(e) => (LoadStatus::from(&e), Some(e.to_string())),
                };
                PreflightRecord {
                    reference: discovered.reference,
                    source: discovered.source,
                    kind: descriptor.as_ref().map(|d| d.entry.kind()),
                    compatibility: descriptor.and_then(|d| d.compatibility.clone()),
                    outcome,
                    error,
                }
            })
            .collect()
    }
}

/// Invoke a resolved callable against a handle
fn run_entry(entry: &PluginEntry, handle: &mut PluginHandle) -> Result<(), BoxError> {
    match entry {
        PluginEntry::Extension(register) => register(handle),
        PluginEntry::Lifespan(factory) => {
            let lifespan = factory(handle)?;
            handle.contribute_boxed_lifespan(lifespan);
            Ok(())
        }
        PluginEntry::Components(contribute) => {
            let contribution = contribute(handle)?;
            handle.contribute(contribution)?;
            Ok(())
        }
    }
}
