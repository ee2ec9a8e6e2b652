//! Plugin Catalog
//!
//! Maps plugin references to the callables they name. Extensions export
//! their callables at link time with the `export_*!` macros, which submit a
//! [`PluginExport`] to `inventory`. The catalog collects those submissions
//! into a lookup table, converting the function pointers into shared
//! closures so tests and embedders can register callables at runtime too.
//!
//! # Reference format
//!
//! ```text
//! my_extension::routes:register
//! ^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^
//!   module path         function
//! ```
//!
//! The module path uses `::` between segments; a single `:` separates it
//! from the function name. References produced by the export macros always
//! have this shape because they are built from `module_path!()`.

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{BoxError, ResolutionError};
use super::handle::{ComponentContribution, PluginHandle};
use super::lifecycle::Lifespan;

/// Registration callable of an extension
pub type ExtensionFn = fn(&mut PluginHandle) -> Result<(), BoxError>;

/// Callable producing a lifespan contributor
pub type LifespanFactoryFn = fn(&PluginHandle) -> Result<Box<dyn Lifespan>, BoxError>;

/// Callable producing a component contribution
pub type ComponentsFn = fn(&PluginHandle) -> Result<ComponentContribution, BoxError>;

/// What a link-time export points at
#[derive(Clone, Copy)]
pub enum ExportKind {
    Extension(ExtensionFn),
    Lifespan(LifespanFactoryFn),
    Components(ComponentsFn),
}

/// Link-time export submitted by the `export_*!` macros
///
/// Uses function pointers so it can be built in a const context, as
/// `inventory::submit!` requires.
pub struct PluginExport {
    /// Reference under which the callable is exported
    pub reference: &'static str,

    /// Host API versions the extension accepts
    pub compatibility: Option<&'static str>,

    pub kind: ExportKind,
}

impl PluginExport {
    pub const fn extension(
        reference: &'static str,
        compatibility: Option<&'static str>,
        register: ExtensionFn,
    ) -> Self {
        Self {
            reference,
            compatibility,
            kind: ExportKind::Extension(register),
        }
    }

    pub const fn lifespan(
        reference: &'static str,
        compatibility: Option<&'static str>,
        factory: LifespanFactoryFn,
    ) -> Self {
        Self {
            reference,
            compatibility,
            kind: ExportKind::Lifespan(factory),
        }
    }

    pub const fn components(
        reference: &'static str,
        compatibility: Option<&'static str>,
        contribute: ComponentsFn,
    ) -> Self {
        Self {
            reference,
            compatibility,
            kind: ExportKind::Components(contribute),
        }
    }
}

// Collect all exported callables at link time
inventory::collect!(PluginExport);

/// Shared extension callable
pub type ExtensionCallable =
    Arc<dyn Fn(&mut PluginHandle) -> Result<(), BoxError> + Send + Sync>;

/// Shared lifespan factory
pub type LifespanCallable =
    Arc<dyn Fn(&PluginHandle) -> Result<Box<dyn Lifespan>, BoxError> + Send + Sync>;

/// Shared component contribution callable
pub type ComponentsCallable =
    Arc<dyn Fn(&PluginHandle) -> Result<ComponentContribution, BoxError> + Send + Sync>;

/// A resolved callable, ready to be invoked by the loader
#[derive(Clone)]
pub enum PluginEntry {
    Extension(ExtensionCallable),
    Lifespan(LifespanCallable),
    Components(ComponentsCallable),
}

impl PluginEntry {
    /// Short name of the entry kind
    pub fn kind(&self) -> &'static str {
        match self {
            PluginEntry::Extension(_) => "extension",
            PluginEntry::Lifespan(_) => "lifespan",
            PluginEntry::Components(_) => "components",
        }
    }
}

impl From<ExportKind> for PluginEntry {
    fn from(kind: ExportKind) -> Self {
        match kind {
            ExportKind::Extension(f) => PluginEntry::Extension(Arc::new(f)),
            ExportKind::Lifespan(f) => PluginEntry::Lifespan(Arc::new(f)),
            ExportKind::Components(f) => PluginEntry::Components(Arc::new(f)),
        }
    }
}

/// Everything the loader needs to know about one exported callable
#[derive(Clone)]
pub struct PluginDescriptor {
    pub reference: String,
    pub compatibility: Option<String>,
    pub entry: PluginEntry,
}

impl PluginDescriptor {
    pub fn extension<F>(reference: &str, compatibility: Option<&str>, register: F) -> Self
    where
        F: Fn(&mut PluginHandle) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_entry(reference, compatibility, PluginEntry::Extension(Arc::new(register)))
    }

    pub fn lifespan<F>(reference: &str, compatibility: Option<&str>, factory: F) -> Self
    where
        F: Fn(&PluginHandle) -> Result<Box<dyn Lifespan>, BoxError> + Send + Sync + 'static,
    {
        Self::with_entry(reference, compatibility, PluginEntry::Lifespan(Arc::new(factory)))
    }

    pub fn components<F>(reference: &str, compatibility: Option<&str>, contribute: F) -> Self
    where
        F: Fn(&PluginHandle) -> Result<ComponentContribution, BoxError> + Send + Sync + 'static,
    {
        Self::with_entry(
            reference,
            compatibility,
            PluginEntry::Components(Arc::new(contribute)),
        )
    }

    fn with_entry(reference: &str, compatibility: Option<&str>, entry: PluginEntry) -> Self {
        Self {
            reference: reference.to_string(),
            compatibility: compatibility.map(str::to_string),
            entry,
        }
    }
}

impl From<&PluginExport> for PluginDescriptor {
    fn from(export: &PluginExport) -> Self {
        Self {
            reference: export.reference.to_string(),
            compatibility: export.compatibility.map(str::to_string),
            entry: export.kind.into(),
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("reference", &self.reference)
            .field("compatibility", &self.compatibility)
            .field("kind", &self.entry.kind())
            .finish()
    }
}

/// A syntactically valid reference split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReference<'a> {
    pub module: &'a str,
    pub function: &'a str,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s != "_" && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn malformed(reference: &str, reason: &str) -> ResolutionError {
    ResolutionError::Malformed {
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

/// Check that a reference has the `module::path:function` shape
pub fn parse_reference(reference: &str) -> Result<ParsedReference<'_>, ResolutionError> {
    let Some((module, function)) = reference.rsplit_once(':') else {
        return Err(malformed(reference, "expected 'module::path:function'"));
    };

    if module.ends_with(':') {
        return Err(malformed(
            reference,
            "function must follow a single ':' after the module path",
        ));
    }
    if module.is_empty() {
        return Err(malformed(reference, "module path is empty"));
    }
    if let Some(segment) = module.split("::").find(|segment| !is_identifier(segment)) {
        return Err(malformed(
            reference,
            &format!("'{}' is not a valid module path segment", segment),
        ));
    }
    if !is_identifier(function) {
        return Err(malformed(
            reference,
            &format!("'{}' is not a valid function name", function),
        ));
    }

    Ok(ParsedReference { module, function })
}

/// Lookup table from reference to callable
#[derive(Default)]
pub struct PluginCatalog {
    exports: HashMap<String, Arc<PluginDescriptor>>,
}

impl PluginCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from every export linked into the binary
    pub fn from_inventory() -> Self {
        let mut catalog = Self::new();
        for export in inventory::iter::<PluginExport> {
            catalog.register(PluginDescriptor::from(export));
        }
        tracing::debug!(exports = catalog.len(), "Plugin catalog built");
        catalog
    }

    /// Add a callable
    ///
    /// The first registration under a reference is kept; later ones are
    /// logged and dropped.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> bool {
        if self.exports.contains_key(&descriptor.reference) {
            tracing::warn!(
                reference = %descriptor.reference,
                "Duplicate plugin export ignored"
            );
            return false;
        }
        tracing::debug!(
            reference = %descriptor.reference,
            kind = descriptor.entry.kind(),
            "Registered plugin export"
        );
        self.exports
            .insert(descriptor.reference.clone(), Arc::new(descriptor));
        true
    }

    /// Turn a reference into its callable
    pub fn resolve(&self, reference: &str) -> Result<Arc<PluginDescriptor>, ResolutionError> {
        parse_reference(reference)?;
        self.exports
            .get(reference)
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound {
                reference: reference.to_string(),
            })
    }

    /// All exported references, sorted
    pub fn references(&self) -> Vec<&str> {
        let mut references: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        references.sort_unstable();
        references
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}
