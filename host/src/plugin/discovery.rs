//! Entry Discovery
//!
//! Produces the ordered list of plugin references the loader works through.
//! Two sources are concatenated in a fixed order:
//!
//! 1. references named in configuration (`EXTENSIONS` or
//!    `extensions.references`), in the order given
//! 2. entry points declared with `declare_entry_point!`, group by group in
//!    [`ENTRY_POINT_GROUPS`] order, sorted by `(name, reference)` inside
//!    each group
//!
//! Duplicates are kept: a reference listed twice is loaded twice.
//!
//! A backend that reports [`DiscoveryError::Unavailable`] ends entry point
//! discovery: groups already yielded stay yielded, later groups are never
//! queried. A [`DiscoveryError::Group`] failure skips only that group.
//!
//! Discovery is lazy. [`Discovery::iter`] queries entry point metadata only
//! once configured references are exhausted, and each call starts over.

use serde::Serialize;
use std::sync::Arc;

use super::error::DiscoveryError;

/// Group for extensions that register routers and services
pub const SERVER_EXTENSIONS: &str = "server_extensions";

/// Group for standalone lifespan contributors
pub const SERVER_LIFESPANS: &str = "server_lifespans";

/// Group for declarative component contributions
pub const COMPONENT_CONTRIBUTIONS: &str = "component_contributions";

/// Entry point groups, in discovery order
pub const ENTRY_POINT_GROUPS: [&str; 3] = [SERVER_EXTENSIONS, SERVER_LIFESPANS, COMPONENT_CONTRIBUTIONS];

/// Link-time entry point declaration
pub struct EntryPoint {
    pub group: &'static str,
    pub name: &'static str,
    pub reference: &'static str,
}

impl EntryPoint {
    pub const fn new(group: &'static str, name: &'static str, reference: &'static str) -> Self {
        Self {
            group,
            name,
            reference,
        }
    }
}

// Collect all entry point declarations at link time
inventory::collect!(EntryPoint);

/// Entry point as reported by a metadata backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryPointInfo {
    pub group: String,
    pub name: String,
    pub reference: String,
}

impl EntryPointInfo {
    pub fn new(group: &str, name: &str, reference: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            reference: reference.to_string(),
        }
    }
}

/// Backend that lists the entry points of a group
pub trait EntryPointSource: Send + Sync {
    fn entry_points(&self, group: &str) -> Result<Vec<EntryPointInfo>, DiscoveryError>;
}

/// Entry points linked into the binary with `declare_entry_point!`
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryEntryPoints;

impl EntryPointSource for InventoryEntryPoints {
    fn entry_points(&self, group: &str) -> Result<Vec<EntryPointInfo>, DiscoveryError> {
        Ok(inventory::iter::<EntryPoint>
            .into_iter()
            .filter(|ep| ep.group == group)
            .map(|ep| EntryPointInfo::new(ep.group, ep.name, ep.reference))
            .collect())
    }
}

/// Fixed list of entry points, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticEntryPoints {
    entries: Vec<EntryPointInfo>,
}

impl StaticEntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: &str, name: &str, reference: &str) -> Self {
        self.entries.push(EntryPointInfo::new(group, name, reference));
        self
    }
}

impl EntryPointSource for StaticEntryPoints {
    fn entry_points(&self, group: &str) -> Result<Vec<EntryPointInfo>, DiscoveryError> {
        Ok(self
            .entries
            .iter()
            .filter(|ep| ep.group == group)
            .cloned()
            .collect())
    }
}

/// Where a reference came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DiscoverySource {
    Config,
    EntryPoint { group: String, name: String },
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoverySource::Config => write!(f, "config"),
            DiscoverySource::EntryPoint { group, name } => write!(f, "{}:{}", group, name),
        }
    }
}

/// A reference together with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredReference {
    pub reference: String,
    pub source: DiscoverySource,
}

impl DiscoveredReference {
    pub fn configured(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            source: DiscoverySource::Config,
        }
    }
}

/// Split a configured reference list
///
/// Items are separated by `,`, `;` or newlines; surrounding whitespace is
/// trimmed and empty items are dropped.
pub fn parse_reference_list(value: &str) -> Vec<String> {
    value
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ordered reference discovery
#[derive(Clone)]
pub struct Discovery {
    configured: Vec<String>,
    source: Option<Arc<dyn EntryPointSource>>,
}

impl Discovery {
    /// Discover `configured` references, then linked entry points
    pub fn new(configured: Vec<String>) -> Self {
        Self {
            configured,
            source: Some(Arc::new(InventoryEntryPoints)),
        }
    }

    /// Discover from a raw configuration value such as `EXTENSIONS`
    pub fn from_config_value(value: &str) -> Self {
        Self::new(parse_reference_list(value))
    }

    /// Replace the entry point backend
    pub fn with_source(mut self, source: Arc<dyn EntryPointSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Skip entry points entirely
    pub fn without_entry_points(mut self) -> Self {
        self.source = None;
        self
    }

    pub fn configured(&self) -> &[String] {
        &self.configured
    }

    /// Lazily iterate over every discovered reference
    pub fn iter(&self) -> DiscoveryIter<'_> {
        DiscoveryIter {
            discovery: self,
            config_pos: 0,
            group_pos: 0,
            source_failed: false,
            pending: Vec::new().into_iter(),
        }
    }
}

impl<'a> IntoIterator for &'a Discovery {
    type Item = DiscoveredReference;
    type IntoIter = DiscoveryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("configured", &self.configured)
            .field("entry_points", &self.source.is_some())
            .finish()
    }
}

/// Iterator returned by [`Discovery::iter`]
pub struct DiscoveryIter<'a> {
    discovery: &'a Discovery,
    config_pos: usize,
    group_pos: usize,
    source_failed: bool,
    pending: std::vec::IntoIter<DiscoveredReference>,
}

impl DiscoveryIter<'_> {
    /// Query the next group, degrading to nothing if the backend fails
    fn load_group(&mut self, source: &dyn EntryPointSource, group: &str) {
        let mut entries = match source.entry_points(group) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(group = %group, error = %e, "Entry point discovery failed");
                if matches!(e, DiscoveryError::Unavailable(_)) {
                    self.source_failed = true;
                }
                Vec::new()
            }
        };
        entries.sort_by(|a, b| (&a.name, &a.reference).cmp(&(&b.name, &b.reference)));

        tracing::debug!(group = %group, count = entries.len(), "Entry points discovered");

        self.pending = entries
            .into_iter()
            .map(|ep| DiscoveredReference {
                reference: ep.reference,
                source: DiscoverySource::EntryPoint {
                    group: group.to_string(),
                    name: ep.name,
                },
            })
            .collect::<Vec<_>>()
            .into_iter();
    }
}

impl Iterator for DiscoveryIter<'_> {
    type Item = DiscoveredReference;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(reference) = self.discovery.configured.get(self.config_pos) {
            self.config_pos += 1;
            return Some(DiscoveredReference::configured(reference.clone()));
        }

        loop {
            if let Some(next) = self.pending.next() {
                return Some(next);
            }
            if self.source_failed {
                return None;
            }
            let discovery = self.discovery;
            let source = discovery.source.as_ref()?;
            let group = *ENTRY_POINT_GROUPS.get(self.group_pos)?;
            self.group_pos += 1;
            self.load_group(source.as_ref(), group);
        }
    }
}
