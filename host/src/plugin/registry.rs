//! Service Registry
//!
//! Named services shared between the host and its extensions. A service is
//! registered under a name in one of two modes:
//!
//! - **Singleton**: the first registration wins. Later registrations under
//!   the same name are ignored and logged at debug level, so the host (which
//!   registers its defaults before any extension runs) always keeps its own.
//! - **Additive**: every registration is appended, in registration order.
//!
//! Singleton and additive names live in separate tables, so the same name may
//! exist in both without interfering.
//!
//! # Architecture
//!
//! Both tables are `DashMap`s. Registration happens on the startup path,
//! before the combined lifespan is entered; after that the registry is read
//! from request handlers. Lazy providers are created on first resolve and
//! cached for the lifetime of the registry.
//!
//! # Usage
//!
//! ```ignore
//! use extension_host::plugin::{ServiceMode, ServiceProvider, ServiceRegistry};
//!
//! let registry = ServiceRegistry::new();
//! registry.register("conversation_manager", ServiceMode::Singleton,
//!     ServiceProvider::value("default".to_string()));
//! let name = registry.get::<String>("conversation_manager");
//! ```

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use super::isolation::call_plugin_catching;

/// A resolved service instance
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

/// Factory function type for lazily created services
pub type ServiceFactoryFn = Arc<dyn Fn() -> ServiceValue + Send + Sync>;

/// Origin recorded for services the host registers itself
pub const HOST_ORIGIN: &str = "host";

/// How registrations under one name combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// First registration wins
    Singleton,
    /// Every registration is kept, in order
    Additive,
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMode::Singleton => write!(f, "singleton"),
            ServiceMode::Additive => write!(f, "additive"),
        }
    }
}

/// Source of a service instance
#[derive(Clone)]
pub enum ServiceProvider {
    /// A ready value
    Value(ServiceValue),
    /// A factory invoked on first resolve; its product is cached
    Factory(ServiceFactoryFn),
}

impl ServiceProvider {
    /// Wrap a ready value
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        ServiceProvider::Value(Arc::new(value))
    }

    /// Wrap a factory producing `T` on first resolve
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        ServiceProvider::Factory(Arc::new(move || Arc::new(factory()) as ServiceValue))
    }

    /// Whether this provider defers creation
    pub fn is_lazy(&self) -> bool {
        matches!(self, ServiceProvider::Factory(_))
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceProvider::Value(_) => f.write_str("ServiceProvider::Value"),
            ServiceProvider::Factory(_) => f.write_str("ServiceProvider::Factory"),
        }
    }
}

/// Outcome of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A singleton was stored under a fresh name
    Stored,
    /// An additive service was appended at this index
    Appended(usize),
    /// A singleton already existed under this name; nothing changed
    Ignored,
}

/// One registered provider with its origin
struct ServiceEntry {
    provider: ServiceProvider,
    origin: String,
    instance: OnceLock<ServiceValue>,
}

impl ServiceEntry {
    fn new(origin: &str, provider: ServiceProvider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            origin: origin.to_string(),
            instance: OnceLock::new(),
        })
    }

    /// Produce the instance, invoking and caching the factory if needed
    ///
    /// A panicking factory yields `None` and is retried on the next resolve.
    fn value(&self, name: &str) -> Option<ServiceValue> {
        match &self.provider {
            ServiceProvider::Value(value) => Some(value.clone()),
            ServiceProvider::Factory(factory) => {
                // Concurrent first resolves block on the cell; a panic leaves it empty
                call_plugin_catching(AssertUnwindSafe(|| {
                    self.instance.get_or_init(|| factory()).clone()
                }))
                .map_err(|message| {
                    tracing::error!(
                        service = %name,
                        origin = %self.origin,
                        message = %message,
                        "Service factory panicked"
                    );
                })
                .ok()
            }
        }
    }
}

/// Diagnostic view of one registered name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescription {
    pub name: String,
    pub mode: ServiceMode,
    /// Number of providers (always 1 for singletons)
    pub count: usize,
    /// Who registered each provider, in order
    pub origins: Vec<String>,
    /// Whether any provider is still waiting to be created
    pub pending: bool,
}

/// Named service registry
pub struct ServiceRegistry {
    /// Singleton providers indexed by name
    singletons: DashMap<String, Arc<ServiceEntry>>,

    /// Additive providers indexed by name, in registration order
    additive: DashMap<String, Vec<Arc<ServiceEntry>>>,
}

impl ServiceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            singletons: DashMap::new(),
            additive: DashMap::new(),
        }
    }

    /// Register a service on behalf of the host
    pub fn register(&self, name: &str, mode: ServiceMode, provider: ServiceProvider) -> Registration {
        self.register_from(HOST_ORIGIN, name, mode, provider)
    }

    /// Register a service, recording which extension contributed it
    pub fn register_from(
        &self,
        origin: &str,
        name: &str,
        mode: ServiceMode,
        provider: ServiceProvider,
    ) -> Registration {
        let lazy = provider.is_lazy();
        let entry = ServiceEntry::new(origin, provider);

        let outcome = match mode {
            ServiceMode::Singleton => match self.singletons.entry(name.to_string()) {
                Entry::Occupied(existing) => {
                    tracing::debug!(
                        service = %name,
                        origin = %origin,
                        kept_origin = %existing.get().origin,
                        "Singleton already registered, ignoring"
                    );
                    return Registration::Ignored;
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                    Registration::Stored
                }
            },
            ServiceMode::Additive => {
                let mut providers = self.additive.entry(name.to_string()).or_default();
                providers.push(entry);
                Registration::Appended(providers.len() - 1)
            }
        };

        tracing::debug!(
            service = %name,
            mode = %mode,
            origin = %origin,
            lazy = lazy,
            "Registered service"
        );

        outcome
    }

    /// Resolve a singleton by name
    ///
    /// Missing names yield `None`, never an error.
    pub fn resolve(&self, name: &str) -> Option<ServiceValue> {
        let entry = self.singletons.get(name).map(|e| e.value().clone())?;
        // The map guard is released before any factory runs
        entry.value(name)
    }

    /// Resolve every additive provider under `name`, in registration order
    pub fn resolve_all(&self, name: &str) -> Vec<ServiceValue> {
        let entries = match self.additive.get(name) {
            Some(entries) => entries.value().clone(),
            None => return Vec::new(),
        };
        entries.iter().filter_map(|entry| entry.value(name)).collect()
    }

    /// Resolve a singleton and downcast it to `T`
    ///
    /// Returns `None` if the name is missing or holds another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.resolve(name)?.downcast::<T>().ok()
    }

    /// Resolve every additive provider under `name` that holds a `T`
    pub fn get_all<T: Any + Send + Sync>(&self, name: &str) -> Vec<Arc<T>> {
        self.resolve_all(name)
            .into_iter()
            .filter_map(|value| value.downcast::<T>().ok())
            .collect()
    }

    /// Check whether a name is registered in the given mode
    pub fn contains(&self, name: &str, mode: ServiceMode) -> bool {
        match mode {
            ServiceMode::Singleton => self.singletons.contains_key(name),
            ServiceMode::Additive => self.additive.contains_key(name),
        }
    }

    /// Origin of the singleton registered under `name`
    pub fn origin_of(&self, name: &str) -> Option<String> {
        self.singletons.get(name).map(|e| e.origin.clone())
    }

    /// Number of registered names across both tables
    pub fn len(&self) -> usize {
        self.singletons.len() + self.additive.len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Describe every registered name, sorted by name then mode
    pub fn describe(&self) -> Vec<ServiceDescription> {
        let mut descriptions: Vec<ServiceDescription> = self
            .singletons
            .iter()
            .map(|entry| ServiceDescription {
                name: entry.key().clone(),
                mode: ServiceMode::Singleton,
                count: 1,
                origins: vec![entry.origin.clone()],
                pending: entry.provider.is_lazy() && entry.instance.get().is_none(),
            })
            .chain(self.additive.iter().map(|entry| ServiceDescription {
                name: entry.key().clone(),
                mode: ServiceMode::Additive,
                count: entry.len(),
                origins: entry.iter().map(|e| e.origin.clone()).collect(),
                pending: entry
                    .iter()
                    .any(|e| e.provider.is_lazy() && e.instance.get().is_none()),
            }))
            .collect();

        descriptions.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| (a.mode as u8).cmp(&(b.mode as u8)))
        });
        descriptions
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("singletons", &self.singletons.len())
            .field("additive", &self.additive.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registry_new() {
        let registry = ServiceRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve("anything").is_none());
        assert!(registry.resolve_all("anything").is_empty());
    }

    #[test]
    fn test_singleton_first_registration_wins() {
        let registry = ServiceRegistry::new();

        let first = registry.register_from(
            "ext_a::plugin:register",
            "conversation_manager",
            ServiceMode::Singleton,
            ServiceProvider::value("first".to_string()),
        );
        let second = registry.register_from(
            "ext_b::plugin:register",
            "conversation_manager",
            ServiceMode::Singleton,
            ServiceProvider::value("second".to_string()),
        );

        assert_eq!(first, Registration::Stored);
        assert_eq!(second, Registration::Ignored);
        assert_eq!(
            registry.get::<String>("conversation_manager").as_deref(),
            Some(&"first".to_string())
        );
        assert_eq!(
            registry.origin_of("conversation_manager").as_deref(),
            Some("ext_a::plugin:register")
        );
    }

    #[test]
    fn test_additive_preserves_order() {
        let registry = ServiceRegistry::new();

        for (i, label) in ["a", "b", "c"].into_iter().enumerate() {
            let outcome =
                registry.register("routers", ServiceMode::Additive, ServiceProvider::value(label));
            assert_eq!(outcome, Registration::Appended(i));
        }

        let labels: Vec<&str> = registry
            .get_all::<&'static str>("routers")
            .iter()
            .map(|s| **s)
            .collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_modes_use_separate_tables() {
        let registry = ServiceRegistry::new();
        registry.register("shared", ServiceMode::Singleton, ServiceProvider::value(1u32));
        registry.register("shared", ServiceMode::Additive, ServiceProvider::value(2u32));

        assert_eq!(registry.get::<u32>("shared").as_deref(), Some(&1));
        assert_eq!(registry.get_all::<u32>("shared").len(), 1);
        assert_eq!(*registry.get_all::<u32>("shared")[0], 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_factory_runs_once_and_is_cached() {
        let registry = ServiceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        registry.register(
            "clock",
            ServiceMode::Singleton,
            ServiceProvider::factory(move || counter.fetch_add(1, Ordering::SeqCst)),
        );

        assert!(registry.describe()[0].pending);
        let first = registry.get::<usize>("clock").unwrap();
        let second = registry.get::<usize>("clock").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.describe()[0].pending);
    }

    #[test]
    fn test_panicking_factory_resolves_to_none() {
        let registry = ServiceRegistry::new();
        registry.register(
            "broken",
            ServiceMode::Singleton,
            ServiceProvider::factory(|| -> u8 { panic!("factory exploded") }),
        );

        assert!(registry.resolve("broken").is_none());
        assert!(registry.contains("broken", ServiceMode::Singleton));
    }

    #[test]
    fn test_concurrent_first_resolves_share_one_instance() {
        let registry = Arc::new(ServiceRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register(
            "slow",
            ServiceMode::Singleton,
            ServiceProvider::factory(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(100));
                String::from("ready")
            }),
        );

        let barrier = Arc::new(std::sync::Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get::<String>("slow").unwrap()
                })
            })
            .collect();
        let instances: Vec<Arc<String>> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[test]
    fn test_factory_is_retried_after_panic() {
        let registry = ServiceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register(
            "flaky",
            ServiceMode::Singleton,
            ServiceProvider::factory(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first attempt fails");
                }
                7u32
            }),
        );

        assert!(registry.resolve("flaky").is_none());
        assert_eq!(*registry.get::<u32>("flaky").unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_with_wrong_type_is_none() {
        let registry = ServiceRegistry::new();
        registry.register("port", ServiceMode::Singleton, ServiceProvider::value(8080u16));

        assert!(registry.get::<String>("port").is_none());
        assert!(registry.get::<u16>("port").is_some());
    }

    #[test]
    fn test_describe_is_sorted_with_origins() {
        let registry = ServiceRegistry::new();
        registry.register_from("ext::b:register", "zeta", ServiceMode::Additive, ServiceProvider::value(()));
        registry.register_from("ext::c:register", "zeta", ServiceMode::Additive, ServiceProvider::value(()));
        registry.register("alpha", ServiceMode::Singleton, ServiceProvider::value(()));

        let described = registry.describe();
        assert_eq!(described.len(), 2);
        assert_eq!(described[0].name, "alpha");
        assert_eq!(described[0].origins, vec![HOST_ORIGIN.to_string()]);
        assert_eq!(described[1].name, "zeta");
        assert_eq!(described[1].mode, ServiceMode::Additive);
        assert_eq!(described[1].count, 2);
        assert_eq!(
            described[1].origins,
            vec!["ext::b:register".to_string(), "ext::c:register".to_string()]
        );
    }
}
