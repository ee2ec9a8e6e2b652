//! Plugin Handle
//!
//! The capability object an extension receives while it registers. Every
//! contribution made through the handle is staged: the loader commits it to
//! the host surface only after the registration callable returned `Ok`, so a
//! failing extension leaves nothing behind.

use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use super::error::MountError;
use super::lifecycle::Lifespan;
use super::mount::MountedRouter;
use super::registry::{ServiceMode, ServiceProvider, ServiceRegistry};
use crate::middleware::SessionGuard;

/// A service waiting to be committed
pub(crate) struct StagedService {
    pub name: String,
    pub mode: ServiceMode,
    pub provider: ServiceProvider,
}

/// Everything one extension contributed during registration
#[derive(Default)]
pub(crate) struct StagedContributions {
    pub mounts: Vec<MountedRouter>,
    pub services: Vec<StagedService>,
    pub lifespans: Vec<Box<dyn Lifespan>>,
}

/// Declarative contribution returned by component exports
///
/// Routers are mounted additively; services are registered in the order
/// given, singletons before additive ones.
#[derive(Default)]
pub struct ComponentContribution {
    pub routers: Vec<(String, Router)>,
    pub singletons: Vec<(String, ServiceProvider)>,
    pub additive: Vec<(String, ServiceProvider)>,
    pub lifespans: Vec<Box<dyn Lifespan>>,
}

impl ComponentContribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(mut self, prefix: impl Into<String>, router: Router) -> Self {
        self.routers.push((prefix.into(), router));
        self
    }

    pub fn singleton(mut self, name: impl Into<String>, provider: ServiceProvider) -> Self {
        self.singletons.push((name.into(), provider));
        self
    }

    pub fn additive(mut self, name: impl Into<String>, provider: ServiceProvider) -> Self {
        self.additive.push((name.into(), provider));
        self
    }

    pub fn lifespan(mut self, lifespan: impl Lifespan + 'static) -> Self {
        self.lifespans.push(Box::new(lifespan));
        self
    }
}

/// Capability object passed to one extension's registration callable
pub struct PluginHandle {
    reference: String,
    services: Arc<ServiceRegistry>,
    settings: Value,
    session_guard: SessionGuard,
    staged: StagedContributions,
}

impl PluginHandle {
    pub fn new(
        reference: impl Into<String>,
        services: Arc<ServiceRegistry>,
        settings: Value,
        session_guard: SessionGuard,
    ) -> Self {
        Self {
            reference: reference.into(),
            services,
            settings,
            session_guard,
            staged: StagedContributions::default(),
        }
    }

    /// Reference this extension was loaded from
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Mount `router` under `prefix`
    ///
    /// The prefix is normalized; `""` and `"/"` mount at the host root.
    pub fn mount(&mut self, prefix: &str, router: Router) -> Result<(), MountError> {
        let mounted = MountedRouter::new(prefix, router)?;
        tracing::debug!(
            reference = %self.reference,
            prefix = %mounted.display_prefix(),
            "Router staged"
        );
        self.staged.mounts.push(mounted);
        Ok(())
    }

    /// Register a named service
    pub fn register_service(&mut self, name: &str, mode: ServiceMode, provider: ServiceProvider) {
        self.staged.services.push(StagedService {
            name: name.to_string(),
            mode,
            provider,
        });
    }

    /// Take part in host startup and shutdown
    pub fn contribute_lifespan(&mut self, lifespan: impl Lifespan + 'static) {
        self.contribute_boxed_lifespan(Box::new(lifespan));
    }

    pub(crate) fn contribute_boxed_lifespan(&mut self, lifespan: Box<dyn Lifespan>) {
        self.staged.lifespans.push(lifespan);
    }

    /// Stage every part of a component contribution
    pub fn contribute(&mut self, contribution: ComponentContribution) -> Result<(), MountError> {
        let ComponentContribution {
            routers,
            singletons,
            additive,
            lifespans,
        } = contribution;

        for (prefix, router) in routers {
            self.mount(&prefix, router)?;
        }
        for (name, provider) in singletons {
            self.register_service(&name, ServiceMode::Singleton, provider);
        }
        for (name, provider) in additive {
            self.register_service(&name, ServiceMode::Additive, provider);
        }
        for lifespan in lifespans {
            self.contribute_boxed_lifespan(lifespan);
        }
        Ok(())
    }

    /// Services committed by the host and previously loaded extensions
    ///
    /// Services this extension registered are not visible until it has
    /// been committed.
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Settings configured for this extension (`null` when none)
    pub fn settings(&self) -> &Value {
        &self.settings
    }

    /// Deserialize this extension's settings
    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.settings.clone())
    }

    /// The host's session key guard
    pub fn session_guard(&self) -> &SessionGuard {
        &self.session_guard
    }

    /// Require the host session key on every route of `router`
    pub fn protect(&self, router: Router) -> Router {
        self.session_guard.protect(router)
    }

    pub(crate) fn into_staged(self) -> StagedContributions {
        self.staged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::lifecycle::LifespanFn;
    use crate::plugin::BoxError;
    use axum::routing::get;
    use serde::Deserialize;

    fn handle(settings: Value) -> PluginHandle {
        PluginHandle::new(
            "tests::handle:register",
            Arc::new(ServiceRegistry::new()),
            settings,
            SessionGuard::disabled(),
        )
    }

    #[test]
    fn test_mount_normalizes_and_stages() {
        let mut handle = handle(Value::Null);
        handle
            .mount("test-extension/", Router::new().route("/health", get(|| async { "ok" })))
            .unwrap();
        handle.mount("/", Router::new()).unwrap();
        assert!(handle.mount("/{id}", Router::new()).is_err());

        let staged = handle.into_staged();
        let prefixes: Vec<&str> = staged.mounts.iter().map(|m| m.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["/test-extension", ""]);
    }

    #[test]
    fn test_services_are_staged_not_committed() {
        let mut handle = handle(Value::Null);
        handle.register_service(
            "conversation_manager",
            ServiceMode::Singleton,
            ServiceProvider::value("demo"),
        );

        assert!(handle.services().resolve("conversation_manager").is_none());
        assert_eq!(handle.into_staged().services.len(), 1);
    }

    #[test]
    fn test_contribute_stages_every_part() {
        let mut handle = handle(Value::Null);
        let contribution = ComponentContribution::new()
            .router("/a", Router::new())
            .router("b", Router::new())
            .singleton("one", ServiceProvider::value(1u8))
            .additive("many", ServiceProvider::value(2u8))
            .lifespan(LifespanFn::on_enter("noop", || async { Ok::<(), BoxError>(()) }));

        handle.contribute(contribution).unwrap();
        let staged = handle.into_staged();
        assert_eq!(staged.mounts.len(), 2);
        assert_eq!(staged.services.len(), 2);
        assert_eq!(staged.services[0].mode, ServiceMode::Singleton);
        assert_eq!(staged.services[1].mode, ServiceMode::Additive);
        assert_eq!(staged.lifespans.len(), 1);
    }

    #[test]
    fn test_settings_as() {
        #[derive(Deserialize)]
        struct Demo {
            greeting: String,
        }

        let handle = handle(serde_json::json!({ "greeting": "hello" }));
        let demo: Demo = handle.settings_as().unwrap();
        assert_eq!(demo.greeting, "hello");
    }
}
