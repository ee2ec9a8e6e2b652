//! Built-in Extension
//!
//! A small extension compiled into the host. It exercises every part of the
//! handle API and doubles as a template for out-of-tree extensions.
//!
//! # Routes
//!
//! - `GET /builtin/health` - health and lifespan state
//! - `GET /builtin/secure-health` - same, behind the session key guard
//! - `GET /builtin/components/status` - mounted by the component contribution
//!
//! # Services
//!
//! - `builtin.state` (singleton) - shared [`BuiltinState`]
//! - `conversation_manager` (singleton) - name of the conversation manager
//! - `health_checks` (additive) - paths other extensions may probe

use axum::{Json, Router, extract::State, routing::get};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::plugin::error::BoxError;
use crate::plugin::handle::{ComponentContribution, PluginHandle};
use crate::plugin::lifecycle::LifespanFn;
use crate::plugin::registry::{ServiceMode, ServiceProvider};
use crate::{declare_entry_point, export_components, export_extension};

/// Mount prefix of the built-in extension
pub const PREFIX: &str = "/builtin";

/// Name registered for the built-in conversation manager
pub const CONVERSATION_MANAGER: &str = "builtin";

/// Service name under which [`BuiltinState`] is registered
pub const STATE_SERVICE: &str = "builtin.state";

/// Compatibility range of the built-in exports
const COMPATIBLE: &str = ">=1.0.0, <2.0.0";

/// State shared between the built-in routes and its lifespan
#[derive(Debug, Default)]
pub struct BuiltinState {
    started: AtomicBool,
    greeting: String,
}

impl BuiltinState {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuiltinSettings {
    greeting: Option<String>,
}

async fn health(State(state): State<Arc<BuiltinState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "extension": "builtin",
        "started": state.is_started(),
        "greeting": state.greeting(),
    }))
}

async fn secure_health(State(state): State<Arc<BuiltinState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "extension": "builtin",
        "secure": true,
        "started": state.is_started(),
    }))
}

async fn components_status() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "conversation_manager": CONVERSATION_MANAGER,
    }))
}

/// Register the built-in routes, state service and lifespan
pub fn register_builtin(handle: &mut PluginHandle) -> Result<(), BoxError> {
    let settings: BuiltinSettings = if handle.settings().is_null() {
        BuiltinSettings::default()
    } else {
        handle.settings_as()?
    };

    let state = Arc::new(BuiltinState {
        started: AtomicBool::new(false),
        greeting: settings.greeting.unwrap_or_else(|| "hello".to_string()),
    });

    let public = Router::new()
        .route("/health", get(health))
        .with_state(state.clone());
    let secure = handle.protect(
        Router::new()
            .route("/secure-health", get(secure_health))
            .with_state(state.clone()),
    );
    handle.mount(PREFIX, public.merge(secure))?;

    handle.register_service(
        STATE_SERVICE,
        ServiceMode::Singleton,
        ServiceProvider::Value(state.clone()),
    );

    let (on, off) = (state.clone(), state);
    handle.contribute_lifespan(LifespanFn::new(
        "builtin",
        move || {
            let state = on.clone();
            async move {
                state.started.store(true, Ordering::SeqCst);
                tracing::info!("Built-in extension started");
                Ok::<(), BoxError>(())
            }
        },
        move || {
            let state = off.clone();
            async move {
                state.started.store(false, Ordering::SeqCst);
                tracing::info!("Built-in extension stopped");
                Ok::<(), BoxError>(())
            }
        },
    ));

    Ok(())
}

/// Contribute the component router and the conversation manager name
pub fn contribute_builtin_components(
    _handle: &PluginHandle,
) -> Result<ComponentContribution, BoxError> {
    Ok(ComponentContribution::new()
        .router(
            format!("{}/components", PREFIX),
            Router::new().route("/status", get(components_status)),
        )
        .singleton(
            "conversation_manager",
            ServiceProvider::value(CONVERSATION_MANAGER.to_string()),
        )
        .additive("health_checks", ServiceProvider::value(format!("{}/health", PREFIX))))
}

export_extension!(register_builtin, compatible = COMPATIBLE);
export_components!(contribute_builtin_components, compatible = COMPATIBLE);
declare_entry_point!(server_extensions, "builtin", register_builtin);
declare_entry_point!(component_contributions, "builtin-components", contribute_builtin_components);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::SessionGuard;
    use crate::plugin::registry::ServiceRegistry;

    fn handle(settings: Value) -> PluginHandle {
        PluginHandle::new(
            crate::plugin_reference!(register_builtin),
            Arc::new(ServiceRegistry::new()),
            settings,
            SessionGuard::new(Some("secret")),
        )
    }

    #[tokio::test]
    async fn test_register_builtin_stages_everything() {
        let mut handle = handle(json!({ "greeting": "hi there" }));
        register_builtin(&mut handle).unwrap();

        let mut staged = handle.into_staged();
        assert_eq!(staged.mounts.len(), 1);
        assert_eq!(staged.mounts[0].prefix, PREFIX);
        assert_eq!(staged.services[0].name, STATE_SERVICE);
        assert_eq!(staged.lifespans.len(), 1);

        let state = match &staged.services[0].provider {
            ServiceProvider::Value(value) => value.clone().downcast::<BuiltinState>().unwrap(),
            ServiceProvider::Factory(_) => panic!("expected a ready value"),
        };
        assert_eq!(state.greeting(), "hi there");

        let lifespan = &mut staged.lifespans[0];
        lifespan.enter().await.unwrap();
        assert!(state.is_started());
        lifespan.exit().await.unwrap();
        assert!(!state.is_started());
    }

    #[test]
    fn test_register_builtin_rejects_bad_settings() {
        let mut handle = handle(json!({ "greeting": 42 }));
        assert!(register_builtin(&mut handle).is_err());
    }

    #[test]
    fn test_components_contribution() {
        let contribution = contribute_builtin_components(&handle(Value::Null)).unwrap();
        assert_eq!(contribution.routers[0].0, "/builtin/components");
        assert_eq!(contribution.singletons[0].0, "conversation_manager");
        assert_eq!(contribution.additive[0].0, "health_checks");
    }
}
