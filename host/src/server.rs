//! Host bootstrap
//!
//! Builds the host surface in a fixed order: host services, host routes,
//! extension load pass, combined lifespan. [`Host::run`] then enters the
//! lifespan, serves until shutdown and exits the lifespan.

use axum::{Extension, Router};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::HostConfig;
use crate::plugin::catalog::PluginCatalog;
use crate::plugin::compat::HOST_API_VERSION;
use crate::plugin::discovery::Discovery;
use crate::plugin::error::{BoxError, LifespanExitError, LifespanStartupError};
use crate::plugin::lifecycle::{CombinedLifespan, LifespanExt, LifespanFn};
use crate::plugin::loader::{LoadedExtensions, PluginLoader};
use crate::plugin::registry::{ServiceMode, ServiceProvider, ServiceRegistry};
use crate::routes;
use crate::state::AppState;

/// Service holding the host API version string
pub const HOST_API_VERSION_SERVICE: &str = "host.api_version";

/// Service holding the host's [`HostConfig`]
pub const HOST_CONFIG_SERVICE: &str = "host.config";

/// Errors ending [`Host::run`]
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Startup(#[from] LifespanStartupError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shutdown(#[from] LifespanExitError),
}

/// A fully composed host, ready to run
pub struct Host {
    pub state: Arc<AppState>,
    pub router: Router,
    pub lifespan: CombinedLifespan,
}

impl Host {
    /// Build against every linked export, discovering per `config`
    pub fn build(config: HostConfig) -> Self {
        let discovery = config.discovery();
        Self::build_with(config, Arc::new(PluginCatalog::from_inventory()), &discovery)
    }

    /// Build against an explicit catalog and discovery
    pub fn build_with(config: HostConfig, catalog: Arc<PluginCatalog>, discovery: &Discovery) -> Self {
        let config = Arc::new(config);
        let services = Arc::new(ServiceRegistry::new());

        // Host defaults are registered before any extension so they always win
        services.register(
            HOST_API_VERSION_SERVICE,
            ServiceMode::Singleton,
            ServiceProvider::value(HOST_API_VERSION.to_string()),
        );
        services.register(
            HOST_CONFIG_SERVICE,
            ServiceMode::Singleton,
            ServiceProvider::Value(config.clone()),
        );

        let state = AppState::new(config.clone(), services.clone());
        let base = routes::create_host_router().with_state(state.clone());

        let loader = PluginLoader::new(catalog, services.clone())
            .with_settings(config.extensions.settings.clone())
            .with_session_guard(config.session_guard());
        let LoadedExtensions {
            router,
            lifespans,
            report,
        } = loader.load(discovery, base);
        state.set_report(report);

        let mut lifespan = CombinedLifespan::new("host").with(host_lifespan(state.clone()));
        let timeout = config.lifespan_timeout();
        for contributor in lifespans {
            lifespan.push(match timeout {
                Some(limit) => contributor.with_timeout(limit).boxed(),
                None => contributor,
            });
        }

        tracing::info!(
            lifespans = lifespan.len(),
            services = services.len(),
            "Host composed"
        );

        let router = router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(services)),
        );

        Self {
            state,
            router,
            lifespan,
        }
    }

    /// Enter the lifespan, serve on `listener` until `shutdown`, then exit
    ///
    /// If `shutdown` completes during startup the entered lifespans are
    /// unwound and nothing is served.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), ServeError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let Host {
            state,
            router,
            mut lifespan,
        } = self;
        let shutdown = shutdown.boxed().shared();

        lifespan.enter_until(shutdown.clone()).await?;
        state.set_ready(true);

        match listener.local_addr() {
            Ok(address) => tracing::info!(address = %address, "Host listening"),
            Err(e) => tracing::warn!(error = %e, "Host listening on unknown address"),
        }

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        state.set_ready(false);
        let exited = lifespan.exit().await;
        if let Err(ref e) = exited {
            tracing::error!(error = %e, "Lifespan shutdown incomplete");
        }

        served?;
        exited?;
        Ok(())
    }
}

/// First contributor of the combined lifespan
fn host_lifespan(state: Arc<AppState>) -> LifespanFn {
    let (on, off) = (state.clone(), state);
    LifespanFn::new(
        "host",
        move || {
            let state = on.clone();
            async move {
                let report = state.report();
                tracing::info!(
                    extensions = report.len(),
                    failed = report.failed().count(),
                    "Host starting"
                );
                Ok::<(), BoxError>(())
            }
        },
        move || {
            let state = off.clone();
            async move {
                tracing::info!(uptime_seconds = state.uptime_seconds(), "Host stopped");
                Ok::<(), BoxError>(())
            }
        },
    )
}

/// Resolve on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
