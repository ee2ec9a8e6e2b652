use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::config::HostConfig;
use crate::plugin::loader::LoadReport;
use crate::plugin::registry::ServiceRegistry;

/// Shared state of the host's own routes
pub struct AppState {
    pub config: Arc<HostConfig>,
    pub services: Arc<ServiceRegistry>,
    report: RwLock<LoadReport>,
    ready: AtomicBool,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<HostConfig>, services: Arc<ServiceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            services,
            report: RwLock::new(LoadReport::default()),
            ready: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    /// Record the outcome of the extension load pass
    pub fn set_report(&self, report: LoadReport) {
        *self.report.write() = report;
    }

    pub fn report(&self) -> LoadReport {
        self.report.read().clone()
    }

    /// Flip readiness once every lifespan has entered, and back on shutdown
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
