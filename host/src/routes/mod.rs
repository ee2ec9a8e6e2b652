use axum::{Router, routing::get};

use crate::handlers::extensions;
use crate::state::AppState;
use std::sync::Arc;

/// Create the host's own router
///
/// Extension routers are mounted next to these routes by the loader; the
/// trace layer is added once over the composed router.
pub fn create_host_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(extensions::health_check))
        .route("/extensions", get(extensions::list_extensions))
        .route("/extensions/services", get(extensions::list_services))
}
