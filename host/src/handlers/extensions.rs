//! Extension Diagnostics REST Endpoints
//!
//! # Endpoints
//!
//! - `GET /` - Host health and readiness
//! - `GET /extensions` - Load report, one record per discovered reference
//! - `GET /extensions/services` - Registered services with mode and count

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::plugin::compat::HOST_API_VERSION;
use crate::plugin::loader::{LoadRecord, LoadStatus};
use crate::plugin::registry::ServiceDescription;
use crate::state::AppState;

/// Response for GET /
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub host_api_version: &'static str,
    pub uptime_seconds: u64,
}

/// Response for GET /extensions
#[derive(Debug, Serialize)]
pub struct ExtensionsResponse {
    pub host_api_version: &'static str,
    /// Number of references that loaded
    pub loaded: usize,
    /// Number of references that failed at any step
    pub failed: usize,
    pub extensions: Vec<LoadRecord>,
}

/// Response for GET /extensions/services
#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceDescription>,
    pub total_count: usize,
}

/// Health check
///
/// Answers 503 until every lifespan has entered and again once shutdown
/// begins.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if ready { "OK" } else { "STARTING" },
            ready,
            host_api_version: HOST_API_VERSION,
            uptime_seconds: state.uptime_seconds(),
        }),
    )
}

/// List the outcome of every discovered extension reference
pub async fn list_extensions(State(state): State<Arc<AppState>>) -> Json<ExtensionsResponse> {
    let report = state.report();
    let loaded = report.count(LoadStatus::Loaded);

    Json(ExtensionsResponse {
        host_api_version: HOST_API_VERSION,
        loaded,
        failed: report.len() - loaded,
        extensions: report.records,
    })
}

/// List registered services without resolving them
pub async fn list_services(State(state): State<Arc<AppState>>) -> Json<ServicesResponse> {
    let services = state.services.describe();

    Json(ServicesResponse {
        total_count: services.len(),
        services,
    })
}
