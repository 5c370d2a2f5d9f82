//! Health check endpoints for Kubernetes probes and monitoring.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,
    pub version: String,
    pub subsystems: SubsystemStatus,
}

#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    pub database: ComponentStatus,
    pub cache: ComponentStatus,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Latency of the health check in milliseconds
    pub latency_ms: u64,
}

impl ComponentStatus {
    fn new(healthy: bool, failure: &str, started: std::time::Instant) -> Self {
        Self {
            healthy,
            message: (!healthy).then(|| failure.to_string()),
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Full health check with subsystem status.
///
/// The database is required; an unreachable cache only degrades the service,
/// since request matching falls back to response-only records.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let db_healthy = state.db.health_check().await.is_ok();
    let database = ComponentStatus::new(db_healthy, "Database connection failed", start);

    let start = std::time::Instant::now();
    let cache_healthy = state.cache.get_bytes("__health_check__").await.is_ok();
    let cache = ComponentStatus::new(cache_healthy, "Cache connection failed", start);

    let (status, status_code) = match (db_healthy, cache_healthy) {
        (true, true) => ("healthy", StatusCode::OK),
        (true, false) => ("degraded", StatusCode::OK),
        (false, _) => ("unhealthy", StatusCode::SERVICE_UNAVAILABLE),
    };

    let health = HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subsystems: SubsystemStatus { database, cache },
    };

    (status_code, Json(health))
}

/// Kubernetes liveness probe.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Kubernetes readiness probe. Ready once the database answers.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.db.health_check().await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => {
                let metrics: String = handle.render();
                (
                    StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    metrics,
                )
            }
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
