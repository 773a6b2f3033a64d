//! Health check endpoints
//!
//! Provides Kubernetes-style health probes:
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (is the service ready for traffic?)
//!
//! Liveness returns 200 whenever the process is up. Readiness additionally
//! round-trips a MongoDB ping: every API route needs the database, so an
//! instance that cannot reach Mongo should be pulled from rotation rather
//! than fail each request individually.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

/// Health response for load balancers and deployment dashboards
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// 'online' when MongoDB answers, 'degraded' when it does not
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds, measured from process start
    pub uptime: u64,
    /// Current timestamp
    pub timestamp: String,
    /// MongoDB connectivity
    pub mongo: MongoHealth,
    /// Which provider backends this deployment can talk to
    pub providers: ProviderHealth,
}

/// MongoDB connectivity details
#[derive(Serialize)]
pub struct MongoHealth {
    /// Whether the readiness ping round-tripped
    pub connected: bool,
}

/// Configured provider backends
#[derive(Serialize)]
pub struct ProviderHealth {
    /// Aggregator partner credentials are present
    pub aggregator: bool,
    /// Scraper microservice base URL
    pub scraper_url: String,
}

/// Build health response with current state
async fn build_health_response(state: &AppState) -> HealthResponse {
    let mongo_connected = state.mongo.ping().await.is_ok();

    HealthResponse {
        healthy: true, // Service is running
        status: if mongo_connected { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mongo: MongoHealth {
            connected: mongo_connected,
        },
        providers: ProviderHealth {
            aggregator: state.args.aggregator_configured(),
            scraper_url: state.args.scraper_url.clone(),
        },
    }
}

/// Handle liveness probe (/health, /healthz)
///
/// Returns 200 OK while the service is running. The body carries Mongo and
/// provider status for informational purposes; callers that need a gating
/// check should use /ready instead.
pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state).await;

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    // Liveness probe: always return 200 if service is running
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Handle readiness probe (/ready, /readyz)
///
/// Returns 200 OK only when MongoDB is reachable. Use this endpoint for load
/// balancer health checks; provider outages deliberately do not flip
/// readiness, since cached summaries and stored connections remain servable.
pub async fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state).await;
    let is_ready = response.mongo.connected;

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Git commit hash (full)
    pub commit_full: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Handle version endpoint (/version)
///
/// Returns build information so deployments can be verified against the
/// commit they were built from.
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "teller",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
