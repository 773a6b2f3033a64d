//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling, one spawned task per
//! connection. Routing is a flat match on (method, path); the handlers live
//! in [`crate::routes`].

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::MongoClient;
use crate::providers::{
    AggregatorClient, AggregatorConfig, HttpAggregatorTransport, HttpScrapeTransport,
    ScraperClient, ScraperConfig,
};
use crate::routes;
use crate::services::{ConnectionService, SummaryService};
use crate::types::TellerError;
use crate::vault::Vault;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Connection service wired to the real HTTP transports
pub type Connections = ConnectionService<HttpAggregatorTransport, HttpScrapeTransport>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    /// Connect/sync/disconnect flows against both providers
    pub connections: Arc<Connections>,
    /// Cached summaries and daily snapshots
    pub summaries: Arc<SummaryService>,
    /// Process start, drives the health endpoint's uptime field
    pub started_at: Instant,
}

impl AppState {
    /// Wire the full service stack from configuration. Fails fast: an
    /// unreachable MongoDB or a bad vault key should stop the process at
    /// startup, not surface request by request.
    pub async fn new(args: Args) -> Result<Self, TellerError> {
        let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;

        let vault_key = args
            .vault_key
            .as_deref()
            .ok_or_else(|| TellerError::Config("VAULT_KEY is required".to_string()))?;
        let vault = Vault::from_base64(vault_key)?;

        let aggregator = AggregatorClient::new(
            Arc::new(HttpAggregatorTransport::new(
                &args.aggregator_url,
                Duration::from_secs(args.aggregator_timeout_secs),
            )?),
            AggregatorConfig {
                client_id: args.aggregator_client_id.clone().unwrap_or_default(),
                client_secret: args.aggregator_secret.clone().unwrap_or_default(),
            },
        );

        let policy = args.scraper_retry_policy();
        let scraper = ScraperClient::new(
            Arc::new(HttpScrapeTransport::new(
                &args.scraper_url,
                policy.attempt_timeout,
            )?),
            ScraperConfig {
                show_browser: args.scraper_show_browser,
                default_currency: args.scraper_default_currency.clone(),
            },
            policy,
        );

        let summaries = SummaryService::new(&mongo, args.summary_ttl()).await?;
        let connections = Arc::new(
            ConnectionService::new(
                &mongo,
                aggregator,
                scraper,
                vault,
                Arc::clone(&summaries),
                args.aggregator_lookback_days,
            )
            .await?,
        );

        Ok(Self {
            args,
            mongo,
            connections,
            summaries,
            started_at: Instant::now(),
        })
    }
}

pub async fn run(state: Arc<AppState>) -> Result<(), TellerError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Teller listening on {}", state.args.listen);

    if !state.args.aggregator_configured() {
        warn!("Aggregator partner credentials not set - aggregator connects will fail upstream");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if teller is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)).await)
        }

        // Readiness probe - returns 200 only if MongoDB answers
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::readiness_check(Arc::clone(&state)).await)
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        (Method::POST, "/api/v1/link-token") => {
            to_boxed(routes::create_link_token(req, Arc::clone(&state)).await)
        }

        (Method::POST, "/api/v1/connections") => {
            to_boxed(routes::create_connection(req, Arc::clone(&state)).await)
        }

        (Method::GET, "/api/v1/connections") => {
            to_boxed(routes::list_connections(req, Arc::clone(&state)).await)
        }

        (Method::POST, p) if p.starts_with("/api/v1/connections/") => match sync_id_from(p) {
            Some(id) => to_boxed(routes::sync_connection(req, Arc::clone(&state), id).await),
            None => to_boxed(not_found_response(&path)),
        },

        (Method::DELETE, p) if p.starts_with("/api/v1/connections/") => {
            match connection_id_from(p) {
                Some(id) => to_boxed(routes::delete_connection(req, Arc::clone(&state), id).await),
                None => to_boxed(not_found_response(&path)),
            }
        }

        (Method::GET, "/api/v1/overview") => to_boxed(routes::overview(req, Arc::clone(&state)).await),

        (Method::GET, "/api/v1/history") => to_boxed(routes::history(req, Arc::clone(&state)).await),

        (Method::POST, "/api/v1/history/snapshot") => {
            to_boxed(routes::record_snapshot(req, Arc::clone(&state)).await)
        }

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// `/api/v1/connections/{id}` with no further segments
fn connection_id_from(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/api/v1/connections/")?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

/// `/api/v1/connections/{id}/sync`
fn sync_id_from(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/api/v1/connections/")?;
    let id = rest.strip_suffix("/sync")?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "API routes live under /api/v1"
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_extraction() {
        assert_eq!(
            connection_id_from("/api/v1/connections/abc-123"),
            Some("abc-123")
        );
        assert_eq!(connection_id_from("/api/v1/connections/"), None);
        assert_eq!(connection_id_from("/api/v1/connections/a/b"), None);
        assert_eq!(connection_id_from("/api/v1/overview"), None);
    }

    #[test]
    fn test_sync_id_extraction() {
        assert_eq!(
            sync_id_from("/api/v1/connections/abc-123/sync"),
            Some("abc-123")
        );
        assert_eq!(sync_id_from("/api/v1/connections/abc-123"), None);
        assert_eq!(sync_id_from("/api/v1/connections//sync"), None);
        assert_eq!(sync_id_from("/api/v1/connections/a/b/sync"), None);
    }
}
