//! Banking API endpoints
//!
//! ## Endpoints
//!
//! - `POST /api/v1/link-token` - Issue a hosted link token (create or update mode)
//! - `POST /api/v1/connections` - Connect an institution through either provider
//! - `POST /api/v1/connections/{id}/sync` - Re-fetch accounts and transactions
//! - `DELETE /api/v1/connections/{id}` - Disconnect and delete everything it owns
//! - `GET /api/v1/connections` - List this user's connections
//! - `GET /api/v1/overview` - Cached financial summary
//! - `GET /api/v1/history?start=&end=` - Daily snapshots in a date range
//! - `POST /api/v1/history/snapshot` - Record today's snapshot
//!
//! ## Authentication
//!
//! The upstream gateway terminates authentication and forwards the verified
//! user id in the `x-user-id` header, stripping any client-supplied value on
//! the way in. A missing or empty header means the request did not come
//! through the gateway and is rejected with 401.
//!
//! ## Error bodies
//!
//! Every failure serializes to `{"error": ..., "code": ...}` where `error` is
//! the sanitized copy from [`TellerError::user_message`] and `code` is the
//! stable class from [`TellerError::code`]. Raw upstream error text never
//! appears in a response body; it goes to the server log instead.

use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::db::schemas::{SnapshotDoc, SummaryAggregates, SummaryDoc};
use crate::server::AppState;
use crate::services::{ConnectRequest, ConnectionView, LinkTokenRequest};
use crate::types::{Result, TellerError};

type FullBody = Full<Bytes>;

// =============================================================================
// Response shapes
// =============================================================================

/// Error body for every failed API call
#[derive(Serialize)]
struct ErrorResponse {
    /// Sanitized user-facing message
    error: String,
    /// Stable machine-readable error class
    code: &'static str,
}

/// Wrapper for `GET /api/v1/connections`
#[derive(Serialize)]
struct ConnectionsResponse {
    connections: Vec<ConnectionView>,
}

/// Summary as exposed over the API
#[derive(Serialize)]
struct OverviewResponse {
    aggregates: SummaryAggregates,
    /// Epoch milliseconds of the last recompute (0 = never computed)
    computed_at: i64,
    /// Bumped on every recompute
    version: i64,
}

impl From<SummaryDoc> for OverviewResponse {
    fn from(doc: SummaryDoc) -> Self {
        Self {
            aggregates: doc.aggregates,
            computed_at: doc.computed_at,
            version: doc.version,
        }
    }
}

/// One point in the net-worth history series
#[derive(Serialize)]
struct SnapshotView {
    /// Calendar date in ISO `YYYY-MM-DD` form
    date: String,
    aggregates: SummaryAggregates,
}

impl From<SnapshotDoc> for SnapshotView {
    fn from(doc: SnapshotDoc) -> Self {
        Self {
            date: doc.date,
            aggregates: doc.aggregates,
        }
    }
}

/// Wrapper for `GET /api/v1/history`
#[derive(Serialize)]
struct HistoryResponse {
    snapshots: Vec<SnapshotView>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle `POST /api/v1/link-token`
///
/// An empty body is accepted and means create mode.
pub async fn create_link_token(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("link-token", &err),
    };

    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(err) => return error_response("link-token", &body_read_error(err)),
    };

    let request: LinkTokenRequest = if body_bytes.is_empty() {
        LinkTokenRequest::default()
    } else {
        match serde_json::from_slice(&body_bytes) {
            Ok(r) => r,
            Err(err) => return error_response("link-token", &err.into()),
        }
    };

    match state.connections.link_token(&user_id, request).await {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(err) => error_response("link-token", &err),
    }
}

/// Handle `POST /api/v1/connections`
///
/// The whole connect flow (provider handshake or full scrape schedule plus
/// persistence) runs under one overall deadline; a connect that cannot finish
/// in time is abandoned and reported as provider unavailability. Dropping the
/// in-flight future releases the institution slot, so a timed-out connect
/// can be retried immediately.
pub async fn create_connection(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("connect", &err),
    };

    let body_bytes = match req.into_body().collect().await {
        Ok(b) => b.to_bytes(),
        Err(err) => return error_response("connect", &body_read_error(err)),
    };

    let request: ConnectRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(err) => return error_response("connect", &err.into()),
    };

    let connect = state.connections.connect(&user_id, request);
    let outcome = match tokio::time::timeout(state.args.connect_deadline(), connect).await {
        Ok(result) => result,
        Err(_) => Err(deadline_error(&state)),
    };

    match outcome {
        Ok(outcome) => json_response(StatusCode::CREATED, &outcome),
        Err(err) => error_response("connect", &err),
    }
}

/// Handle `POST /api/v1/connections/{id}/sync`
pub async fn sync_connection(
    req: Request<Incoming>,
    state: Arc<AppState>,
    connection_id: &str,
) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("sync", &err),
    };

    let sync = state.connections.sync(&user_id, connection_id);
    let outcome = match tokio::time::timeout(state.args.connect_deadline(), sync).await {
        Ok(result) => result,
        Err(_) => Err(deadline_error(&state)),
    };

    match outcome {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(err) => error_response("sync", &err),
    }
}

/// Handle `DELETE /api/v1/connections/{id}`
pub async fn delete_connection(
    req: Request<Incoming>,
    state: Arc<AppState>,
    connection_id: &str,
) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("disconnect", &err),
    };

    match state.connections.disconnect(&user_id, connection_id).await {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(err) => error_response("disconnect", &err),
    }
}

/// Handle `GET /api/v1/connections`
pub async fn list_connections(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("list-connections", &err),
    };

    match state.connections.list_connections(&user_id).await {
        Ok(connections) => json_response(StatusCode::OK, &ConnectionsResponse { connections }),
        Err(err) => error_response("list-connections", &err),
    }
}

/// Handle `GET /api/v1/overview`
pub async fn overview(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("overview", &err),
    };

    match state.summaries.get_summary(&user_id).await {
        Ok(doc) => json_response(StatusCode::OK, &OverviewResponse::from(doc)),
        Err(err) => error_response("overview", &err),
    }
}

/// Handle `GET /api/v1/history?start=YYYY-MM-DD&end=YYYY-MM-DD`
pub async fn history(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("history", &err),
    };

    let query = HistoryQuery::from_query_string(req.uri().query());
    let (start, end) = match query.parse_range() {
        Ok(range) => range,
        Err(err) => return error_response("history", &err),
    };

    match state.summaries.get_snapshots(&user_id, start, end).await {
        Ok(snapshots) => json_response(
            StatusCode::OK,
            &HistoryResponse {
                snapshots: snapshots.into_iter().map(SnapshotView::from).collect(),
            },
        ),
        Err(err) => error_response("history", &err),
    }
}

/// Handle `POST /api/v1/history/snapshot`
///
/// Idempotent per calendar day: repeating the call overwrites today's entry
/// rather than appending a second one.
pub async fn record_snapshot(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let user_id = match require_user(&req) {
        Ok(id) => id,
        Err(err) => return error_response("snapshot", &err),
    };

    match state.summaries.save_daily_snapshot(&user_id).await {
        Ok(doc) => json_response(StatusCode::OK, &SnapshotView::from(doc)),
        Err(err) => error_response("snapshot", &err),
    }
}

// =============================================================================
// Query parameters
// =============================================================================

/// Query parameters for the history endpoint
#[derive(Debug, Default)]
struct HistoryQuery {
    start: Option<String>,
    end: Option<String>,
}

impl HistoryQuery {
    fn from_query_string(query: Option<&str>) -> Self {
        let mut params = Self::default();

        if let Some(q) = query {
            for pair in q.split('&') {
                if let Some((key, value)) = pair.split_once('=') {
                    match key {
                        "start" => params.start = Some(value.to_string()),
                        "end" => params.end = Some(value.to_string()),
                        _ => {}
                    }
                }
            }
        }

        params
    }

    /// Both bounds are required and must be ISO dates in order.
    fn parse_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = parse_iso_date("start", self.start.as_deref())?;
        let end = parse_iso_date("end", self.end.as_deref())?;
        if start > end {
            return Err(TellerError::Validation(
                "start must not be after end".to_string(),
            ));
        }
        Ok((start, end))
    }
}

fn parse_iso_date(name: &str, value: Option<&str>) -> Result<NaiveDate> {
    let raw = value.ok_or_else(|| {
        TellerError::Validation(format!("{} query parameter is required", name))
    })?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| TellerError::Validation(format!("{} must be a YYYY-MM-DD date", name)))
}

// =============================================================================
// Helpers
// =============================================================================

/// Extract the verified user id injected by the upstream gateway.
fn require_user<B>(req: &Request<B>) -> Result<String> {
    let user_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");

    if user_id.is_empty() {
        return Err(TellerError::Auth("missing x-user-id header".to_string()));
    }
    Ok(user_id.to_string())
}

fn body_read_error(err: hyper::Error) -> TellerError {
    TellerError::Validation(format!("could not read request body: {}", err))
}

fn deadline_error(state: &AppState) -> TellerError {
    TellerError::UpstreamUnavailable(format!(
        "overall connect deadline of {}s elapsed",
        state.args.connect_deadline_secs
    ))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// Convert a service error into its API response. The sanitized message goes
/// to the client; the full error text goes to the server log, tagged with the
/// operation that failed.
fn error_response(op: &str, err: &TellerError) -> Response<FullBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("{} failed: {}", op, err);
    } else {
        warn!("{} failed: {}", op, err);
    }

    json_response(
        status,
        &ErrorResponse {
            error: err.user_message(),
            code: err.code(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_user_rejects_missing_and_blank_headers() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(
            require_user(&missing),
            Err(TellerError::Auth(_))
        ));

        let blank = Request::builder()
            .header("x-user-id", "   ")
            .body(())
            .unwrap();
        assert!(matches!(require_user(&blank), Err(TellerError::Auth(_))));
    }

    #[test]
    fn test_require_user_trims_header_value() {
        let req = Request::builder()
            .header("x-user-id", " user-7 ")
            .body(())
            .unwrap();
        assert_eq!(require_user(&req).unwrap(), "user-7");
    }

    #[test]
    fn test_history_query_parses_known_keys_only() {
        let query = HistoryQuery::from_query_string(Some(
            "start=2026-01-01&end=2026-03-31&unrelated=x",
        ));
        assert_eq!(query.start.as_deref(), Some("2026-01-01"));
        assert_eq!(query.end.as_deref(), Some("2026-03-31"));

        let (start, end) = query.parse_range().unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
    }

    #[test]
    fn test_history_query_requires_both_bounds() {
        let query = HistoryQuery::from_query_string(Some("start=2026-01-01"));
        let err = query.parse_range().unwrap_err();
        assert!(matches!(err, TellerError::Validation(_)));
        assert!(err.to_string().contains("end"));
    }

    #[test]
    fn test_history_query_rejects_inverted_range() {
        let query = HistoryQuery::from_query_string(Some("start=2026-03-01&end=2026-01-01"));
        assert!(query.parse_range().is_err());
    }

    #[test]
    fn test_history_query_rejects_garbage_dates() {
        let query = HistoryQuery::from_query_string(Some("start=March&end=2026-01-01"));
        let err = query.parse_range().unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[tokio::test]
    async fn test_error_response_sanitizes_upstream_text() {
        let err = TellerError::TerminalCredential("INVALID_PASSWORD from upstream".to_string());
        let response = error_response("sync", &err);
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("INVALID_PASSWORD"));
        assert!(text.contains("credentials_rejected"));
    }
}
