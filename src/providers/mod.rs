//! Provider adapters
//!
//! Two structurally different upstreams feed the canonical model:
//!
//! - **Aggregator** ([`aggregator`]): a stable partner API with a link-token
//!   handshake. Calls are single round trips with no retry; failures surface
//!   immediately.
//! - **Regional scraper** ([`scraper`]): a browser-automation microservice
//!   that can take minutes per call and fails transiently as often as
//!   permanently. All retry/backoff/classification lives there.
//!
//! Both adapters are explicitly constructed with their own configuration and
//! injected where needed; there are no shared client singletons. Each adapter
//! classifies its upstream's errors exactly once, at its own boundary, into
//! [`crate::types::TellerError`] — nothing downstream re-interprets raw
//! upstream error strings.

pub mod aggregator;
pub mod retry;
pub mod scraper;

pub use aggregator::{AggregatorClient, AggregatorConfig, AggregatorTransport, ExchangedItem, HttpAggregatorTransport, LinkMode};
pub use retry::RetryPolicy;
pub use scraper::{HttpScrapeTransport, ScrapeTransport, ScraperClient, ScraperConfig, ScrapeResult};

/// Raw reply from an upstream HTTP call, before any schema validation.
///
/// Transports hand back status and body text for every completed exchange,
/// including non-2xx ones; the adapter owns turning that into either typed
/// data or a classified error.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: String,
}

/// Failure before an HTTP exchange completed.
///
/// Timeouts and network errors are deliberately the only two shapes: for
/// retry classification they are treated identically, and keeping the set
/// small keeps fake transports in tests honest.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Network(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
