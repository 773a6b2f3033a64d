//! Regional scraper adapter
//!
//! Talks to the browser-automation microservice that logs into banks with no
//! public API. One `POST /scrape` call drives a full remote browser session:
//! it can take minutes, requires interactive 2FA for some institutions, and
//! fails transiently about as often as it fails permanently. The session is
//! the expensive resource, so a single call returns both balances and the
//! embedded transaction lists — there is no separate accounts/transactions
//! round trip for this provider.
//!
//! ## Attempt state machine
//!
//! ```text
//! Pending -> Success
//!         -> RetryableFailure -> (backoff) -> Pending
//!         -> TerminalFailure
//! ```
//!
//! Terminal failures (bad password, blocked account, forced password change)
//! are never retried: retrying burns a slow, rate-limited resource and can
//! lock the user out at the bank. Anything unclassified is treated as
//! non-retryable as well — failing safe beats retrying indefinitely against
//! an upstream we do not understand.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{
    minor_units_from_major, AccountClass, Balance, CanonicalAccount, CanonicalTransaction,
    ProviderId,
};
use crate::providers::retry::RetryPolicy;
use crate::providers::{TransportError, UpstreamReply};
use crate::types::{Result, TellerError};

// =============================================================================
// Wire contract
// =============================================================================

/// Request body for `POST /scrape`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub company_id: String,
    /// Bank credentials, decrypted by the caller just before the call
    pub credentials: serde_json::Value,
    pub show_browser: bool,
}

/// Response body from `POST /scrape`. Both non-2xx status and
/// `success: false` signal failure; `error_type` drives classification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(default)]
    pub accounts: Option<Vec<ScrapedAccount>>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One scraped account with its embedded transactions.
///
/// `account_number` is a JSON value because some banks report numeric account
/// numbers; mapping stringifies numbers and synthesizes an id for anything
/// else.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedAccount {
    #[serde(default)]
    pub account_number: Option<serde_json::Value>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub txns: Vec<ScrapedTxn>,
}

/// One scraped transaction, provider-native sign convention.
///
/// The charged amount is the settled figure; the original amount is the
/// pre-conversion/pre-installment figure. Both are already signed per the
/// local convention, so mapping prefers charged, falls back to original, and
/// never inverts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedTxn {
    #[serde(default)]
    pub identifier: Option<serde_json::Value>,
    #[serde(default)]
    pub charged_amount: Option<f64>,
    #[serde(default)]
    pub original_amount: Option<f64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

// =============================================================================
// Classification
// =============================================================================

/// How a failed attempt affects the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Bad credentials. Never retried; the user has to re-enter them.
    Terminal,
    /// Transient. Retried with backoff up to the policy limit.
    Retryable,
    /// Unrecognized. Not retried — fail safe rather than hammer an upstream
    /// we cannot interpret.
    Unknown,
}

/// Map a scraper `errorType` tag onto the retry state machine.
pub fn classify_error_type(error_type: &str) -> FailureKind {
    match error_type.trim().to_ascii_uppercase().as_str() {
        "INVALID_PASSWORD" | "ACCOUNT_BLOCKED" | "CHANGE_PASSWORD" => FailureKind::Terminal,
        // GENERIC is the scraper's catch-all for flaky automation runs;
        // observed behavior is that it clears on retry like a network error
        "TIMEOUT" | "RATE_LIMITED" | "SERVICE_UNAVAILABLE" | "GENERIC" | "GENERIC_ERROR" => {
            FailureKind::Retryable
        }
        _ => FailureKind::Unknown,
    }
}

/// Classified failure of a single attempt, before retry accounting.
enum AttemptError {
    Terminal(TellerError),
    Retryable(TellerError),
    Unknown(TellerError),
}

// =============================================================================
// Transport
// =============================================================================

/// Transport seam for the scrape call (allows faking the microservice in
/// tests).
#[async_trait]
pub trait ScrapeTransport: Send + Sync {
    async fn post_scrape(
        &self,
        request: &ScrapeRequest,
    ) -> std::result::Result<UpstreamReply, TransportError>;
}

/// Production transport over reqwest.
pub struct HttpScrapeTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScrapeTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TellerError::Config(format!("failed to build scraper http client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ScrapeTransport for HttpScrapeTransport {
    async fn post_scrape(
        &self,
        request: &ScrapeRequest,
    ) -> std::result::Result<UpstreamReply, TransportError> {
        let url = format!("{}/scrape", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(TransportError::from_reqwest)?;

        Ok(UpstreamReply { status, body })
    }
}

// =============================================================================
// Scraper client
// =============================================================================

/// Static configuration for one scraper client instance.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Whether the microservice should run the browser headful (2FA flows)
    pub show_browser: bool,
    /// Currency assumed when the scraper omits one (regional default)
    pub default_currency: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            show_browser: false,
            default_currency: "ILS".to_string(),
        }
    }
}

/// Everything one scrape produced, already canonical.
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    pub accounts: Vec<CanonicalAccount>,
    pub transactions: Vec<CanonicalTransaction>,
}

/// Adapter for the regional scraping microservice.
pub struct ScraperClient<T: ScrapeTransport> {
    transport: Arc<T>,
    config: ScraperConfig,
    policy: RetryPolicy,
}

impl<T: ScrapeTransport> ScraperClient<T> {
    pub fn new(transport: Arc<T>, config: ScraperConfig, policy: RetryPolicy) -> Self {
        Self {
            transport,
            config,
            policy,
        }
    }

    /// Run one full scrape session with retries.
    ///
    /// Retryable failures back off per the policy; terminal and unknown
    /// failures return immediately. The backoff sleep lives inside this
    /// future, so cancelling the caller (client disconnect, deadline) also
    /// cancels the sleep.
    pub async fn scrape_all(
        &self,
        company_id: &str,
        credentials: &serde_json::Value,
    ) -> Result<ScrapeResult> {
        let request = ScrapeRequest {
            company_id: company_id.to_string(),
            credentials: credentials.clone(),
            show_browser: self.config.show_browser,
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;

            match self.attempt(&request).await {
                Ok(result) => {
                    info!(
                        company_id = %company_id,
                        attempts,
                        accounts = result.accounts.len(),
                        transactions = result.transactions.len(),
                        "scrape completed"
                    );
                    return Ok(result);
                }
                Err(AttemptError::Terminal(err)) => {
                    warn!(company_id = %company_id, attempts, error = %err, "terminal scrape failure; not retrying");
                    return Err(err);
                }
                Err(AttemptError::Unknown(err)) => {
                    warn!(company_id = %company_id, attempts, error = %err, "unclassified scrape failure; failing safe without retry");
                    return Err(err);
                }
                Err(AttemptError::Retryable(err)) => {
                    if attempts > self.policy.max_retries {
                        warn!(company_id = %company_id, attempts, error = %err, "scrape retries exhausted");
                        return Err(TellerError::RetryExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.policy.jittered_delay(attempts - 1);
                    debug!(
                        company_id = %company_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable scrape failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One attempt: bounded call, status check, schema validation, success
    /// flag, then canonical mapping.
    async fn attempt(
        &self,
        request: &ScrapeRequest,
    ) -> std::result::Result<ScrapeResult, AttemptError> {
        let reply = match tokio::time::timeout(
            self.policy.attempt_timeout,
            self.transport.post_scrape(request),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            // Transport timeouts and network errors retry identically
            Ok(Err(err)) => {
                return Err(AttemptError::Retryable(TellerError::UpstreamUnavailable(
                    err.to_string(),
                )));
            }
            Err(_elapsed) => {
                return Err(AttemptError::Retryable(TellerError::UpstreamUnavailable(
                    format!(
                        "scrape attempt exceeded {}s",
                        self.policy.attempt_timeout.as_secs()
                    ),
                )));
            }
        };

        match reply.status {
            200..=299 => {}
            429 | 500..=599 => {
                return Err(AttemptError::Retryable(TellerError::UpstreamUnavailable(
                    format!("scraper returned HTTP {}", reply.status),
                )));
            }
            other => {
                return Err(AttemptError::Unknown(TellerError::UnknownUpstream(
                    format!("scraper returned HTTP {}", other),
                )));
            }
        }

        let response: ScrapeResponse = match serde_json::from_str(&reply.body) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(AttemptError::Unknown(TellerError::UnknownUpstream(
                    format!("scraper response did not match contract: {}", err),
                )));
            }
        };

        if !response.success {
            let error_type = response.error_type.as_deref().unwrap_or("");
            let detail = format!(
                "{}: {}",
                if error_type.is_empty() { "UNKNOWN" } else { error_type },
                response.error_message.as_deref().unwrap_or("no message")
            );
            return Err(match classify_error_type(error_type) {
                FailureKind::Terminal => {
                    AttemptError::Terminal(TellerError::TerminalCredential(detail))
                }
                FailureKind::Retryable => {
                    AttemptError::Retryable(TellerError::UpstreamUnavailable(detail))
                }
                FailureKind::Unknown => {
                    AttemptError::Unknown(TellerError::UnknownUpstream(detail))
                }
            });
        }

        let accounts = response.accounts.unwrap_or_default();
        if accounts.is_empty() {
            // The microservice reports an empty result set as success; trust
            // it rather than retrying a call that already cost a full session
            info!(company_id = %request.company_id, "scrape succeeded with zero accounts");
        }

        Ok(self.map_accounts(&request.company_id, accounts))
    }

    fn map_accounts(&self, company_id: &str, scraped: Vec<ScrapedAccount>) -> ScrapeResult {
        let mut result = ScrapeResult::default();

        for raw in scraped {
            let (account_id, synthesized) = match id_from_value(raw.account_number.as_ref()) {
                Some(id) => (id, false),
                None => (Uuid::new_v4().to_string(), true),
            };
            if synthesized {
                warn!(
                    company_id = %company_id,
                    "scraped account number missing or non-string; synthesized id"
                );
            }

            let currency = raw
                .currency
                .clone()
                .unwrap_or_else(|| self.config.default_currency.clone());

            let current_minor = match raw.balance {
                Some(amount) => minor_units_from_major(amount),
                None => {
                    warn!(
                        company_id = %company_id,
                        account_id = %account_id,
                        "scraped account omitted balance; recording zero"
                    );
                    0
                }
            };

            for txn in raw.txns {
                if let Some(mapped) = map_txn(&account_id, &currency, txn) {
                    result.transactions.push(mapped);
                }
            }

            result.accounts.push(CanonicalAccount {
                id: account_id.clone(),
                provider_id: ProviderId::RegionalScraper,
                institution_id: company_id.to_string(),
                institution_name: company_id.to_string(),
                display_name: if synthesized {
                    format!("{} account", company_id)
                } else {
                    account_id.clone()
                },
                account_class: scraper_account_class(raw.account_type.as_deref()),
                subtype: raw.account_type,
                masked_number: None,
                currency_code: currency,
                balance: Balance {
                    current_minor,
                    available_minor: None,
                    limit_minor: None,
                },
            });
        }

        result
    }
}

// =============================================================================
// Mapping helpers
// =============================================================================

/// Extract a usable external id: strings pass through, numbers stringify,
/// anything else is "no id" and gets synthesized by the caller.
fn id_from_value(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Scraped accounts without a type tag are bank accounts, hence depository.
fn scraper_account_class(raw: Option<&str>) -> AccountClass {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("credit") | Some("creditcard") | Some("credit-card") => AccountClass::Credit,
        Some("loan") | Some("mortgage") => AccountClass::Loan,
        Some("investment") | Some("brokerage") => AccountClass::Investment,
        _ => AccountClass::Depository,
    }
}

/// Scraper dates arrive as bare ISO dates or full timestamps.
fn parse_scrape_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Map one scraped transaction; `None` drops it (no amount or no date).
///
/// Sign handling: charged amount preferred, original amount as fallback,
/// never inverted — the scraper already reports in the local signed
/// convention, which matches the canonical one.
fn map_txn(account_id: &str, currency: &str, raw: ScrapedTxn) -> Option<CanonicalTransaction> {
    let amount_minor = match raw.charged_amount.or(raw.original_amount) {
        Some(amount) => minor_units_from_major(amount),
        None => {
            warn!(account_id = %account_id, "scraped transaction has neither charged nor original amount; dropping");
            return None;
        }
    };

    let posted_date = match raw.date.as_deref().and_then(parse_scrape_date) {
        Some(date) => date,
        None => {
            warn!(account_id = %account_id, date = ?raw.date, "unparseable scraped transaction date; dropping");
            return None;
        }
    };

    let id = id_from_value(raw.identifier.as_ref()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let pending = matches!(raw.status.as_deref(), Some(s) if s.eq_ignore_ascii_case("pending"));

    Some(CanonicalTransaction {
        id,
        account_id: account_id.to_string(),
        amount_minor,
        posted_date,
        description: raw.description.or(raw.memo).unwrap_or_default(),
        merchant_name: None,
        category_hint: raw.category,
        pending,
        currency_code: currency.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Transport that replays a scripted sequence of replies.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<std::result::Result<UpstreamReply, TransportError>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(
            replies: Vec<std::result::Result<UpstreamReply, TransportError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScrapeTransport for ScriptedTransport {
        async fn post_scrape(
            &self,
            _request: &ScrapeRequest,
        ) -> std::result::Result<UpstreamReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scrape called more times than scripted")
        }
    }

    fn ok_reply(body: &str) -> std::result::Result<UpstreamReply, TransportError> {
        Ok(UpstreamReply {
            status: 200,
            body: body.to_string(),
        })
    }

    fn status_reply(status: u16, body: &str) -> std::result::Result<UpstreamReply, TransportError> {
        Ok(UpstreamReply {
            status,
            body: body.to_string(),
        })
    }

    fn failure_body(error_type: &str) -> String {
        format!(
            r#"{{"success": false, "errorType": "{}", "errorMessage": "upstream says no"}}"#,
            error_type
        )
    }

    /// Fast policy so retry tests finish in milliseconds.
    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn client(transport: Arc<ScriptedTransport>, policy: RetryPolicy) -> ScraperClient<ScriptedTransport> {
        ScraperClient::new(transport, ScraperConfig::default(), policy)
    }

    fn credentials() -> serde_json::Value {
        serde_json::json!({"username": "u", "password": "p"})
    }

    const SUCCESS_BODY: &str = r#"{
        "success": true,
        "accounts": [{
            "accountNumber": "123",
            "balance": 500,
            "txns": [{
                "identifier": "t1",
                "chargedAmount": -42,
                "date": "2024-01-05",
                "description": "Coffee"
            }]
        }]
    }"#;

    #[test]
    fn test_classification_table() {
        assert_eq!(classify_error_type("INVALID_PASSWORD"), FailureKind::Terminal);
        assert_eq!(classify_error_type("ACCOUNT_BLOCKED"), FailureKind::Terminal);
        assert_eq!(classify_error_type("CHANGE_PASSWORD"), FailureKind::Terminal);
        assert_eq!(classify_error_type("TIMEOUT"), FailureKind::Retryable);
        assert_eq!(classify_error_type("RATE_LIMITED"), FailureKind::Retryable);
        assert_eq!(classify_error_type("SERVICE_UNAVAILABLE"), FailureKind::Retryable);
        assert_eq!(classify_error_type("GENERIC"), FailureKind::Retryable);
        // Case and whitespace tolerant
        assert_eq!(classify_error_type(" timeout "), FailureKind::Retryable);
        // Unrecognized tags are never retried
        assert_eq!(classify_error_type("SOLAR_FLARE"), FailureKind::Unknown);
        assert_eq!(classify_error_type(""), FailureKind::Unknown);
    }

    #[tokio::test]
    async fn test_invalid_password_is_single_attempt() {
        let transport =
            ScriptedTransport::new(vec![ok_reply(&failure_body("INVALID_PASSWORD"))]);
        let client = client(Arc::clone(&transport), fast_policy());

        let err = client.scrape_all("bank-a", &credentials()).await.unwrap_err();
        assert!(matches!(err, TellerError::TerminalCredential(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_twice_then_success() {
        let transport = ScriptedTransport::new(vec![
            ok_reply(&failure_body("RATE_LIMITED")),
            ok_reply(&failure_body("RATE_LIMITED")),
            ok_reply(SUCCESS_BODY),
        ]);
        let client = client(Arc::clone(&transport), fast_policy());

        let result = client.scrape_all("bank-a", &credentials()).await.unwrap();

        assert_eq!(transport.calls(), 3);
        assert_eq!(result.accounts.len(), 1);
        let account = &result.accounts[0];
        assert_eq!(account.id, "123");
        assert_eq!(account.balance.current_minor, 50_000);
        assert_eq!(account.provider_id, ProviderId::RegionalScraper);

        assert_eq!(result.transactions.len(), 1);
        let txn = &result.transactions[0];
        assert_eq!(txn.id, "t1");
        assert_eq!(txn.account_id, "123");
        assert_eq!(txn.amount_minor, -4_200);
        assert_eq!(txn.posted_date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(txn.description, "Coffee");
    }

    #[tokio::test]
    async fn test_retry_exhausted_counts_every_attempt() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Network("connection refused".into())),
            ok_reply(&failure_body("TIMEOUT")),
            status_reply(503, "busy"),
        ]);
        let client = client(Arc::clone(&transport), fast_policy());

        let err = client.scrape_all("bank-a", &credentials()).await.unwrap_err();
        match err {
            TellerError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, TellerError::UpstreamUnavailable(_)));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_unknown_error_type_fails_safe() {
        let transport = ScriptedTransport::new(vec![ok_reply(&failure_body("SOLAR_FLARE"))]);
        let client = client(Arc::clone(&transport), fast_policy());

        let err = client.scrape_all("bank-a", &credentials()).await.unwrap_err();
        assert!(matches!(err, TellerError::UnknownUpstream(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_5xx_retries_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            status_reply(500, "internal"),
            status_reply(429, "slow down"),
            ok_reply(SUCCESS_BODY),
        ]);
        let client = client(Arc::clone(&transport), fast_policy());

        let result = client.scrape_all("bank-a", &credentials()).await.unwrap();
        assert_eq!(transport.calls(), 3);
        assert_eq!(result.accounts.len(), 1);
    }

    #[tokio::test]
    async fn test_4xx_other_than_429_is_not_retried() {
        let transport = ScriptedTransport::new(vec![status_reply(404, "nope")]);
        let client = client(Arc::clone(&transport), fast_policy());

        let err = client.scrape_all("bank-a", &credentials()).await.unwrap_err();
        assert!(matches!(err, TellerError::UnknownUpstream(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_retried() {
        let transport = ScriptedTransport::new(vec![ok_reply("<html>gateway error</html>")]);
        let client = client(Arc::clone(&transport), fast_policy());

        let err = client.scrape_all("bank-a", &credentials()).await.unwrap_err();
        assert!(matches!(err, TellerError::UnknownUpstream(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_accounts_is_success() {
        let transport =
            ScriptedTransport::new(vec![ok_reply(r#"{"success": true, "accounts": []}"#)]);
        let client = client(Arc::clone(&transport), fast_policy());

        let result = client.scrape_all("bank-a", &credentials()).await.unwrap();
        assert!(result.accounts.is_empty());
        assert!(result.transactions.is_empty());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        /// Transport that never answers.
        struct HangingTransport;

        #[async_trait]
        impl ScrapeTransport for HangingTransport {
            async fn post_scrape(
                &self,
                _request: &ScrapeRequest,
            ) -> std::result::Result<UpstreamReply, TransportError> {
                std::future::pending().await
            }
        }

        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
            attempt_timeout: Duration::from_millis(50),
        };
        let client = ScraperClient::new(Arc::new(HangingTransport), ScraperConfig::default(), policy);

        let err = client.scrape_all("bank-a", &credentials()).await.unwrap_err();
        match err {
            TellerError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_charged_amount_preferred_over_original_no_inversion() {
        let body = r#"{
            "success": true,
            "accounts": [{
                "accountNumber": "777",
                "balance": 10.5,
                "txns": [
                    {"identifier": "a", "chargedAmount": -42.5, "originalAmount": -100, "date": "2024-02-01", "description": "both"},
                    {"identifier": "b", "originalAmount": 33, "date": "2024-02-02", "description": "original only"},
                    {"identifier": "c", "date": "2024-02-03", "description": "no amounts"}
                ]
            }]
        }"#;
        let transport = ScriptedTransport::new(vec![ok_reply(body)]);
        let client = client(Arc::clone(&transport), fast_policy());

        let result = client.scrape_all("bank-a", &credentials()).await.unwrap();
        assert_eq!(result.accounts[0].balance.current_minor, 1_050);

        // Amount-less transaction is dropped, the others keep their signs
        assert_eq!(result.transactions.len(), 2);
        assert_eq!(result.transactions[0].amount_minor, -4_250);
        assert_eq!(result.transactions[1].amount_minor, 3_300);
    }

    #[tokio::test]
    async fn test_numeric_and_missing_identifiers() {
        let body = r#"{
            "success": true,
            "accounts": [{
                "accountNumber": 99123,
                "balance": 1,
                "txns": [
                    {"identifier": 555, "chargedAmount": -1, "date": "2024-03-01", "description": "numeric id"},
                    {"chargedAmount": -2, "date": "2024-03-02", "description": "no id"}
                ]
            }]
        }"#;
        let transport = ScriptedTransport::new(vec![ok_reply(body)]);
        let client = client(Arc::clone(&transport), fast_policy());

        let result = client.scrape_all("bank-a", &credentials()).await.unwrap();

        // Numeric account numbers stringify rather than being discarded
        assert_eq!(result.accounts[0].id, "99123");
        assert_eq!(result.transactions[0].id, "555");
        // Missing identifier gets a synthetic one
        assert!(!result.transactions[1].id.is_empty());
        assert_eq!(result.transactions[1].account_id, "99123");
    }

    #[tokio::test]
    async fn test_pending_status_and_timestamp_dates() {
        let body = r#"{
            "success": true,
            "accounts": [{
                "accountNumber": "1",
                "balance": 0,
                "txns": [
                    {"identifier": "p1", "chargedAmount": -5, "date": "2024-04-01T00:00:00.000Z", "description": "pending card hold", "status": "Pending"}
                ]
            }]
        }"#;
        let transport = ScriptedTransport::new(vec![ok_reply(body)]);
        let client = client(Arc::clone(&transport), fast_policy());

        let result = client.scrape_all("bank-a", &credentials()).await.unwrap();
        let txn = &result.transactions[0];
        assert!(txn.pending);
        assert_eq!(txn.posted_date, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    }

    #[test]
    fn test_parse_scrape_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(parse_scrape_date("2024-01-05"), Some(expected));
        assert_eq!(parse_scrape_date("2024-01-05T10:30:00+02:00"), Some(expected));
        assert_eq!(parse_scrape_date("2024-01-05T00:00:00.000Z"), Some(expected));
        assert_eq!(parse_scrape_date("05/01/2024"), None);
        assert_eq!(parse_scrape_date(""), None);
    }

    #[test]
    fn test_id_from_value() {
        assert_eq!(
            id_from_value(Some(&serde_json::json!("  abc  "))),
            Some("abc".to_string())
        );
        assert_eq!(id_from_value(Some(&serde_json::json!(123))), Some("123".to_string()));
        assert_eq!(id_from_value(Some(&serde_json::json!(""))), None);
        assert_eq!(id_from_value(Some(&serde_json::json!(null))), None);
        assert_eq!(id_from_value(Some(&serde_json::json!({"nested": 1}))), None);
        assert_eq!(id_from_value(None), None);
    }
}
