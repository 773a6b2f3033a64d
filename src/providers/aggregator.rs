//! Hosted aggregator adapter
//!
//! The aggregator fronts thousands of institutions behind a token-based API:
//! the client exchanges a short-lived public token (obtained by the user in
//! the aggregator's hosted link flow) for a long-lived access token, then
//! pulls accounts and transactions with it. Calls are fast and the service is
//! reliable, so every operation here is a single attempt — the retry
//! machinery belongs to the scraper, not to this adapter.
//!
//! Sign convention: the aggregator reports transaction amounts with positive
//! meaning money leaving the account. Canonical amounts are the opposite
//! (positive = inflow), so every transaction amount is negated exactly once,
//! here. Balances are not touched — the aggregator already reports liability
//! balances as positive amounts owed, which matches the canonical model.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{
    minor_units_from_major, AccountClass, Balance, CanonicalAccount, CanonicalTransaction,
    ProviderId,
};
use crate::providers::{TransportError, UpstreamReply};
use crate::types::{Result, TellerError};

/// Currency assumed when the aggregator omits one.
const DEFAULT_CURRENCY: &str = "USD";

/// Page size for transaction pulls (the upstream maximum).
const TRANSACTIONS_PAGE_SIZE: usize = 500;

// =============================================================================
// Transport
// =============================================================================

/// Transport seam for aggregator calls (allows faking the API in tests).
#[async_trait]
pub trait AggregatorTransport: Send + Sync {
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<UpstreamReply, TransportError>;
}

/// Production transport over reqwest.
pub struct HttpAggregatorTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAggregatorTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TellerError::Config(format!("failed to build aggregator http client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AggregatorTransport for HttpAggregatorTransport {
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<UpstreamReply, TransportError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(body)
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
// Aggregator client
// =============================================================================

/// Static configuration for one aggregator client instance.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// API client id issued by the aggregator
    pub client_id: String,
    /// API secret issued by the aggregator
    pub client_secret: String,
}

/// Which kind of link session to open in the hosted flow.
pub enum LinkMode {
    /// First-time link: the user picks an institution and enters credentials
    Create,
    /// Repair an existing item whose credentials went stale
    Update { access_token: String },
}

/// Result of exchanging a public token.
#[derive(Debug, Clone)]
pub struct ExchangedItem {
    pub access_token: String,
    pub item_id: String,
}

/// Adapter for the hosted aggregator API.
pub struct AggregatorClient<T: AggregatorTransport> {
    transport: Arc<T>,
    config: AggregatorConfig,
}

impl<T: AggregatorTransport> AggregatorClient<T> {
    pub fn new(transport: Arc<T>, config: AggregatorConfig) -> Self {
        Self { transport, config }
    }

    /// Open a hosted link session and return the short-lived link token.
    pub async fn create_link_token(&self, user_id: &str, mode: LinkMode) -> Result<String> {
        let mut body = serde_json::json!({
            "client_id": self.config.client_id,
            "secret": self.config.client_secret,
            "client_name": "teller",
            "language": "en",
            "country_codes": ["US"],
            "user": {"client_user_id": user_id},
        });
        match mode {
            // Products are only declared on first link; update sessions are
            // scoped to the existing item
            LinkMode::Create => {
                body["products"] = serde_json::json!(["transactions"]);
            }
            LinkMode::Update { access_token } => {
                body["access_token"] = serde_json::json!(access_token);
            }
        }

        #[derive(Deserialize)]
        struct LinkTokenResponse {
            link_token: String,
        }

        let parsed: LinkTokenResponse = self.call("link/token/create", &body).await?;
        Ok(parsed.link_token)
    }

    /// Trade the public token from a completed link session for a long-lived
    /// access token. The caller seals the access token before storing it.
    pub async fn exchange_public_token(&self, public_token: &str) -> Result<ExchangedItem> {
        let body = serde_json::json!({
            "client_id": self.config.client_id,
            "secret": self.config.client_secret,
            "public_token": public_token,
        });

        #[derive(Deserialize)]
        struct ExchangeResponse {
            access_token: String,
            item_id: String,
        }

        let parsed: ExchangeResponse = self.call("item/public_token/exchange", &body).await?;
        Ok(ExchangedItem {
            access_token: parsed.access_token,
            item_id: parsed.item_id,
        })
    }

    /// Pull all accounts on the item.
    pub async fn fetch_accounts(&self, access_token: &str) -> Result<Vec<CanonicalAccount>> {
        let body = serde_json::json!({
            "client_id": self.config.client_id,
            "secret": self.config.client_secret,
            "access_token": access_token,
        });

        let parsed: AccountsResponse = self.call("accounts/get", &body).await?;
        let institution_id = parsed
            .item
            .and_then(|item| item.institution_id)
            .unwrap_or_else(|| "unknown".to_string());

        Ok(parsed
            .accounts
            .into_iter()
            .map(|native| map_account(&institution_id, native))
            .collect())
    }

    /// Pull transactions for the date window, following pagination until the
    /// upstream-reported total is reached.
    pub async fn fetch_transactions(
        &self,
        access_token: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<CanonicalTransaction>> {
        let mut collected: Vec<CanonicalTransaction> = Vec::new();

        loop {
            let body = serde_json::json!({
                "client_id": self.config.client_id,
                "secret": self.config.client_secret,
                "access_token": access_token,
                "start_date": start_date.format("%Y-%m-%d").to_string(),
                "end_date": end_date.format("%Y-%m-%d").to_string(),
                "options": {
                    "count": TRANSACTIONS_PAGE_SIZE,
                    "offset": collected.len(),
                },
            });

            let parsed: TransactionsResponse = self.call("transactions/get", &body).await?;
            let page_len = parsed.transactions.len();
            collected.extend(parsed.transactions.into_iter().map(map_transaction));

            debug!(
                fetched = collected.len(),
                total = parsed.total_transactions,
                "aggregator transactions page"
            );

            if page_len == 0 || collected.len() >= parsed.total_transactions {
                break;
            }
        }

        Ok(collected)
    }

    /// Revoke the item upstream. Callers treat failure as best-effort: the
    /// local records are removed either way.
    pub async fn remove_item(&self, access_token: &str) -> Result<()> {
        let body = serde_json::json!({
            "client_id": self.config.client_id,
            "secret": self.config.client_secret,
            "access_token": access_token,
        });

        let _: serde_json::Value = self.call("item/remove", &body).await?;
        Ok(())
    }

    /// POST, classify failures, deserialize the success body.
    async fn call<R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<R> {
        let reply = self
            .transport
            .post_json(path, body)
            .await
            .map_err(|err| TellerError::UpstreamUnavailable(err.to_string()))?;

        check_reply(path, &reply)?;

        serde_json::from_str(&reply.body).map_err(|err| {
            TellerError::UnknownUpstream(format!(
                "aggregator {} response did not match contract: {}",
                path, err
            ))
        })
    }
}

/// Map a non-2xx reply onto the error taxonomy using the machine-readable
/// error code the aggregator puts in its error bodies.
fn check_reply(path: &str, reply: &UpstreamReply) -> Result<()> {
    if (200..300).contains(&reply.status) {
        return Ok(());
    }

    #[derive(Deserialize, Default)]
    struct ErrorBody {
        #[serde(default)]
        error_code: Option<String>,
        #[serde(default)]
        error_message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(&reply.body).unwrap_or_default();
    let code = parsed.error_code.unwrap_or_default();
    let message = parsed
        .error_message
        .unwrap_or_else(|| format!("HTTP {}", reply.status));
    let detail = if code.is_empty() {
        format!("{}: {}", path, message)
    } else {
        format!("{}: {} ({})", path, code, message)
    };

    warn!(path = %path, status = reply.status, code = %code, "aggregator call failed");

    Err(match code.as_str() {
        // The item needs the user back in the link flow; retrying is useless
        "ITEM_LOGIN_REQUIRED" | "INVALID_CREDENTIALS" | "ITEM_LOCKED" => {
            TellerError::TerminalCredential(detail)
        }
        // Our own API keys are wrong; an operator problem, not a user one
        "INVALID_API_KEYS" => TellerError::Config(detail),
        "RATE_LIMIT_EXCEEDED" => TellerError::UpstreamUnavailable(detail),
        _ if reply.status == 429 || reply.status >= 500 => {
            TellerError::UpstreamUnavailable(detail)
        }
        _ => TellerError::UnknownUpstream(detail),
    })
}

// =============================================================================
// Native wire shapes and mapping
// =============================================================================

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<NativeAccount>,
    #[serde(default)]
    item: Option<NativeItem>,
}

#[derive(Deserialize)]
struct NativeItem {
    #[serde(default)]
    institution_id: Option<String>,
}

#[derive(Deserialize)]
struct NativeAccount {
    account_id: String,
    name: String,
    #[serde(default)]
    official_name: Option<String>,
    #[serde(default)]
    mask: Option<String>,
    #[serde(rename = "type")]
    account_type: String,
    #[serde(default)]
    subtype: Option<String>,
    balances: NativeBalances,
}

#[derive(Deserialize)]
struct NativeBalances {
    #[serde(default)]
    available: Option<f64>,
    #[serde(default)]
    current: Option<f64>,
    #[serde(default)]
    limit: Option<f64>,
    #[serde(default)]
    iso_currency_code: Option<String>,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    transactions: Vec<NativeTransaction>,
    total_transactions: usize,
}

#[derive(Deserialize)]
struct NativeTransaction {
    transaction_id: String,
    account_id: String,
    /// Native sign convention: positive = money out
    amount: f64,
    date: NaiveDate,
    name: String,
    #[serde(default)]
    merchant_name: Option<String>,
    #[serde(default)]
    category: Option<Vec<String>>,
    #[serde(default)]
    pending: bool,
    #[serde(default)]
    iso_currency_code: Option<String>,
}

fn map_account(institution_id: &str, native: NativeAccount) -> CanonicalAccount {
    let id = if native.account_id.trim().is_empty() {
        warn!(institution_id = %institution_id, "aggregator account id empty; synthesized id");
        Uuid::new_v4().to_string()
    } else {
        native.account_id
    };

    CanonicalAccount {
        id,
        provider_id: ProviderId::Aggregator,
        institution_id: institution_id.to_string(),
        institution_name: institution_id.to_string(),
        display_name: native.official_name.unwrap_or(native.name),
        account_class: aggregator_account_class(&native.account_type),
        subtype: native.subtype,
        masked_number: native.mask,
        currency_code: native
            .balances
            .iso_currency_code
            .clone()
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        balance: Balance {
            // Liability balances stay positive-owed; no sign work on balances
            current_minor: native.balances.current.map(minor_units_from_major).unwrap_or(0),
            available_minor: native.balances.available.map(minor_units_from_major),
            limit_minor: native.balances.limit.map(minor_units_from_major),
        },
    }
}

fn aggregator_account_class(raw: &str) -> AccountClass {
    match raw.trim().to_ascii_lowercase().as_str() {
        "depository" => AccountClass::Depository,
        "credit" => AccountClass::Credit,
        "investment" | "brokerage" => AccountClass::Investment,
        "loan" => AccountClass::Loan,
        _ => AccountClass::Other,
    }
}

fn map_transaction(native: NativeTransaction) -> CanonicalTransaction {
    CanonicalTransaction {
        id: native.transaction_id,
        account_id: native.account_id,
        // The one sign flip: native positive-out becomes canonical
        // negative-out
        amount_minor: -minor_units_from_major(native.amount),
        posted_date: native.date,
        description: native.name,
        merchant_name: native.merchant_name,
        // The category path goes coarse to fine; keep the finest
        category_hint: native.category.and_then(|path| path.last().cloned()),
        pending: native.pending,
        currency_code: native
            .iso_currency_code
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that records every request and replays scripted replies.
    struct RecordingTransport {
        requests: Mutex<Vec<(String, serde_json::Value)>>,
        replies: Mutex<VecDeque<std::result::Result<UpstreamReply, TransportError>>>,
    }

    impl RecordingTransport {
        fn new(
            replies: Vec<std::result::Result<UpstreamReply, TransportError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.into()),
            })
        }

        fn requests(&self) -> Vec<(String, serde_json::Value)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AggregatorTransport for RecordingTransport {
        async fn post_json(
            &self,
            path: &str,
            body: &serde_json::Value,
        ) -> std::result::Result<UpstreamReply, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((path.to_string(), body.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("aggregator called more times than scripted")
        }
    }

    fn ok_reply(body: serde_json::Value) -> std::result::Result<UpstreamReply, TransportError> {
        Ok(UpstreamReply {
            status: 200,
            body: body.to_string(),
        })
    }

    fn status_reply(
        status: u16,
        body: serde_json::Value,
    ) -> std::result::Result<UpstreamReply, TransportError> {
        Ok(UpstreamReply {
            status,
            body: body.to_string(),
        })
    }

    fn client(transport: Arc<RecordingTransport>) -> AggregatorClient<RecordingTransport> {
        AggregatorClient::new(
            transport,
            AggregatorConfig {
                client_id: "cid".to_string(),
                client_secret: "shh".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_link_token_declares_products() {
        let transport =
            RecordingTransport::new(vec![ok_reply(serde_json::json!({"link_token": "lt-1"}))]);
        let client = client(Arc::clone(&transport));

        let token = client
            .create_link_token("user-1", LinkMode::Create)
            .await
            .unwrap();
        assert_eq!(token, "lt-1");

        let (path, body) = &transport.requests()[0];
        assert_eq!(path, "link/token/create");
        assert_eq!(body["products"], serde_json::json!(["transactions"]));
        assert_eq!(body["user"]["client_user_id"], "user-1");
        assert!(body.get("access_token").is_none());
    }

    #[tokio::test]
    async fn test_update_link_token_scopes_to_item() {
        let transport =
            RecordingTransport::new(vec![ok_reply(serde_json::json!({"link_token": "lt-2"}))]);
        let client = client(Arc::clone(&transport));

        client
            .create_link_token(
                "user-1",
                LinkMode::Update {
                    access_token: "at-9".to_string(),
                },
            )
            .await
            .unwrap();

        let (_, body) = &transport.requests()[0];
        assert_eq!(body["access_token"], "at-9");
        assert!(body.get("products").is_none());
    }

    #[tokio::test]
    async fn test_exchange_public_token() {
        let transport = RecordingTransport::new(vec![ok_reply(serde_json::json!({
            "access_token": "at-1",
            "item_id": "item-1",
        }))]);
        let client = client(Arc::clone(&transport));

        let item = client.exchange_public_token("pt-1").await.unwrap();
        assert_eq!(item.access_token, "at-1");
        assert_eq!(item.item_id, "item-1");

        let (path, body) = &transport.requests()[0];
        assert_eq!(path, "item/public_token/exchange");
        assert_eq!(body["public_token"], "pt-1");
    }

    #[tokio::test]
    async fn test_fetch_accounts_maps_balances_without_sign_change() {
        let transport = RecordingTransport::new(vec![ok_reply(serde_json::json!({
            "accounts": [
                {
                    "account_id": "acc-chk",
                    "name": "Everyday Checking",
                    "official_name": "Premier Everyday Checking",
                    "mask": "0417",
                    "type": "depository",
                    "subtype": "checking",
                    "balances": {"available": 190.25, "current": 210.5, "iso_currency_code": "USD"}
                },
                {
                    "account_id": "acc-card",
                    "name": "Rewards Card",
                    "type": "credit",
                    "balances": {"current": 432.1, "limit": 5000.0}
                }
            ],
            "item": {"institution_id": "ins_42"}
        }))]);
        let client = client(Arc::clone(&transport));

        let accounts = client.fetch_accounts("at-1").await.unwrap();
        assert_eq!(accounts.len(), 2);

        let checking = &accounts[0];
        assert_eq!(checking.id, "acc-chk");
        assert_eq!(checking.provider_id, ProviderId::Aggregator);
        assert_eq!(checking.institution_id, "ins_42");
        assert_eq!(checking.display_name, "Premier Everyday Checking");
        assert_eq!(checking.account_class, AccountClass::Depository);
        assert_eq!(checking.masked_number.as_deref(), Some("0417"));
        assert_eq!(checking.balance.current_minor, 21_050);
        assert_eq!(checking.balance.available_minor, Some(19_025));

        // Credit card debt stays positive-owed
        let card = &accounts[1];
        assert_eq!(card.account_class, AccountClass::Credit);
        assert!(card.account_class.is_liability());
        assert_eq!(card.balance.current_minor, 43_210);
        assert_eq!(card.balance.limit_minor, Some(500_000));
        assert_eq!(card.currency_code, "USD");
    }

    #[tokio::test]
    async fn test_fetch_transactions_negates_amounts() {
        let transport = RecordingTransport::new(vec![ok_reply(serde_json::json!({
            "transactions": [
                {
                    "transaction_id": "t-1",
                    "account_id": "acc-chk",
                    "amount": 12.34,
                    "date": "2024-01-05",
                    "name": "Coffee",
                    "merchant_name": "Blue Bottle",
                    "category": ["Food and Drink", "Coffee Shop"],
                    "pending": false
                },
                {
                    "transaction_id": "t-2",
                    "account_id": "acc-chk",
                    "amount": -56.78,
                    "date": "2024-01-06",
                    "name": "Refund",
                    "pending": true
                }
            ],
            "total_transactions": 2
        }))]);
        let client = client(Arc::clone(&transport));

        let txns = client
            .fetch_transactions(
                "at-1",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .await
            .unwrap();

        // Native positive (money out) becomes canonical negative, and the
        // native-negative refund becomes a canonical inflow
        assert_eq!(txns[0].amount_minor, -1_234);
        assert_eq!(txns[1].amount_minor, 5_678);
        assert_eq!(txns[0].category_hint.as_deref(), Some("Coffee Shop"));
        assert_eq!(txns[0].merchant_name.as_deref(), Some("Blue Bottle"));
        assert!(txns[1].pending);
    }

    #[tokio::test]
    async fn test_fetch_transactions_paginates_to_total() {
        let page = |ids: &[&str], total: usize| {
            ok_reply(serde_json::json!({
                "transactions": ids.iter().map(|id| serde_json::json!({
                    "transaction_id": id,
                    "account_id": "acc",
                    "amount": 1.0,
                    "date": "2024-01-05",
                    "name": "x",
                })).collect::<Vec<_>>(),
                "total_transactions": total,
            }))
        };
        let transport = RecordingTransport::new(vec![
            page(&["t-1", "t-2"], 3),
            page(&["t-3"], 3),
        ]);
        let client = client(Arc::clone(&transport));

        let txns = client
            .fetch_transactions(
                "at-1",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(txns.len(), 3);
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1["options"]["offset"], 0);
        assert_eq!(requests[1].1["options"]["offset"], 2);
    }

    #[tokio::test]
    async fn test_login_required_maps_to_terminal() {
        let transport = RecordingTransport::new(vec![status_reply(
            400,
            serde_json::json!({
                "error_code": "ITEM_LOGIN_REQUIRED",
                "error_message": "the login details of this item have changed",
            }),
        )]);
        let client = client(Arc::clone(&transport));

        let err = client.fetch_accounts("at-1").await.unwrap_err();
        assert!(matches!(err, TellerError::TerminalCredential(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_and_5xx_map_to_unavailable() {
        let transport = RecordingTransport::new(vec![
            status_reply(429, serde_json::json!({"error_code": "RATE_LIMIT_EXCEEDED"})),
            status_reply(502, serde_json::json!("bad gateway")),
        ]);
        let client = client(Arc::clone(&transport));

        let err = client.fetch_accounts("at-1").await.unwrap_err();
        assert!(matches!(err, TellerError::UpstreamUnavailable(_)));
        let err = client.fetch_accounts("at-1").await.unwrap_err();
        assert!(matches!(err, TellerError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unrecognized_failure_is_unknown() {
        let transport =
            RecordingTransport::new(vec![status_reply(418, serde_json::json!({"oops": true}))]);
        let client = client(Arc::clone(&transport));

        let err = client.fetch_accounts("at-1").await.unwrap_err();
        assert!(matches!(err, TellerError::UnknownUpstream(_)));
    }

    #[tokio::test]
    async fn test_remove_item_posts_access_token() {
        let transport =
            RecordingTransport::new(vec![ok_reply(serde_json::json!({"removed": true}))]);
        let client = client(Arc::clone(&transport));

        client.remove_item("at-1").await.unwrap();

        let (path, body) = &transport.requests()[0];
        assert_eq!(path, "item/remove");
        assert_eq!(body["access_token"], "at-1");
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_as_unavailable() {
        let transport = RecordingTransport::new(vec![Err(TransportError::Timeout)]);
        let client = client(Arc::clone(&transport));

        let err = client.fetch_accounts("at-1").await.unwrap_err();
        assert!(matches!(err, TellerError::UpstreamUnavailable(_)));
    }
}
