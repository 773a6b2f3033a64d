//! Connection manager
//!
//! Orchestrates the "link an institution" and "remove an institution" flows
//! across both provider adapters, owns the persisted connection records, and
//! keeps the canonical account/transaction collections in step with them.
//!
//! Ordering contract for `connect`/`sync`: the connection record is written
//! before the bulk account/transaction writes, which land before the summary
//! invalidation. A reader can therefore never observe accounts without their
//! owning connection, and an interrupted bulk write leaves a connection a
//! later `sync` can repair — the upstream secret is never lost.
//!
//! Storage goes through the [`ConnectionStore`] seam, the same arrangement
//! as the transport seams on the provider adapters: production runs against
//! MongoDB, tests drive the flows over an in-memory store.

use async_trait::async_trait;
use bson::{doc, DateTime};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::schemas::{
    AccountDoc, CategoryOverrideDoc, ConnectionDoc, ConnectionStatus, TransactionDoc,
    ACCOUNT_COLLECTION, CATEGORY_OVERRIDE_COLLECTION, CONNECTION_COLLECTION,
    TRANSACTION_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::model::{CanonicalAccount, CanonicalTransaction, ProviderId};
use crate::providers::{
    AggregatorClient, AggregatorTransport, LinkMode, ScrapeTransport, ScraperClient,
};
use crate::services::summary::SummaryService;
use crate::types::{Result, TellerError};
use crate::vault::Vault;

// =============================================================================
// Request / outcome shapes
// =============================================================================

/// Which kind of hosted link session to request.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkTokenMode {
    #[default]
    Create,
    Update,
}

/// Body for `POST /api/v1/link-token`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LinkTokenRequest {
    #[serde(default)]
    pub mode: LinkTokenMode,
    /// Required in update mode: which connection to re-authenticate
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Issued link token plus the mode actually used (update degrades to create
/// when the stored secret cannot be decrypted).
#[derive(Debug, Clone, Serialize)]
pub struct LinkTokenOutcome {
    pub link_token: String,
    pub mode: &'static str,
}

/// Body for `POST /api/v1/connections`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectRequest {
    pub provider: ProviderId,
    /// Aggregator: public token from the completed hosted link flow
    #[serde(default)]
    pub public_token: Option<String>,
    /// Scraper: the company id of the institution to scrape
    #[serde(default)]
    pub institution_id: Option<String>,
    /// Display name; falls back to the institution id
    #[serde(default)]
    pub institution_name: Option<String>,
    /// Scraper: bank credentials, sealed into the vault on success
    #[serde(default)]
    pub credentials: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectOutcome {
    pub connection_id: String,
    pub accounts_count: usize,
    pub transactions_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub connection_id: String,
    pub accounts_count: usize,
    pub transactions_count: usize,
    pub synced_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectOutcome {
    pub connection_id: String,
    pub deleted_accounts: u64,
    pub deleted_transactions: u64,
    pub deleted_overrides: u64,
}

/// Connection as exposed over the API. Deliberately a separate shape from
/// `ConnectionDoc`: the stored secret can never leak through serialization
/// because this type simply has no field for it.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub connection_id: String,
    pub provider: ProviderId,
    pub institution_id: String,
    pub institution_name: String,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<ConnectionDoc> for ConnectionView {
    fn from(doc: ConnectionDoc) -> Self {
        Self {
            connection_id: doc.connection_id,
            provider: doc.provider,
            institution_id: doc.institution_id,
            institution_name: doc.institution_name,
            status: doc.status,
            last_synced_at: doc
                .last_synced_at
                .and_then(|at| at.try_to_rfc3339_string().ok()),
            created_at: doc
                .metadata
                .created_at
                .and_then(|at| at.try_to_rfc3339_string().ok()),
        }
    }
}

// =============================================================================
// In-flight guard
// =============================================================================

/// Releases the in-flight slot when the connect/sync future completes or is
/// cancelled mid-retry.
struct InFlightGuard<'a> {
    slots: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.key);
    }
}

/// Claim the slot for one (user, provider, institution) triple, or reject if
/// an identical operation is already running.
fn claim_slot<'a>(slots: &'a DashMap<String, ()>, key: String) -> Result<InFlightGuard<'a>> {
    match slots.entry(key.clone()) {
        dashmap::mapref::entry::Entry::Occupied(_) => Err(TellerError::Validation(
            "an operation for this institution is already in progress".to_string(),
        )),
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(());
            Ok(InFlightGuard { slots, key })
        }
    }
}

// =============================================================================
// Id sanitization
// =============================================================================

/// Replace characters that are illegal or hazardous as document-store keys.
/// Deterministic, so the same upstream id maps to the same clean id on every
/// sync; an id that sanitizes to nothing gets a synthetic one.
pub(crate) fn sanitize_document_id(raw: &str) -> String {
    let clean: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.chars().all(|c| c == '_') {
        Uuid::new_v4().to_string()
    } else {
        clean
    }
}

/// Sanitize every account and transaction id, keeping the transaction
/// back-references pointing at the renamed accounts.
pub(crate) fn sanitize_ids(
    accounts: &mut [CanonicalAccount],
    transactions: &mut [CanonicalTransaction],
) {
    let mut renames: HashMap<String, String> = HashMap::new();

    for account in accounts.iter_mut() {
        let clean = sanitize_document_id(&account.id);
        if clean != account.id {
            debug!(raw = %account.id, clean = %clean, "sanitized account id");
            renames.insert(account.id.clone(), clean.clone());
            account.id = clean;
        }
    }

    for txn in transactions.iter_mut() {
        if let Some(clean) = renames.get(&txn.account_id) {
            txn.account_id = clean.clone();
        }
        let clean = sanitize_document_id(&txn.id);
        if clean != txn.id {
            txn.id = clean;
        }
    }
}

/// Wrap a storage failure that happened after the upstream handshake already
/// succeeded. Logged loudly: the stored data lags upstream state and an
/// operator may need to trigger a sync.
fn persistence_after_handshake(step: &str, user_id: &str, err: TellerError) -> TellerError {
    error!(
        user_id = %user_id,
        step = %step,
        error = %err,
        "persistence failed after successful upstream handshake; local data lags upstream"
    );
    TellerError::Persistence(format!(
        "{} write failed after a successful upstream handshake",
        step
    ))
}

/// Bulk delete with one batch-level retry. The store performs single
/// attempts; the retry policy lives here with the flow that needs it.
async fn delete_owned<F, Fut>(what: &str, attempt: F) -> Result<u64>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    match attempt().await {
        Ok(count) => Ok(count),
        Err(first) => {
            warn!(what = %what, error = %first, "bulk delete failed; retrying once");
            attempt().await
        }
    }
}

// =============================================================================
// Storage seam
// =============================================================================

/// Storage seam for the connection service (allows faking the store in
/// tests, so the connect/sync/disconnect flows are covered end to end, not
/// just the pure pieces).
///
/// Deletes are single attempts; retries belong to the service.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn insert_connection(&self, doc: ConnectionDoc) -> Result<()>;

    async fn find_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<Option<ConnectionDoc>>;

    /// All of a user's connections, newest first.
    async fn connections_for_user(&self, user_id: &str) -> Result<Vec<ConnectionDoc>>;

    async fn set_connection_status(
        &self,
        connection_id: &str,
        status: ConnectionStatus,
    ) -> Result<()>;

    /// Stamp a successful sync: active status plus the sync time.
    async fn record_sync(&self, connection_id: &str, synced_at: DateTime) -> Result<()>;

    async fn replace_secret(&self, connection_id: &str, sealed: &str) -> Result<()>;

    async fn delete_connection(&self, connection_id: &str) -> Result<u64>;

    /// Swap the connection's account set for the given one.
    async fn replace_accounts(
        &self,
        user_id: &str,
        connection_id: &str,
        accounts: Vec<CanonicalAccount>,
    ) -> Result<usize>;

    /// Upsert on `(connection_id, transaction.id)` so history accumulates
    /// across syncs instead of duplicating.
    async fn upsert_transactions(
        &self,
        user_id: &str,
        connection_id: &str,
        transactions: Vec<CanonicalTransaction>,
    ) -> Result<usize>;

    async fn purge_accounts(&self, connection_id: &str) -> Result<u64>;

    async fn purge_transactions(&self, connection_id: &str) -> Result<u64>;

    async fn purge_overrides(&self, connection_id: &str) -> Result<u64>;
}

/// Production store over the canonical MongoDB collections.
pub struct MongoConnectionStore {
    connections: MongoCollection<ConnectionDoc>,
    accounts: MongoCollection<AccountDoc>,
    transactions: MongoCollection<TransactionDoc>,
    overrides: MongoCollection<CategoryOverrideDoc>,
}

impl MongoConnectionStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            connections: mongo.collection(CONNECTION_COLLECTION).await?,
            accounts: mongo.collection(ACCOUNT_COLLECTION).await?,
            transactions: mongo.collection(TRANSACTION_COLLECTION).await?,
            overrides: mongo.collection(CATEGORY_OVERRIDE_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl ConnectionStore for MongoConnectionStore {
    async fn insert_connection(&self, doc: ConnectionDoc) -> Result<()> {
        self.connections.insert_one(doc).await?;
        Ok(())
    }

    async fn find_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<Option<ConnectionDoc>> {
        self.connections
            .find_one(doc! { "connection_id": connection_id, "user_id": user_id })
            .await
    }

    async fn connections_for_user(&self, user_id: &str) -> Result<Vec<ConnectionDoc>> {
        self.connections
            .find_many_sorted(
                doc! { "user_id": user_id },
                doc! { "metadata.created_at": -1 },
            )
            .await
    }

    async fn set_connection_status(
        &self,
        connection_id: &str,
        status: ConnectionStatus,
    ) -> Result<()> {
        self.connections
            .update_one(
                doc! { "connection_id": connection_id },
                doc! { "$set": { "status": bson::to_bson(&status)? } },
            )
            .await?;
        Ok(())
    }

    async fn record_sync(&self, connection_id: &str, synced_at: DateTime) -> Result<()> {
        self.connections
            .update_one(
                doc! { "connection_id": connection_id },
                doc! { "$set": {
                    "status": bson::to_bson(&ConnectionStatus::Active)?,
                    "last_synced_at": synced_at,
                } },
            )
            .await?;
        Ok(())
    }

    async fn replace_secret(&self, connection_id: &str, sealed: &str) -> Result<()> {
        self.connections
            .update_one(
                doc! { "connection_id": connection_id },
                doc! { "$set": { "encrypted_secret": sealed } },
            )
            .await?;
        Ok(())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<u64> {
        self.connections
            .delete_one(doc! { "connection_id": connection_id })
            .await
    }

    async fn replace_accounts(
        &self,
        user_id: &str,
        connection_id: &str,
        accounts: Vec<CanonicalAccount>,
    ) -> Result<usize> {
        self.accounts
            .delete_many(doc! { "connection_id": connection_id })
            .await?;
        let docs: Vec<AccountDoc> = accounts
            .into_iter()
            .map(|account| AccountDoc::new(user_id.to_string(), connection_id.to_string(), account))
            .collect();
        self.accounts.insert_many(docs).await
    }

    async fn upsert_transactions(
        &self,
        user_id: &str,
        connection_id: &str,
        transactions: Vec<CanonicalTransaction>,
    ) -> Result<usize> {
        let mut count = 0;
        for txn in transactions {
            let filter = doc! { "connection_id": connection_id, "transaction.id": &txn.id };
            let update = doc! {
                "$set": {
                    "user_id": user_id,
                    "connection_id": connection_id,
                    "transaction": bson::to_bson(&txn)?,
                }
            };
            self.transactions.upsert_one(filter, update).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn purge_accounts(&self, connection_id: &str) -> Result<u64> {
        self.accounts
            .delete_many(doc! { "connection_id": connection_id })
            .await
    }

    async fn purge_transactions(&self, connection_id: &str) -> Result<u64> {
        self.transactions
            .delete_many(doc! { "connection_id": connection_id })
            .await
    }

    async fn purge_overrides(&self, connection_id: &str) -> Result<u64> {
        self.overrides
            .delete_many(doc! { "connection_id": connection_id })
            .await
    }
}

// =============================================================================
// Connection service
// =============================================================================

/// Orchestrates connect/sync/disconnect across both provider adapters.
pub struct ConnectionService<A: AggregatorTransport, S: ScrapeTransport> {
    aggregator: AggregatorClient<A>,
    scraper: ScraperClient<S>,
    vault: Vault,
    summaries: Arc<SummaryService>,
    store: Arc<dyn ConnectionStore>,
    /// One in-flight connect/sync per (user, provider, institution)
    in_flight: DashMap<String, ()>,
    /// Transaction fetch window for aggregator syncs
    lookback_days: i64,
}

impl<A: AggregatorTransport, S: ScrapeTransport> ConnectionService<A, S> {
    pub async fn new(
        mongo: &MongoClient,
        aggregator: AggregatorClient<A>,
        scraper: ScraperClient<S>,
        vault: Vault,
        summaries: Arc<SummaryService>,
        lookback_days: i64,
    ) -> Result<Self> {
        let store = MongoConnectionStore::new(mongo).await?;
        Ok(Self::with_store(
            Arc::new(store),
            aggregator,
            scraper,
            vault,
            summaries,
            lookback_days,
        ))
    }

    /// Build the service over any store implementation. Production wiring
    /// goes through [`ConnectionService::new`]; tests inject their own store.
    pub fn with_store(
        store: Arc<dyn ConnectionStore>,
        aggregator: AggregatorClient<A>,
        scraper: ScraperClient<S>,
        vault: Vault,
        summaries: Arc<SummaryService>,
        lookback_days: i64,
    ) -> Self {
        Self {
            aggregator,
            scraper,
            vault,
            summaries,
            store,
            in_flight: DashMap::new(),
            lookback_days,
        }
    }

    /// Issue a hosted link token. Update mode re-authenticates an existing
    /// connection; if its stored secret cannot be decrypted the request
    /// degrades to a fresh create-mode token instead of failing.
    pub async fn link_token(
        &self,
        user_id: &str,
        request: LinkTokenRequest,
    ) -> Result<LinkTokenOutcome> {
        let mode = match request.mode {
            LinkTokenMode::Create => LinkMode::Create,
            LinkTokenMode::Update => {
                let connection_id = request.connection_id.as_deref().ok_or_else(|| {
                    TellerError::Validation(
                        "connection_id is required for update-mode link tokens".to_string(),
                    )
                })?;
                let conn = self.require_connection(user_id, connection_id).await?;
                if conn.provider != ProviderId::Aggregator {
                    return Err(TellerError::Validation(
                        "link tokens only apply to aggregator connections".to_string(),
                    ));
                }
                match self.vault.open(&conn.encrypted_secret) {
                    Ok(secret) => LinkMode::Update {
                        access_token: secret,
                    },
                    Err(err) => {
                        warn!(
                            connection_id = %connection_id,
                            error = %err,
                            "stored secret unreadable; degrading update link to create"
                        );
                        LinkMode::Create
                    }
                }
            }
        };

        let mode_label = match mode {
            LinkMode::Create => "create",
            LinkMode::Update { .. } => "update",
        };
        let link_token = self.aggregator.create_link_token(user_id, mode).await?;

        Ok(LinkTokenOutcome {
            link_token,
            mode: mode_label,
        })
    }

    /// Link a new institution. Dispatches on the provider tag exactly once;
    /// nothing downstream re-checks it.
    pub async fn connect(&self, user_id: &str, request: ConnectRequest) -> Result<ConnectOutcome> {
        match request.provider {
            ProviderId::Aggregator => self.connect_aggregator(user_id, request).await,
            ProviderId::RegionalScraper => self.connect_scraper(user_id, request).await,
        }
    }

    async fn connect_aggregator(
        &self,
        user_id: &str,
        request: ConnectRequest,
    ) -> Result<ConnectOutcome> {
        let public_token = request.public_token.as_deref().ok_or_else(|| {
            TellerError::Validation("public_token is required for aggregator connects".to_string())
        })?;

        let discriminant = request
            .institution_id
            .clone()
            .unwrap_or_else(|| public_token.to_string());
        let _slot = claim_slot(
            &self.in_flight,
            flight_key(user_id, ProviderId::Aggregator, &discriminant),
        )?;

        let item = self.aggregator.exchange_public_token(public_token).await?;
        let sealed = self.vault.encrypt(&item.access_token)?;

        let institution_id = request
            .institution_id
            .unwrap_or_else(|| "unknown".to_string());
        let institution_name = request
            .institution_name
            .unwrap_or_else(|| institution_id.clone());

        let doc = ConnectionDoc::new(
            user_id.to_string(),
            ProviderId::Aggregator,
            item.item_id,
            institution_id,
            institution_name,
            sealed,
        );
        let connection_id = doc.connection_id.clone();

        self.store
            .insert_connection(doc)
            .await
            .map_err(|e| persistence_after_handshake("connection", user_id, e))?;

        // Accounts/transactions for this provider are pulled on demand (the
        // API is cheap to call again); connect persists the link only
        self.invalidate_summary(user_id).await;

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            provider = %ProviderId::Aggregator,
            "connection established"
        );

        Ok(ConnectOutcome {
            connection_id,
            accounts_count: 0,
            transactions_count: 0,
        })
    }

    async fn connect_scraper(
        &self,
        user_id: &str,
        request: ConnectRequest,
    ) -> Result<ConnectOutcome> {
        let institution_id = request
            .institution_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                TellerError::Validation(
                    "institution_id is required for scraper connects".to_string(),
                )
            })?;
        let credentials = request.credentials.as_ref().ok_or_else(|| {
            TellerError::Validation("credentials are required for scraper connects".to_string())
        })?;

        let _slot = claim_slot(
            &self.in_flight,
            flight_key(user_id, ProviderId::RegionalScraper, institution_id),
        )?;

        let haul = self.scraper.scrape_all(institution_id, credentials).await?;
        let sealed = self.vault.encrypt(&credentials.to_string())?;

        let institution_name = request
            .institution_name
            .clone()
            .unwrap_or_else(|| institution_id.to_string());

        let doc = ConnectionDoc::new(
            user_id.to_string(),
            ProviderId::RegionalScraper,
            institution_id.to_string(),
            institution_id.to_string(),
            institution_name,
            sealed,
        );
        let connection_id = doc.connection_id.clone();

        self.store
            .insert_connection(doc)
            .await
            .map_err(|e| persistence_after_handshake("connection", user_id, e))?;

        let (accounts_count, transactions_count) = self
            .persist_canonical(user_id, &connection_id, haul.accounts, haul.transactions)
            .await
            .map_err(|e| persistence_after_handshake("account/transaction", user_id, e))?;

        self.mark_synced(&connection_id).await;
        self.invalidate_summary(user_id).await;

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            provider = %ProviderId::RegionalScraper,
            accounts = accounts_count,
            transactions = transactions_count,
            "connection established"
        );

        Ok(ConnectOutcome {
            connection_id,
            accounts_count,
            transactions_count,
        })
    }

    /// Re-fetch a connection's data with its stored secret and fold the
    /// result into the canonical collections.
    pub async fn sync(&self, user_id: &str, connection_id: &str) -> Result<SyncOutcome> {
        let conn = self.require_connection(user_id, connection_id).await?;

        let _slot = claim_slot(
            &self.in_flight,
            flight_key(user_id, conn.provider, &conn.institution_id),
        )?;

        let secret = self.vault.open(&conn.encrypted_secret)?;
        self.reseal_if_legacy(&conn, &secret).await;

        let (accounts, transactions) = match conn.provider {
            ProviderId::Aggregator => {
                let end = Utc::now().date_naive();
                let start = end - ChronoDuration::days(self.lookback_days);
                let accounts = match self.aggregator.fetch_accounts(&secret).await {
                    Ok(accounts) => accounts,
                    Err(err) => return Err(self.note_fetch_failure(connection_id, err).await),
                };
                let transactions = match self
                    .aggregator
                    .fetch_transactions(&secret, start, end)
                    .await
                {
                    Ok(transactions) => transactions,
                    Err(err) => return Err(self.note_fetch_failure(connection_id, err).await),
                };
                (accounts, transactions)
            }
            ProviderId::RegionalScraper => {
                let credentials: serde_json::Value =
                    serde_json::from_str(&secret).map_err(|_| {
                        TellerError::Encryption(
                            "stored credentials did not parse as JSON".to_string(),
                        )
                    })?;
                match self
                    .scraper
                    .scrape_all(&conn.external_item_id, &credentials)
                    .await
                {
                    Ok(haul) => (haul.accounts, haul.transactions),
                    Err(err) => return Err(self.note_fetch_failure(connection_id, err).await),
                }
            }
        };

        let (accounts_count, transactions_count) = self
            .persist_canonical(user_id, connection_id, accounts, transactions)
            .await
            .map_err(|e| persistence_after_handshake("account/transaction", user_id, e))?;

        let synced_at = self.mark_synced(connection_id).await;
        self.invalidate_summary(user_id).await;

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            accounts = accounts_count,
            transactions = transactions_count,
            "connection synced"
        );

        Ok(SyncOutcome {
            connection_id: connection_id.to_string(),
            accounts_count,
            transactions_count,
            synced_at: synced_at
                .try_to_rfc3339_string()
                .unwrap_or_else(|_| synced_at.timestamp_millis().to_string()),
        })
    }

    /// Remove a connection: best-effort upstream revocation, then
    /// unconditional local deletion of the connection and everything it owns.
    pub async fn disconnect(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<DisconnectOutcome> {
        let conn = self.require_connection(user_id, connection_id).await?;

        if let Err(err) = self
            .store
            .set_connection_status(connection_id, ConnectionStatus::Revoked)
            .await
        {
            warn!(connection_id = %connection_id, error = %err, "failed to mark connection revoked");
        }

        // Observed, never propagated: local deletion proceeds regardless
        let revocation = self.revoke_upstream(&conn).await;
        if let Err(err) = revocation {
            warn!(
                connection_id = %connection_id,
                error = %err,
                "upstream revocation failed; continuing with local deletion"
            );
        }

        let deleted_accounts =
            delete_owned("accounts", || self.store.purge_accounts(connection_id)).await?;
        let deleted_transactions = delete_owned("transactions", || {
            self.store.purge_transactions(connection_id)
        })
        .await?;
        let deleted_overrides = delete_owned("category overrides", || {
            self.store.purge_overrides(connection_id)
        })
        .await?;

        if let Err(first) = self.store.delete_connection(connection_id).await {
            warn!(connection_id = %connection_id, error = %first, "connection delete failed; retrying once");
            self.store.delete_connection(connection_id).await?;
        }

        self.invalidate_summary(user_id).await;

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            deleted_accounts,
            deleted_transactions,
            deleted_overrides,
            "connection removed"
        );

        Ok(DisconnectOutcome {
            connection_id: connection_id.to_string(),
            deleted_accounts,
            deleted_transactions,
            deleted_overrides,
        })
    }

    /// List the user's connections, newest first, secrets redacted.
    pub async fn list_connections(&self, user_id: &str) -> Result<Vec<ConnectionView>> {
        let docs = self.store.connections_for_user(user_id).await?;
        Ok(docs.into_iter().map(ConnectionView::from).collect())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn require_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<ConnectionDoc> {
        self.store
            .find_connection(user_id, connection_id)
            .await?
            .ok_or_else(|| TellerError::NotFound(format!("connection {}", connection_id)))
    }

    /// Replace the connection's account set and upsert its transactions so
    /// history accumulates across syncs.
    async fn persist_canonical(
        &self,
        user_id: &str,
        connection_id: &str,
        mut accounts: Vec<CanonicalAccount>,
        mut transactions: Vec<CanonicalTransaction>,
    ) -> Result<(usize, usize)> {
        sanitize_ids(&mut accounts, &mut transactions);

        let accounts_count = self
            .store
            .replace_accounts(user_id, connection_id, accounts)
            .await?;
        let transactions_count = self
            .store
            .upsert_transactions(user_id, connection_id, transactions)
            .await?;

        Ok((accounts_count, transactions_count))
    }

    async fn revoke_upstream(&self, conn: &ConnectionDoc) -> Result<()> {
        match conn.provider {
            ProviderId::Aggregator => {
                let secret = self.vault.open(&conn.encrypted_secret)?;
                self.aggregator.remove_item(&secret).await
            }
            // The scraper holds no upstream session to revoke; the
            // credentials die with the local record
            ProviderId::RegionalScraper => Ok(()),
        }
    }

    /// A terminal credential failure flips the connection into the error
    /// state so the UI can prompt a re-link. The original error passes
    /// through untouched; transient failures leave the status alone.
    async fn note_fetch_failure(&self, connection_id: &str, err: TellerError) -> TellerError {
        if matches!(err, TellerError::TerminalCredential(_)) {
            if let Err(update_err) = self
                .store
                .set_connection_status(connection_id, ConnectionStatus::Error)
                .await
            {
                warn!(connection_id = %connection_id, error = %update_err, "failed to flag credential error");
            }
        }
        err
    }

    /// Best-effort sync stamp: active status plus the sync time. A failed
    /// stamp never fails the sync that produced the data.
    async fn mark_synced(&self, connection_id: &str) -> DateTime {
        let synced_at = DateTime::now();
        if let Err(err) = self.store.record_sync(connection_id, synced_at).await {
            warn!(connection_id = %connection_id, error = %err, "failed to record sync time");
        }
        synced_at
    }

    /// Pre-vault records store bare plaintext; seal them on the first sync
    /// that reads them.
    async fn reseal_if_legacy(&self, conn: &ConnectionDoc, secret: &str) {
        if Vault::is_encrypted(&conn.encrypted_secret) {
            return;
        }

        let sealed = match self.vault.encrypt(secret) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(connection_id = %conn.connection_id, error = %err, "failed to seal legacy secret");
                return;
            }
        };

        match self
            .store
            .replace_secret(&conn.connection_id, &sealed)
            .await
        {
            Ok(()) => {
                info!(connection_id = %conn.connection_id, "legacy plaintext secret re-sealed")
            }
            Err(err) => {
                warn!(connection_id = %conn.connection_id, error = %err, "failed to store re-sealed secret")
            }
        }
    }

    /// Cache invalidation failure never fails the mutation that triggered
    /// it; the TTL bounds how long a stale summary can survive.
    async fn invalidate_summary(&self, user_id: &str) {
        if let Err(err) = self.summaries.invalidate(user_id).await {
            warn!(user_id = %user_id, error = %err, "summary invalidation failed; value will age out via TTL");
        }
    }
}

fn flight_key(user_id: &str, provider: ProviderId, discriminant: &str) -> String {
    format!("{}:{}:{}", user_id, provider.as_str(), discriminant)
}

// =============================================================================
// Tests
// =============================================================================
