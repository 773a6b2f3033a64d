//! Summary cache and snapshot service
//!
//! Computes the aggregate financial view (net worth, totals, monthly
//! income/expense) from canonical accounts, transactions, and manual
//! entries. The computed value is cached per user with a freshness TTL and
//! a monotonic version; stale values are recomputed synchronously, never
//! served silently. Daily snapshots of the same aggregates feed the
//! historical trend charts.
//!
//! Storage goes through the [`SummaryStore`] seam, the same arrangement as
//! the transport seams on the provider adapters: production runs against
//! MongoDB, tests drive the service over an in-memory store.

use async_trait::async_trait;
use bson::doc;
use chrono::{Datelike, Months, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::schemas::{
    AccountDoc, ManualEntryDoc, ManualEntryKind, SnapshotDoc, SummaryAggregates, SummaryDoc,
    TransactionDoc, ACCOUNT_COLLECTION, MANUAL_ENTRY_COLLECTION, SNAPSHOT_COLLECTION,
    SUMMARY_COLLECTION, TRANSACTION_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Result, TellerError};

const ISO_DATE: &str = "%Y-%m-%d";

/// First and last day of the calendar month containing `today`.
///
/// The recompute window spans the whole month, not just the days already
/// past: post-dated entries later in the month (installments, scheduled
/// salary) are routine and belong in the monthly figures.
fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.with_day0(0).unwrap_or(today);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next_month| next_month.pred_opt())
        .unwrap_or(today);
    (start, end)
}

/// Aggregate computation over already-loaded records. Pure so the
/// sign-handling rules are testable without a store.
///
/// Rules: non-liability balances count toward assets (signed, so an
/// overdrawn account reduces them); credit and loan balances count toward
/// liabilities as positive amounts owed; manual entries add to their side;
/// monthly figures sum the current calendar month's non-pending amounts,
/// with expenses reported as a positive magnitude.
pub(crate) fn compute_aggregates(
    accounts: &[AccountDoc],
    transactions: &[TransactionDoc],
    manual_entries: &[ManualEntryDoc],
    today: NaiveDate,
) -> SummaryAggregates {
    let mut total_assets_minor: i64 = 0;
    let mut total_liabilities_minor: i64 = 0;

    for doc in accounts {
        let balance = doc.account.balance.current_minor;
        if doc.account.account_class.is_liability() {
            total_liabilities_minor += balance;
        } else {
            total_assets_minor += balance;
        }
    }

    for entry in manual_entries {
        match entry.kind {
            ManualEntryKind::Asset => total_assets_minor += entry.value_minor,
            ManualEntryKind::Liability => total_liabilities_minor += entry.value_minor,
        }
    }

    let mut monthly_income_minor: i64 = 0;
    let mut monthly_expense_minor: i64 = 0;
    let (year, month) = (today.year(), today.month());

    for doc in transactions {
        let txn = &doc.transaction;
        if txn.pending || !txn.posted_in_month(year, month) {
            continue;
        }
        if txn.amount_minor > 0 {
            monthly_income_minor += txn.amount_minor;
        } else {
            monthly_expense_minor += -txn.amount_minor;
        }
    }

    SummaryAggregates {
        net_worth_minor: total_assets_minor - total_liabilities_minor,
        total_assets_minor,
        total_liabilities_minor,
        monthly_income_minor,
        monthly_expense_minor,
        account_count: accounts.len() as i64,
    }
}

// =============================================================================
// Storage seam
// =============================================================================

/// The records one recompute reads.
#[derive(Debug, Default)]
pub struct SummaryInputs {
    pub accounts: Vec<AccountDoc>,
    pub transactions: Vec<TransactionDoc>,
    pub manual_entries: Vec<ManualEntryDoc>,
}

/// Storage seam for the summary service (allows faking the store in tests,
/// so the cache and snapshot flows are covered, not just the pure
/// aggregation rules).
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// The cached summary for a user, if one was ever computed.
    async fn load_summary(&self, user_id: &str) -> Result<Option<SummaryDoc>>;

    /// Persist freshly computed aggregates, bumping the version counter,
    /// and return the stored document. Atomic per user: concurrent
    /// recomputes may interleave but never lose a version bump.
    async fn store_summary(
        &self,
        user_id: &str,
        aggregates: &SummaryAggregates,
        computed_at: i64,
    ) -> Result<SummaryDoc>;

    /// Reset the computed timestamp to the epoch so the next read
    /// recomputes.
    async fn reset_summary_age(&self, user_id: &str) -> Result<()>;

    /// Write (or overwrite) the snapshot keyed `(user_id, date)`.
    async fn put_snapshot(
        &self,
        user_id: &str,
        date: NaiveDate,
        aggregates: &SummaryAggregates,
    ) -> Result<SnapshotDoc>;

    /// Snapshots with dates in `[start, end]`, ascending.
    async fn snapshots_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SnapshotDoc>>;

    /// Everything one recompute aggregates over. Transactions are bounded
    /// to the `[month_start, month_end]` posted-date window.
    async fn summary_inputs(
        &self,
        user_id: &str,
        month_start: NaiveDate,
        month_end: NaiveDate,
    ) -> Result<SummaryInputs>;
}

/// Production store over the canonical MongoDB collections.
pub struct MongoSummaryStore {
    accounts: MongoCollection<AccountDoc>,
    transactions: MongoCollection<TransactionDoc>,
    manual_entries: MongoCollection<ManualEntryDoc>,
    summaries: MongoCollection<SummaryDoc>,
    snapshots: MongoCollection<SnapshotDoc>,
}

impl MongoSummaryStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            accounts: mongo.collection(ACCOUNT_COLLECTION).await?,
            transactions: mongo.collection(TRANSACTION_COLLECTION).await?,
            manual_entries: mongo.collection(MANUAL_ENTRY_COLLECTION).await?,
            summaries: mongo.collection(SUMMARY_COLLECTION).await?,
            snapshots: mongo.collection(SNAPSHOT_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl SummaryStore for MongoSummaryStore {
    async fn load_summary(&self, user_id: &str) -> Result<Option<SummaryDoc>> {
        self.summaries.find_one(doc! { "user_id": user_id }).await
    }

    async fn store_summary(
        &self,
        user_id: &str,
        aggregates: &SummaryAggregates,
        computed_at: i64,
    ) -> Result<SummaryDoc> {
        let update = doc! {
            "$set": {
                "aggregates": bson::to_bson(aggregates)?,
                "computed_at": computed_at,
            },
            "$inc": { "version": 1_i64 },
        };

        self.summaries
            .find_one_and_upsert(doc! { "user_id": user_id }, update)
            .await?
            .ok_or_else(|| TellerError::Database("summary upsert returned nothing".to_string()))
    }

    async fn reset_summary_age(&self, user_id: &str) -> Result<()> {
        self.summaries
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$set": { "computed_at": 0_i64 } },
            )
            .await?;
        Ok(())
    }

    async fn put_snapshot(
        &self,
        user_id: &str,
        date: NaiveDate,
        aggregates: &SummaryAggregates,
    ) -> Result<SnapshotDoc> {
        let filter = doc! {
            "user_id": user_id,
            "date": date.format(ISO_DATE).to_string(),
        };
        let update = doc! { "$set": { "aggregates": bson::to_bson(aggregates)? } };
        self.snapshots.upsert_one(filter.clone(), update).await?;

        self.snapshots
            .find_one(filter)
            .await?
            .ok_or_else(|| TellerError::Database("snapshot missing after upsert".to_string()))
    }

    async fn snapshots_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SnapshotDoc>> {
        let filter = doc! {
            "user_id": user_id,
            "date": {
                "$gte": start.format(ISO_DATE).to_string(),
                "$lte": end.format(ISO_DATE).to_string(),
            },
        };

        self.snapshots.find_many_sorted(filter, doc! { "date": 1 }).await
    }

    async fn summary_inputs(
        &self,
        user_id: &str,
        month_start: NaiveDate,
        month_end: NaiveDate,
    ) -> Result<SummaryInputs> {
        let accounts = self.accounts.find_many(doc! { "user_id": user_id }).await?;
        // Only the current month feeds the monthly figures; the ISO string
        // form makes the range index-friendly
        let transactions = self
            .transactions
            .find_many(doc! {
                "user_id": user_id,
                "transaction.posted_date": {
                    "$gte": month_start.format(ISO_DATE).to_string(),
                    "$lte": month_end.format(ISO_DATE).to_string(),
                },
            })
            .await?;
        let manual_entries = self
            .manual_entries
            .find_many(doc! { "user_id": user_id })
            .await?;

        Ok(SummaryInputs {
            accounts,
            transactions,
            manual_entries,
        })
    }
}

// =============================================================================
// Service
// =============================================================================

/// Summary cache and daily snapshot service.
pub struct SummaryService {
    store: Arc<dyn SummaryStore>,
    ttl: Duration,
}

impl SummaryService {
    pub async fn new(mongo: &MongoClient, ttl: Duration) -> Result<Arc<Self>> {
        let store = MongoSummaryStore::new(mongo).await?;
        Ok(Self::with_store(Arc::new(store), ttl))
    }

    /// Build the service over any store implementation. Production wiring
    /// goes through [`SummaryService::new`]; tests inject their own store.
    pub fn with_store(store: Arc<dyn SummaryStore>, ttl: Duration) -> Arc<Self> {
        Arc::new(Self { store, ttl })
    }

    /// Serve the cached summary if fresh, otherwise recompute synchronously.
    /// A recompute failure degrades to the last known value when one exists
    /// rather than failing the read.
    pub async fn get_summary(&self, user_id: &str) -> Result<SummaryDoc> {
        let existing = self.store.load_summary(user_id).await?;

        if let Some(ref cached) = existing {
            if cached.is_fresh(Utc::now().timestamp_millis(), self.ttl) {
                debug!(user_id = %user_id, version = cached.version, "serving cached summary");
                return Ok(cached.clone());
            }
        }

        match self.recompute(user_id).await {
            Ok(fresh) => Ok(fresh),
            Err(err) => match existing {
                Some(stale) => {
                    warn!(
                        user_id = %user_id,
                        error = %err,
                        "summary recompute failed; serving last known value"
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Force the next `get_summary` to recompute by resetting the computed
    /// timestamp to the epoch. Called after every connect/disconnect/sync.
    pub async fn invalidate(&self, user_id: &str) -> Result<()> {
        self.store.reset_summary_age(user_id).await?;
        debug!(user_id = %user_id, "summary invalidated");
        Ok(())
    }

    /// Write (or overwrite) today's snapshot from the current summary.
    pub async fn save_daily_snapshot(&self, user_id: &str) -> Result<SnapshotDoc> {
        let summary = self.get_summary(user_id).await?;
        let today = Utc::now().date_naive();

        let snapshot = self
            .store
            .put_snapshot(user_id, today, &summary.aggregates)
            .await?;

        info!(user_id = %user_id, date = %today, "daily snapshot saved");
        Ok(snapshot)
    }

    /// Snapshots in `[start, end]` ascending by date. Missing days are
    /// simply absent; a sparse series is not an error.
    pub async fn get_snapshots(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SnapshotDoc>> {
        self.store.snapshots_between(user_id, start, end).await
    }

    async fn recompute(&self, user_id: &str) -> Result<SummaryDoc> {
        let today = Utc::now().date_naive();
        let (month_start, month_end) = month_bounds(today);

        let inputs = self
            .store
            .summary_inputs(user_id, month_start, month_end)
            .await?;

        let aggregates = compute_aggregates(
            &inputs.accounts,
            &inputs.transactions,
            &inputs.manual_entries,
            today,
        );

        let fresh = self
            .store
            .store_summary(user_id, &aggregates, Utc::now().timestamp_millis())
            .await?;

        info!(
            user_id = %user_id,
            version = fresh.version,
            net_worth_minor = fresh.aggregates.net_worth_minor,
            "summary recomputed"
        );

        Ok(fresh)
    }
}

// =============================================================================
// Tests
// =============================================================================
