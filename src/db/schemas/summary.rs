//! Cached summary document schema
//!
//! One per user: the computed aggregate view served by the overview
//! endpoint. Derived data — always reconstructable from accounts,
//! transactions, and manual entries.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for cached summaries
pub const SUMMARY_COLLECTION: &str = "summaries";

/// The aggregate financial metrics, shared by the cached summary and the
/// daily snapshots. All amounts are integer minor units.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryAggregates {
    /// Assets minus liabilities
    pub net_worth_minor: i64,

    /// Sum of asset account balances plus manual assets
    pub total_assets_minor: i64,

    /// Sum of liability balances (positive = owed) plus manual liabilities
    pub total_liabilities_minor: i64,

    /// Current-calendar-month inflows (non-pending)
    pub monthly_income_minor: i64,

    /// Current-calendar-month outflows, as a positive magnitude
    pub monthly_expense_minor: i64,

    /// Number of canonical accounts that fed the aggregates
    pub account_count: i64,
}

/// Cached summary document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SummaryDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user (one summary per user)
    pub user_id: String,

    /// The computed aggregates
    #[serde(default)]
    pub aggregates: SummaryAggregates,

    /// When the aggregates were computed, epoch milliseconds. Invalidation
    /// resets this to 0 so the next read recomputes.
    #[serde(default)]
    pub computed_at: i64,

    /// Monotonic recompute counter, bumped with `$inc`
    #[serde(default)]
    pub version: i64,
}

impl SummaryDoc {
    /// Whether the cached value may still be served without recomputing
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms - self.computed_at <= ttl.as_millis() as i64
    }
}

impl IntoIndexes for SummaryDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One summary per user
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_id_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SummaryDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
