//! Daily snapshot document schema
//!
//! One immutable aggregate record per user per calendar day, used for
//! historical trend charts. Writing the same day twice overwrites: the key
//! is `(user_id, date)` and the later values win.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, SummaryAggregates};

/// Collection name for daily snapshots
pub const SNAPSHOT_COLLECTION: &str = "snapshots";

/// Daily snapshot document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SnapshotDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: String,

    /// Calendar day, ISO `YYYY-MM-DD`. String form keeps index order equal
    /// to date order for range queries.
    pub date: String,

    /// The aggregates as of this day
    #[serde(default)]
    pub aggregates: SummaryAggregates,
}

impl IntoIndexes for SnapshotDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One snapshot per user per day; also serves the range query
            (
                doc! { "user_id": 1, "date": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_date_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SnapshotDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
