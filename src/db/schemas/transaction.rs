//! Transaction document schema
//!
//! Stores one canonical transaction with its ownership back-references.
//! `posted_date` serializes as an ISO `YYYY-MM-DD` string, which keeps
//! lexicographic index order equal to calendar order for range queries.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::CanonicalTransaction;

/// Collection name for transactions
pub const TRANSACTION_COLLECTION: &str = "transactions";

/// Transaction document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TransactionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: String,

    /// Owning connection; transactions are deleted with it
    pub connection_id: String,

    /// The canonical transaction as produced by the adapter
    pub transaction: CanonicalTransaction,
}

impl TransactionDoc {
    /// Wrap a canonical transaction with its ownership keys
    pub fn new(
        user_id: String,
        connection_id: String,
        transaction: CanonicalTransaction,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            connection_id,
            transaction,
        }
    }
}

impl IntoIndexes for TransactionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One row per transaction per connection; re-syncs upsert on this
            // key instead of duplicating history
            (
                doc! { "connection_id": 1, "transaction.id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("connection_transaction_unique".to_string())
                        .build(),
                ),
            ),
            // Month-window scans for summary computation
            (
                doc! { "user_id": 1, "transaction.posted_date": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_posted_date_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TransactionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
