//! Category override document schema
//!
//! User-assigned spending categories that replace a provider's
//! `category_hint` for one transaction. Produced elsewhere; this service
//! only deletes them alongside their connection so no derived
//! categorization outlives the data it described.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for category overrides
pub const CATEGORY_OVERRIDE_COLLECTION: &str = "category_overrides";

/// Category override document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CategoryOverrideDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: String,

    /// Connection that produced the categorized transaction
    pub connection_id: String,

    /// Canonical transaction id the override applies to
    pub transaction_id: String,

    /// User-assigned category
    pub category: String,
}

impl IntoIndexes for CategoryOverrideDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One override per transaction per connection
            (
                doc! { "connection_id": 1, "transaction_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("connection_transaction_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CategoryOverrideDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
