//! Manual entry document schema
//!
//! User-entered assets and liabilities (house, car, private loans). The CRUD
//! surface for these lives outside this service; summary computation only
//! reads them so manual holdings count toward net worth.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for manual entries
pub const MANUAL_ENTRY_COLLECTION: &str = "manual_entries";

/// Which side of the balance sheet a manual entry lands on
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManualEntryKind {
    /// Adds to total assets
    #[default]
    Asset,
    /// Adds to total liabilities
    Liability,
}

/// Manual entry document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ManualEntryDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: String,

    /// User-chosen label
    pub name: String,

    /// Asset or liability
    #[serde(default)]
    pub kind: ManualEntryKind,

    /// Value in integer minor units, always non-negative; `kind` carries
    /// the sign semantics
    pub value_minor: i64,

    /// ISO currency code
    pub currency_code: String,
}

impl IntoIndexes for ManualEntryDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Index on user_id for summary computation
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ManualEntryDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
