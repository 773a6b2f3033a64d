//! Account document schema
//!
//! Stores one canonical account together with its ownership back-references.
//! The embedded account is already normalized and id-sanitized by the time
//! it reaches this collection.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::CanonicalAccount;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Account document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user
    pub user_id: String,

    /// Owning connection; accounts are deleted with it
    pub connection_id: String,

    /// The canonical account as produced by the adapter
    pub account: CanonicalAccount,
}

impl AccountDoc {
    /// Wrap a canonical account with its ownership keys
    pub fn new(user_id: String, connection_id: String, account: CanonicalAccount) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            connection_id,
            account,
        }
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One row per account per connection
            (
                doc! { "connection_id": 1, "account.id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("connection_account_unique".to_string())
                        .build(),
                ),
            ),
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

impl MutMetadata for AccountDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
