//! Connection document schema
//!
//! One persisted link between a user and one external institution. The
//! canonical accounts and transactions a connection produced reference it by
//! `connection_id` and are deleted with it.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::ProviderId;

/// Collection name for connections
pub const CONNECTION_COLLECTION: &str = "connections";

/// Connection status
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connection is healthy and syncable
    #[default]
    Active,
    /// Last sync hit a terminal credential failure; the user must re-link
    Error,
    /// User-initiated removal in progress; the record is deleted right after
    Revoked,
}

/// Connection document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConnectionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable connection ID (UUID), the ownership key for accounts and
    /// transactions
    pub connection_id: String,

    /// Owning user (opaque verified id from the session layer)
    pub user_id: String,

    /// Which upstream produced this connection
    #[serde(default)]
    pub provider: ProviderId,

    /// Upstream-side identifier for the linked item (aggregator item id, or
    /// the scraper company id)
    pub external_item_id: String,

    /// Institution identifier as the provider knows it
    pub institution_id: String,

    /// Human-readable institution name
    pub institution_name: String,

    /// Vault envelope holding the access token or bank credentials. Records
    /// created before the vault existed hold bare plaintext here; the read
    /// path handles both. Never serialized into API responses.
    pub encrypted_secret: String,

    /// Current status
    #[serde(default)]
    pub status: ConnectionStatus,

    /// Last successful data fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime>,
}

impl ConnectionDoc {
    /// Create a new connection document with a fresh connection ID
    pub fn new(
        user_id: String,
        provider: ProviderId,
        external_item_id: String,
        institution_id: String,
        institution_name: String,
        encrypted_secret: String,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            connection_id: Uuid::new_v4().to_string(),
            user_id,
            provider,
            external_item_id,
            institution_id,
            institution_name,
            encrypted_secret,
            status: ConnectionStatus::Active,
            last_synced_at: None,
        }
    }
}

impl IntoIndexes for ConnectionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on connection_id
            (
                doc! { "connection_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("connection_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index on user_id for listing a user's connections
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

impl MutMetadata for ConnectionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
