//! MongoDB client and collection wrapper
//!
//! Thin typed layer over the driver: connection setup with bounded server
//! selection, schema-declared indexes applied at collection construction,
//! and metadata timestamps stamped on every write.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{
    options::{IndexOptions, ReturnDocument},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::TellerError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, TellerError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| TellerError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TellerError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, TellerError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Round-trip a ping to the server. Used by the readiness probe.
    pub async fn ping(&self) -> Result<(), TellerError> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TellerError::Database(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
///
/// Deletes here are hard deletes: removed connections must leave no owned
/// records behind, so there is no tombstone path.
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, TellerError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        // Apply indexes
        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), TellerError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| {
                IndexModel::builder()
                    .keys(keys)
                    .options(opts)
                    .build()
            })
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| TellerError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, TellerError> {
        let metadata = item.mut_metadata();
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        let result = self
            .inner
            .insert_one(item)
            .await
            .map_err(|e| TellerError::Database(format!("Insert failed: {}", e)))?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| TellerError::Database("Failed to get inserted ID".into()))
    }

    /// Insert a batch of documents, setting metadata timestamps on each.
    /// Returns the number inserted; an empty batch is a no-op.
    pub async fn insert_many(&self, items: Vec<T>) -> Result<usize, TellerError> {
        if items.is_empty() {
            return Ok(0);
        }

        let stamped: Vec<T> = items
            .into_iter()
            .map(|mut item| {
                let metadata = item.mut_metadata();
                metadata.created_at = Some(DateTime::now());
                metadata.updated_at = Some(DateTime::now());
                item
            })
            .collect();

        let result = self
            .inner
            .insert_many(stamped)
            .await
            .map_err(|e| TellerError::Database(format!("Bulk insert failed: {}", e)))?;

        Ok(result.inserted_ids.len())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, TellerError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| TellerError::Database(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, TellerError> {
        self.find_with(filter, None).await
    }

    /// Find many documents by filter with a sort order
    pub async fn find_many_sorted(
        &self,
        filter: Document,
        sort: Document,
    ) -> Result<Vec<T>, TellerError> {
        self.find_with(filter, Some(sort)).await
    }

    async fn find_with(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<T>, TellerError> {
        use futures_util::StreamExt;

        let mut find = self.inner.find(filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }

        let cursor = find
            .await
            .map_err(|e| TellerError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one document. The update must use update operators; the
    /// metadata update timestamp is folded into its `$set` clause.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, TellerError> {
        let update = with_updated_at(update);

        self.inner
            .update_one(filter, update)
            .await
            .map_err(|e| TellerError::Database(format!("Update failed: {}", e)))
    }

    /// Update one document, inserting it if absent (operator update only)
    pub async fn upsert_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, TellerError> {
        let update = with_created_on_insert(with_updated_at(update));

        self.inner
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(|e| TellerError::Database(format!("Upsert failed: {}", e)))
    }

    /// Atomically update-or-insert and return the post-update document.
    /// This is the primitive behind counter increments (`$inc`) that must
    /// not race with concurrent writers.
    pub async fn find_one_and_upsert(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<Option<T>, TellerError> {
        let update = with_created_on_insert(with_updated_at(update));

        self.inner
            .find_one_and_update(filter, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| TellerError::Database(format!("Atomic upsert failed: {}", e)))
    }

    /// Delete one document, returning the deleted count
    pub async fn delete_one(&self, filter: Document) -> Result<u64, TellerError> {
        let result = self
            .inner
            .delete_one(filter)
            .await
            .map_err(|e| TellerError::Database(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count)
    }

    /// Delete every document matching the filter, returning the count
    pub async fn delete_many(&self, filter: Document) -> Result<u64, TellerError> {
        let result = self
            .inner
            .delete_many(filter)
            .await
            .map_err(|e| TellerError::Database(format!("Bulk delete failed: {}", e)))?;

        Ok(result.deleted_count)
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

/// Fold `metadata.updated_at` into the update's `$set` clause
fn with_updated_at(mut update: Document) -> Document {
    if let Ok(set) = update.get_document_mut("$set") {
        set.insert("metadata.updated_at", DateTime::now());
    } else {
        update.insert("$set", doc! { "metadata.updated_at": DateTime::now() });
    }
    update
}

/// Fold `metadata.created_at` into the update's `$setOnInsert` clause
fn with_created_on_insert(mut update: Document) -> Document {
    if let Ok(set_on_insert) = update.get_document_mut("$setOnInsert") {
        set_on_insert.insert("metadata.created_at", DateTime::now());
    } else {
        update.insert("$setOnInsert", doc! { "metadata.created_at": DateTime::now() });
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests would require a running MongoDB instance
    // See docker-compose.dev.yml for local testing

    #[test]
    fn test_update_timestamp_folds_into_existing_set() {
        let update = with_updated_at(doc! { "$set": { "status": "error" }, "$inc": { "version": 1 } });

        let set = update.get_document("$set").unwrap();
        assert!(set.contains_key("status"));
        assert!(set.contains_key("metadata.updated_at"));
        assert!(update.get_document("$inc").is_ok());
    }

    #[test]
    fn test_update_timestamp_creates_set_when_absent() {
        let update = with_updated_at(doc! { "$inc": { "version": 1 } });

        let set = update.get_document("$set").unwrap();
        assert!(set.contains_key("metadata.updated_at"));
    }

    #[test]
    fn test_created_at_lands_in_set_on_insert() {
        let update = with_created_on_insert(doc! { "$set": { "a": 1 } });

        let set_on_insert = update.get_document("$setOnInsert").unwrap();
        assert!(set_on_insert.contains_key("metadata.created_at"));
    }
}
