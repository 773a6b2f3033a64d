//! MongoDB storage layer
//!
//! Typed collection wrapper plus the document schemas it stores.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
