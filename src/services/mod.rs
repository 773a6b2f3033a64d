//! Services layer for Teller
//!
//! Business logic that coordinates the provider adapters, the credential
//! vault, and the MongoDB collections.
//!
//! ## Services
//!
//! - **Connections**: link/sync/remove institution flows across both
//!   provider adapters, with in-flight serialization per institution
//! - **Summary**: TTL-cached aggregate computation, invalidation, and
//!   daily snapshot persistence

pub mod connections;
pub mod summary;

pub use connections::{
    ConnectOutcome, ConnectRequest, ConnectionService, ConnectionStore, ConnectionView,
    DisconnectOutcome, LinkTokenMode, LinkTokenOutcome, LinkTokenRequest, MongoConnectionStore,
    SyncOutcome,
};
pub use summary::{MongoSummaryStore, SummaryInputs, SummaryService, SummaryStore};
