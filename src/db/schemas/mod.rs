//! Database schemas for Teller
//!
//! Defines MongoDB document structures for connections, canonical account
//! and transaction records, cached summaries, and daily snapshots.

mod account;
mod category_override;
mod connection;
mod manual_entry;
mod metadata;
mod snapshot;
mod summary;
mod transaction;

pub use account::{AccountDoc, ACCOUNT_COLLECTION};
pub use category_override::{CategoryOverrideDoc, CATEGORY_OVERRIDE_COLLECTION};
pub use connection::{ConnectionDoc, ConnectionStatus, CONNECTION_COLLECTION};
pub use manual_entry::{ManualEntryDoc, ManualEntryKind, MANUAL_ENTRY_COLLECTION};
pub use metadata::Metadata;
pub use snapshot::{SnapshotDoc, SNAPSHOT_COLLECTION};
pub use summary::{SummaryAggregates, SummaryDoc, SUMMARY_COLLECTION};
pub use transaction::{TransactionDoc, TRANSACTION_COLLECTION};
