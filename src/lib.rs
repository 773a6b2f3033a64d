//! Teller - bank integration gateway
//!
//! Teller sits between an upstream API gateway and two financial-data
//! providers: a stable partner aggregation API and a regional
//! browser-automation scraper. Both feed one canonical account/transaction
//! model backed by MongoDB, with provider quirks (sign conventions, flaky
//! upstreams, credential storage) absorbed at the adapter boundary.
//!
//! ## Services
//!
//! - **Providers**: aggregator link-token flow; scraper retry/backoff engine
//! - **Vault**: ChaCha20-Poly1305 sealing for stored bank credentials
//! - **Connections**: connect/sync/disconnect lifecycle with strict write ordering
//! - **Summary**: TTL-cached financial aggregates and daily net-worth snapshots

pub mod config;
pub mod db;
pub mod model;
pub mod providers;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;
pub mod vault;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, TellerError};
