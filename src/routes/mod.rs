//! HTTP routes for Teller

pub mod banking;
pub mod health;

pub use banking::{
    create_connection, create_link_token, delete_connection, history, list_connections, overview,
    record_snapshot, sync_connection,
};
pub use health::{health_check, readiness_check, version_info};
