//! Shared types for Teller

mod error;

pub use error::{Result, TellerError};
