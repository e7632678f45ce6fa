//! Foreman Core: shared error type and master configuration.

pub mod config;
pub mod error;

pub use config::MasterConfig;
pub use error::{Error, Result};
