//! Error types for autoblockip.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutoBlockError {
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Invalid CIDR network: {0}")]
    InvalidNetwork(String),

    #[error("Database unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Batch operation failed: {0}")]
    BatchOperationFailed(String),

    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T, E = AutoBlockError> = std::result::Result<T, E>;
