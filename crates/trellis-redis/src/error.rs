//! # Store Error Types
//!
//! Unified error handling for store backend operations.

use thiserror::Error;

/// Store operation result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Error types for store backend operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Transaction encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Store connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}
