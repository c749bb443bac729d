//! Error types for the storage clients.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Error reported by the MySQL driver or pool.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Error reported by the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The connectivity check did not answer in time.
    #[error("redis did not answer PING within {0:?}")]
    PingTimeout(Duration),

    /// The configured address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
