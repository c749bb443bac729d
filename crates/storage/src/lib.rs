//! Storage client glue for relay services.
//!
//! Thin wrappers over the MySQL pool and the Redis connection manager:
//! configuration, connection establishment, and a connectivity check.
//! Query logic lives with the services that own the data.

pub mod error;
pub mod mysql;
pub mod redis;

pub use error::{Result, StorageError};
pub use mysql::{MysqlClient, MysqlConfig};
pub use redis::{RedisClient, RedisConfig};
