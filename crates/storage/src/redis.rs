//! Redis client with an auto-reconnecting connection manager.
//!
//! Connectivity is verified with a PING at construction; afterwards the
//! connection manager transparently re-establishes dropped connections.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StorageError};

const DEFAULT_PORT: u16 = 6379;

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Redis client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server address as `host` or `host:port`.
    pub address: String,
    /// Password, when the server requires AUTH.
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub db: i64,
    /// Time limit for the initial connectivity check, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl RedisConfig {
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self {
            address: address.into(),
            password: None,
            db: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    pub fn with_password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Split `host:port` into its parts, defaulting the port.
fn parse_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(StorageError::InvalidAddress(address.to_string()));
    }

    match address.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(StorageError::InvalidAddress(address.to_string()));
            }
            let port = port
                .parse()
                .map_err(|_| StorageError::InvalidAddress(address.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

/// A Redis client backed by an auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Connect and verify reachability with a PING.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let (host, port) = parse_address(&config.address)?;

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: config.db,
                username: None,
                password: config.password.clone(),
            },
        };

        let client = Client::open(info)?;
        let mut manager = ConnectionManager::new(client).await?;

        let timeout = config.connect_timeout();
        let pong: String = tokio::time::timeout(
            timeout,
            redis::cmd("PING").query_async(&mut manager),
        )
        .await
        .map_err(|_| StorageError::PingTimeout(timeout))??;
        debug_assert_eq!(pong, "PONG");

        info!(address = %config.address, db = config.db, "redis connected");
        Ok(Self { manager })
    }

    /// A handle to the shared connection manager.
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }
}
