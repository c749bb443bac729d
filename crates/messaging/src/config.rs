//! Configuration for the consumer and producer clients.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

fn default_client_id() -> String {
    "relay".to_string()
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_initial_backoff() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_message_timeout() -> u64 {
    DEFAULT_MESSAGE_TIMEOUT_MS
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

fn default_compression() -> String {
    "none".to_string()
}

/// Configuration for a [`GroupConsumer`](crate::consumer::GroupConsumer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list).
    pub brokers: String,
    /// Consumer group ID.
    pub group_id: String,
    /// Topic to subscribe to.
    pub topic: String,
    /// Client ID reported to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Group session timeout in milliseconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
    /// Where to start when the group has no committed offset.
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Initial backoff interval for both retry loops, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Backoff interval cap for both retry loops, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Additional rdkafka settings passed through verbatim.
    #[serde(default)]
    pub extra_config: HashMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "relay-consumer".to_string(),
            topic: String::new(),
            client_id: default_client_id(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            auto_offset_reset: default_auto_offset_reset(),
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            extra_config: HashMap::new(),
        }
    }
}

impl ConsumerConfig {
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("client.id", &self.client_id)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("auto.offset.reset", &self.auto_offset_reset)
            // Offsets are committed by the auto-commit timer, but only
            // after the session loop has explicitly stored them: a record
            // is acknowledged when its retry cycle concludes, not when it
            // is fetched.
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        for (key, value) in &self.extra_config {
            config.set(key, value);
        }

        config
    }

    pub(crate) fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub(crate) fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Configuration for [`AsyncSender`](crate::producer::AsyncSender) and
/// [`SyncSender`](crate::producer::SyncSender).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Kafka brokers (comma-separated list).
    pub brokers: String,
    /// Topic messages are produced to.
    pub topic: String,
    /// Client ID reported to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Upper bound on end-to-end delivery time, in milliseconds.
    #[serde(default = "default_message_timeout")]
    pub message_timeout_ms: u64,
    /// Acknowledgment level (0, 1, all).
    #[serde(default = "default_acks")]
    pub acks: String,
    /// Enable the idempotent producer.
    #[serde(default = "default_true")]
    pub enable_idempotence: bool,
    /// Compression type (none, gzip, snappy, lz4, zstd).
    #[serde(default = "default_compression")]
    pub compression_type: String,
    /// Additional rdkafka settings passed through verbatim.
    #[serde(default)]
    pub extra_config: HashMap<String, String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: String::new(),
            client_id: default_client_id(),
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            acks: default_acks(),
            enable_idempotence: true,
            compression_type: default_compression(),
            extra_config: HashMap::new(),
        }
    }
}

impl ProducerConfig {
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .set("acks", &self.acks)
            .set(
                "enable.idempotence",
                if self.enable_idempotence { "true" } else { "false" },
            )
            .set("compression.type", &self.compression_type);

        for (key, value) in &self.extra_config {
            config.set(key, value);
        }

        config
    }

    pub(crate) fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}
