//! Error types for the messaging clients.
//!
//! Two families live here: [`MessagingError`] for transport-level failures
//! (connection, serialization, delivery), and [`HandlerError`] for the
//! outcome a record handler reports back to the retry loop. A handler
//! decides retryability by choosing the variant: `Permanent` stops the
//! retry cycle, anything `Transient` is retried with backoff.

use thiserror::Error;

/// Result type alias for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transport-level error for consumers and producers.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Error reported by the underlying Kafka client.
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Payload could not be serialized before transmission.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The producer refused to enqueue a message (e.g. local queue full).
    #[error("failed to enqueue message for topic {topic}: {source}")]
    Enqueue {
        topic: String,
        source: rdkafka::error::KafkaError,
    },

    /// The broker rejected a message after it was enqueued.
    #[error("message delivery failed: {0}")]
    Delivery(#[source] rdkafka::error::KafkaError),

    /// The producer shut down before acknowledging a message.
    #[error("delivery acknowledgement dropped by the producer")]
    AckCanceled,

    /// Operation attempted on a closed client.
    #[error("client is closed")]
    Closed,

    /// `start` called more than once on the same consumer.
    #[error("client is already started")]
    AlreadyStarted,
}

/// Outcome a record handler reports to the message retry loop.
///
/// Classification is by variant, never by comparing an error value against
/// a freshly constructed sentinel.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Terminal failure: the record is acknowledged and never retried.
    #[error("permanent handler failure: {source}")]
    Permanent { source: BoxError },

    /// Retryable failure: the retry loop waits one backoff interval and
    /// invokes the handler again.
    #[error("transient handler failure: {source}")]
    Transient { source: BoxError },
}

impl HandlerError {
    /// Wrap a cause as a permanent, non-retryable failure.
    pub fn permanent(source: impl Into<BoxError>) -> Self {
        Self::Permanent {
            source: source.into(),
        }
    }

    /// Wrap a cause as a transient, retryable failure.
    pub fn transient(source: impl Into<BoxError>) -> Self {
        Self::Transient {
            source: source.into(),
        }
    }

    /// True when the handler asked the retry loop to stop.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}
