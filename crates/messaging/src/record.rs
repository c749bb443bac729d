//! The immutable unit of consumption handed to record handlers.

use chrono::{DateTime, Utc};
use rdkafka::message::BorrowedMessage;
use rdkafka::Message;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Maximum number of characters of payload included in consume logs.
const PAYLOAD_PREVIEW_LIMIT: usize = 1024;

/// A single consumed record.
///
/// Records are never mutated; the owning session acknowledges (stores the
/// offset of) a record only after its retry cycle has concluded.
#[derive(Debug, Clone)]
pub struct Record {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key, if one was set by the producer.
    pub key: Option<Vec<u8>>,
    /// Raw message payload.
    pub payload: Vec<u8>,
    /// Broker or producer timestamp, when available.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    pub(crate) fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let timestamp = msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis);

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
            timestamp,
        }
    }

    /// Deserialize the payload from its JSON encoding.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Payload rendered for logging, truncated when oversized.
    pub fn payload_preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        if text.chars().count() <= PAYLOAD_PREVIEW_LIMIT {
            text.into_owned()
        } else {
            let truncated: String = text.chars().take(PAYLOAD_PREVIEW_LIMIT).collect();
            format!("{}... ({} bytes total)", truncated, self.payload.len())
        }
    }
}
