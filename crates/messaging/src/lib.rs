//! Resilient Kafka client wrappers.
//!
//! This crate wraps the raw Kafka client with the retry semantics a
//! long-running service needs:
//!
//! - **Consumer**: a consumer-group session loop that survives broker
//!   disconnects and rebalances, delivering each record to a
//!   [`RecordHandler`] with per-record exponential backoff, permanent
//!   failure classification, and panic containment.
//! - **Producer**: an async sender with success and error callback
//!   fan-out, and a sync sender that awaits each delivery.
//! - **Metrics**: Prometheus collectors registered into a caller-supplied
//!   registry.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use prometheus_client::registry::Registry;
//! use relay_messaging::{
//!     ConsumerConfig, GroupConsumer, HandlerError, Record, RecordHandler,
//! };
//!
//! struct OrderHandler;
//!
//! #[async_trait::async_trait]
//! impl RecordHandler for OrderHandler {
//!     async fn handle(&self, record: &Record) -> Result<(), HandlerError> {
//!         let order: serde_json::Value = record.decode().map_err(HandlerError::permanent)?;
//!         println!("order: {order}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConsumerConfig {
//!     brokers: "localhost:9092".to_string(),
//!     group_id: "orders".to_string(),
//!     topic: "orders".to_string(),
//!     ..Default::default()
//! };
//!
//! let mut registry = Registry::default();
//! let consumer = GroupConsumer::new(config, Arc::new(OrderHandler), &mut registry)?;
//! consumer.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod record;
pub mod retry;
pub mod telemetry;

pub use backoff::ExponentialBackoff;
pub use config::{ConsumerConfig, ProducerConfig};
pub use consumer::GroupConsumer;
pub use error::{HandlerError, MessagingError, Result};
pub use metrics::{ConsumerMetrics, ProducerMetrics};
pub use producer::{AsyncSender, ErrorCallback, SuccessCallback, SyncSender};
pub use record::Record;
pub use retry::{CycleOutcome, RecordHandler};
