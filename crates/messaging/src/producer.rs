//! Producer facades.
//!
//! [`AsyncSender`] enqueues without waiting for broker acknowledgement and
//! fans delivery outcomes out to optional success and error callbacks
//! through dedicated listener tasks. [`SyncSender`] awaits each delivery
//! and returns the assigned partition and offset. Both serialize payloads
//! as JSON and must be created inside a Tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot::Canceled;
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use rdkafka::producer::future_producer::OwnedDeliveryResult;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::ProducerConfig;
use crate::error::{MessagingError, Result};
use crate::metrics::ProducerMetrics;

/// Upper bound on waiting for in-flight deliveries during close.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoked with the payload of each successfully delivered message.
pub type SuccessCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Invoked with the error of each failed delivery.
pub type ErrorCallback = Arc<dyn Fn(MessagingError) + Send + Sync>;

/// Fire-and-forget producer with delivery fan-out.
///
/// `send` returns as soon as the message is on the local queue. Every
/// delivery outcome is observed by a background pump and routed to the
/// success or error listener; outcomes are never silently dropped, even
/// when no callback is installed.
pub struct AsyncSender {
    producer: FutureProducer,
    topic: String,
    metrics: Arc<ProducerMetrics>,
    acks_tx: Mutex<Option<mpsc::UnboundedSender<(Vec<u8>, DeliveryFuture)>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncSender {
    /// Create a sender without callbacks. Delivery outcomes are still
    /// drained and counted.
    pub fn new(config: ProducerConfig, registry: &mut Registry) -> Result<Self> {
        Self::with_callbacks(config, registry, None, None)
    }

    /// Create a sender invoking `on_success` for each acknowledged payload
    /// and `on_error` for each failed delivery.
    pub fn with_callbacks(
        config: ProducerConfig,
        registry: &mut Registry,
        on_success: Option<SuccessCallback>,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self> {
        let producer: FutureProducer = config.client_config().create()?;
        let metrics = Arc::new(ProducerMetrics::new(registry));

        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let (success_tx, success_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(run_ack_pump(acks_rx, success_tx, error_tx, metrics.clone())),
            tokio::spawn(run_success_listener(success_rx, on_success)),
            tokio::spawn(run_error_listener(error_rx, on_error)),
        ];

        Ok(Self {
            producer,
            topic: config.topic,
            metrics,
            acks_tx: Mutex::new(Some(acks_tx)),
            tasks: tokio::sync::Mutex::new(tasks),
        })
    }

    /// Serialize `payload` and enqueue it for delivery.
    ///
    /// Returns once the message is accepted onto the local queue; the
    /// delivery outcome is reported through the callbacks.
    pub async fn send<T: Serialize>(&self, key: &str, payload: &T) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;

        let record = FutureRecord::to(&self.topic).key(key).payload(&bytes);
        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((err, _record)) => {
                return Err(MessagingError::Enqueue {
                    topic: self.topic.clone(),
                    source: err,
                })
            }
        };

        let guard = self.acks_tx.lock();
        let acks_tx = guard.as_ref().ok_or(MessagingError::Closed)?;
        acks_tx
            .send((bytes, delivery))
            .map_err(|_| MessagingError::Closed)?;

        self.metrics.enqueued.inc();
        Ok(())
    }

    /// Flush in-flight deliveries and stop the listener tasks. Safe to
    /// call more than once; sends after close fail with
    /// [`MessagingError::Closed`].
    pub async fn close(&self) -> Result<()> {
        let Some(acks_tx) = self.acks_tx.lock().take() else {
            return Ok(());
        };

        self.producer.flush(Timeout::After(FLUSH_TIMEOUT))?;
        drop(acks_tx);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        debug!(topic = %self.topic, "async sender closed");
        Ok(())
    }

    /// Snapshot of the sender's metric collectors.
    pub fn metrics(&self) -> &ProducerMetrics {
        &self.metrics
    }
}

/// Awaits every delivery future in submission order and routes the
/// outcome to the matching listener channel.
async fn run_ack_pump<F>(
    mut acks: mpsc::UnboundedReceiver<(Vec<u8>, F)>,
    success_tx: mpsc::UnboundedSender<Vec<u8>>,
    error_tx: mpsc::UnboundedSender<MessagingError>,
    metrics: Arc<ProducerMetrics>,
) where
    F: Future<Output = std::result::Result<OwnedDeliveryResult, Canceled>>,
{
    while let Some((payload, delivery)) = acks.recv().await {
        match delivery.await {
            Ok(Ok((partition, offset))) => {
                debug!(partition, offset, "message delivered");
                metrics.acks_ok.inc();
                let _ = success_tx.send(payload);
            }
            Ok(Err((err, _msg))) => {
                metrics.acks_failed.inc();
                let _ = error_tx.send(MessagingError::Delivery(err));
            }
            Err(Canceled) => {
                metrics.acks_failed.inc();
                let _ = error_tx.send(MessagingError::AckCanceled);
            }
        }
    }
    debug!("ack pump stopped: producer closed");
}

async fn run_success_listener(
    mut successes: mpsc::UnboundedReceiver<Vec<u8>>,
    callback: Option<SuccessCallback>,
) {
    while let Some(payload) = successes.recv().await {
        if let Some(callback) = &callback {
            callback(payload);
        }
    }
    debug!("success listener stopped: producer closed");
}

async fn run_error_listener(
    mut errors: mpsc::UnboundedReceiver<MessagingError>,
    callback: Option<ErrorCallback>,
) {
    while let Some(err) = errors.recv().await {
        match &callback {
            Some(callback) => callback(err),
            None => warn!(error = %err, "message delivery failed"),
        }
    }
    debug!("error listener stopped: producer closed");
}

/// Blocking-style producer: each send awaits broker acknowledgement.
pub struct SyncSender {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
    metrics: Arc<ProducerMetrics>,
}

impl SyncSender {
    pub fn new(config: ProducerConfig, registry: &mut Registry) -> Result<Self> {
        let producer: FutureProducer = config.client_config().create()?;
        let timeout = config.message_timeout();

        Ok(Self {
            producer,
            topic: config.topic,
            timeout,
            metrics: Arc::new(ProducerMetrics::new(registry)),
        })
    }

    /// Serialize `payload`, deliver it, and return the assigned partition
    /// and offset.
    pub async fn send<T: Serialize>(&self, key: &str, payload: &T) -> Result<(i32, i64)> {
        let bytes = serde_json::to_vec(payload)?;
        self.metrics.enqueued.inc();

        let record = FutureRecord::to(&self.topic).key(key).payload(&bytes);
        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                debug!(topic = %self.topic, partition, offset, "message delivered");
                self.metrics.acks_ok.inc();
                Ok((partition, offset))
            }
            Err((err, _msg)) => {
                self.metrics.acks_failed.inc();
                error!(topic = %self.topic, error = %err, "message delivery failed");
                Err(MessagingError::Delivery(err))
            }
        }
    }

    /// Flush in-flight deliveries. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        self.producer.flush(Timeout::After(FLUSH_TIMEOUT))?;
        debug!(topic = %self.topic, "sync sender closed");
        Ok(())
    }

    /// Snapshot of the sender's metric collectors.
    pub fn metrics(&self) -> &ProducerMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use rdkafka::error::KafkaError;
    use rdkafka::message::OwnedMessage;
    use rdkafka::types::RDKafkaErrorCode;
    use rdkafka::Timestamp;

    fn failed_delivery() -> (KafkaError, OwnedMessage) {
        (
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
            OwnedMessage::new(
                Some(b"bad".to_vec()),
                Some(b"k".to_vec()),
                "orders".to_string(),
                Timestamp::NotAvailable,
                0,
                0,
                None,
            ),
        )
    }

    #[tokio::test]
    async fn ack_pump_routes_outcomes_to_listener_channels() {
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let (success_tx, mut success_rx) = mpsc::unbounded_channel();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let mut registry = Registry::default();
        let metrics = Arc::new(ProducerMetrics::new(&mut registry));

        acks_tx
            .send((b"ok".to_vec(), future::ready(Ok(Ok((2, 42))))))
            .unwrap();
        acks_tx
            .send((b"bad".to_vec(), future::ready(Ok(Err(failed_delivery())))))
            .unwrap();
        acks_tx
            .send((b"dropped".to_vec(), future::ready(Err(Canceled))))
            .unwrap();
        drop(acks_tx);

        run_ack_pump(acks_rx, success_tx, error_tx, metrics.clone()).await;

        assert_eq!(success_rx.recv().await, Some(b"ok".to_vec()));
        assert!(success_rx.recv().await.is_none());

        assert!(matches!(
            error_rx.recv().await,
            Some(MessagingError::Delivery(_))
        ));
        assert!(matches!(
            error_rx.recv().await,
            Some(MessagingError::AckCanceled)
        ));
        assert!(error_rx.recv().await.is_none());

        assert_eq!(metrics.acks_ok.get(), 1);
        assert_eq!(metrics.acks_failed.get(), 2);
    }

    #[tokio::test]
    async fn success_listener_invokes_callback_per_delivery() {
        let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: SuccessCallback = Arc::new(move |payload| sink.lock().push(payload));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(b"first".to_vec()).unwrap();
        tx.send(b"second".to_vec()).unwrap();
        drop(tx);

        run_success_listener(rx, Some(callback)).await;

        assert_eq!(*seen.lock(), vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn error_listener_invokes_callback_per_failure() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ErrorCallback = Arc::new(move |err| sink.lock().push(err.to_string()));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(MessagingError::AckCanceled).unwrap();
        drop(tx);

        run_error_listener(rx, Some(callback)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("dropped by the producer"));
    }

    #[tokio::test]
    async fn async_sender_close_is_idempotent() {
        let config = ProducerConfig {
            topic: "orders".to_string(),
            ..Default::default()
        };
        let mut registry = Registry::default();
        let sender = AsyncSender::new(config, &mut registry).unwrap();

        sender.close().await.unwrap();
        sender.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_fails_with_closed() {
        let config = ProducerConfig {
            topic: "orders".to_string(),
            ..Default::default()
        };
        let mut registry = Registry::default();
        let sender = AsyncSender::new(config, &mut registry).unwrap();
        sender.close().await.unwrap();

        let result = sender.send("k", &serde_json::json!({"ok": true})).await;
        assert!(matches!(result, Err(MessagingError::Closed)));
    }
}
