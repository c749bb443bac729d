//! Metric collectors for the messaging clients.
//!
//! Collectors are registered into a caller-supplied registry and passed
//! into each client constructor; there is no process-wide metric state.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Metrics for a consumer-group session loop and its record workers.
#[derive(Clone)]
pub struct ConsumerMetrics {
    /// Records whose retry cycle concluded with success.
    pub records_processed: Counter,
    /// Records whose retry cycle concluded with a permanent failure.
    pub records_failed: Counter,
    /// Handler invocations that failed transiently and were retried.
    pub handler_retries: Counter,
    /// Latency of individual handler invocations, in seconds.
    pub handle_latency: Histogram,
    /// Sessions ended by a group rebalance.
    pub rebalances: Counter,
    /// Reconnect attempts after a transport error.
    pub connect_retries: Counter,
}

impl ConsumerMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let records_processed = Counter::default();
        registry.register(
            "relay_consumer_records_processed",
            "Records fully processed and acknowledged",
            records_processed.clone(),
        );

        let records_failed = Counter::default();
        registry.register(
            "relay_consumer_records_failed",
            "Records acknowledged after a permanent handler failure",
            records_failed.clone(),
        );

        let handler_retries = Counter::default();
        registry.register(
            "relay_consumer_handler_retries",
            "Handler invocations retried after a transient failure",
            handler_retries.clone(),
        );

        let handle_latency = Histogram::new(exponential_buckets(0.001, 2.0, 16));
        registry.register(
            "relay_consumer_handle_latency_seconds",
            "Latency of handler invocations",
            handle_latency.clone(),
        );

        let rebalances = Counter::default();
        registry.register(
            "relay_consumer_rebalances",
            "Consumer sessions ended by a group rebalance",
            rebalances.clone(),
        );

        let connect_retries = Counter::default();
        registry.register(
            "relay_consumer_connect_retries",
            "Reconnect attempts after a transport error",
            connect_retries.clone(),
        );

        Self {
            records_processed,
            records_failed,
            handler_retries,
            handle_latency,
            rebalances,
            connect_retries,
        }
    }
}

/// Metrics for the producer send path and acknowledgement fan-out.
#[derive(Debug, Clone)]
pub struct ProducerMetrics {
    /// Messages accepted onto the producer queue.
    pub enqueued: Counter,
    /// Deliveries acknowledged by the broker.
    pub acks_ok: Counter,
    /// Deliveries that failed or were dropped.
    pub acks_failed: Counter,
}

impl ProducerMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let enqueued = Counter::default();
        registry.register(
            "relay_producer_enqueued",
            "Messages accepted onto the producer queue",
            enqueued.clone(),
        );

        let acks_ok = Counter::default();
        registry.register(
            "relay_producer_acks_ok",
            "Deliveries acknowledged by the broker",
            acks_ok.clone(),
        );

        let acks_failed = Counter::default();
        registry.register(
            "relay_producer_acks_failed",
            "Deliveries that failed or were dropped",
            acks_failed.clone(),
        );

        Self {
            enqueued,
            acks_ok,
            acks_failed,
        }
    }
}
