//! Consumer-group session loop.
//!
//! [`GroupConsumer`] keeps a partitioned subscription alive across broker
//! disconnects and group rebalances. Each granted assignment is one
//! *session*: the rebalance callback splits a partition queue per claim,
//! the session loop spawns a worker per claim, and every worker drains its
//! partition strictly in offset order, running the retry loop for each
//! record and storing the offset once the cycle concludes. A transport
//! error tears the session down and re-enters the subscribe loop with
//! capped exponential backoff; a rebalance re-enters it immediately with a
//! fresh readiness gate.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::{ClientContext, Message};
use prometheus_client::registry::Registry;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::config::ConsumerConfig;
use crate::error::{MessagingError, Result};
use crate::metrics::ConsumerMetrics;
use crate::record::Record;
use crate::retry::{process_record, CycleOutcome, RecordHandler};

/// Wait between poll attempts after the undivided stream reports an error.
const DRIVER_ERROR_PAUSE: Duration = Duration::from_millis(500);

/// One partition granted to this consumer for the current session.
struct PartitionClaim {
    topic: String,
    partition: i32,
    queue: StreamPartitionQueue<SessionContext>,
}

enum SessionEvent {
    Assigned(Vec<PartitionClaim>),
    Revoked,
}

enum SessionEnd {
    Closed,
    Rebalance,
    Error(MessagingError),
}

/// Rebalance-aware client context.
///
/// Assignment and revocation callbacks run inside the poll loop; they
/// translate transport events into [`SessionEvent`]s for the session loop
/// and split one partition queue per granted claim.
struct SessionContext {
    events: mpsc::UnboundedSender<SessionEvent>,
    consumer: OnceLock<Weak<StreamConsumer<SessionContext>>>,
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn post_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let Some(consumer) = self.consumer.get().and_then(Weak::upgrade) else {
                    return;
                };

                let mut claims = Vec::new();
                for elem in tpl.elements() {
                    match consumer.split_partition_queue(elem.topic(), elem.partition()) {
                        Some(queue) => claims.push(PartitionClaim {
                            topic: elem.topic().to_string(),
                            partition: elem.partition(),
                            queue,
                        }),
                        None => warn!(
                            topic = elem.topic(),
                            partition = elem.partition(),
                            "could not split partition queue for assigned partition"
                        ),
                    }
                }

                info!(partitions = claims.len(), "partitions assigned");
                let _ = self.events.send(SessionEvent::Assigned(claims));
            }
            Rebalance::Revoke(tpl) => {
                info!(partitions = tpl.count(), "partitions revoked");
                let _ = self.events.send(SessionEvent::Revoked);
            }
            Rebalance::Error(err) => {
                error!(error = %err, "rebalance error");
            }
        }
    }
}

/// Readiness gate signaled exactly once per session.
///
/// A fresh sender replaces the old one on every new session; a consumed
/// gate is never reused, so double-signaling is impossible by
/// construction. Only the first gate has a listener (the `start` caller).
struct ReadyGate {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ReadyGate {
    fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn signal_ready(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
    }

    fn replace(&self) {
        let (tx, _rx) = oneshot::channel();
        *self.tx.lock() = Some(tx);
    }
}

/// A resilient consumer-group subscription.
pub struct GroupConsumer {
    consumer: Arc<StreamConsumer<SessionContext>>,
    config: ConsumerConfig,
    handler: Arc<dyn RecordHandler>,
    metrics: Arc<ConsumerMetrics>,
    gate: Arc<ReadyGate>,
    ready_rx: Mutex<Option<oneshot::Receiver<()>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl GroupConsumer {
    /// Create a consumer for `config.topic` in `config.group_id`.
    ///
    /// The consumer does not connect until [`GroupConsumer::start`] is
    /// called. Metric collectors are registered into `registry`.
    pub fn new(
        config: ConsumerConfig,
        handler: Arc<dyn RecordHandler>,
        registry: &mut Registry,
    ) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let context = SessionContext {
            events: events_tx,
            consumer: OnceLock::new(),
        };

        let consumer: StreamConsumer<SessionContext> =
            config.client_config().create_with_context(context)?;
        let consumer = Arc::new(consumer);
        let _ = consumer.context().consumer.set(Arc::downgrade(&consumer));

        let (gate, ready_rx) = ReadyGate::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            consumer,
            config,
            handler,
            metrics: Arc::new(ConsumerMetrics::new(registry)),
            gate,
            ready_rx: Mutex::new(Some(ready_rx)),
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx,
            shutdown_rx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Subscribe and block until the first partition assignment is granted.
    ///
    /// The session loop keeps running on background tasks for the lifetime
    /// of the subscription; connection errors after this point are retried
    /// with backoff and never surfaced to the caller.
    pub async fn start(&self) -> Result<()> {
        let events_rx = self
            .events_rx
            .lock()
            .take()
            .ok_or(MessagingError::AlreadyStarted)?;
        let ready_rx = self
            .ready_rx
            .lock()
            .take()
            .ok_or(MessagingError::AlreadyStarted)?;

        self.consumer.subscribe(&[self.config.topic.as_str()])?;

        let (transport_err_tx, transport_err_rx) = mpsc::channel(1);

        let driver = tokio::spawn(drive_main_stream(
            self.consumer.clone(),
            self.shutdown_rx.clone(),
            transport_err_tx,
        ));

        let session_loop = SessionLoop {
            consumer: self.consumer.clone(),
            config: self.config.clone(),
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
            gate: self.gate.clone(),
            events: events_rx,
            transport_errors: transport_err_rx,
            shutdown: self.shutdown_rx.clone(),
        };
        let supervisor = tokio::spawn(session_loop.run());

        {
            let mut tasks = self.tasks.lock().await;
            tasks.push(driver);
            tasks.push(supervisor);
        }

        let mut shutdown = self.shutdown_rx.clone();
        tokio::select! {
            res = ready_rx => res.map_err(|_| MessagingError::Closed),
            _ = shutdown.changed() => Err(MessagingError::Closed),
        }
    }

    /// Shut down gracefully: leave the consumer group, cancel all
    /// in-flight sessions, and wait for the background tasks to exit.
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        // Leaving the group here lets the coordinator reassign our
        // partitions right away instead of waiting for the member to be
        // evicted by its poll timeout.
        self.consumer.unsubscribe();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        info!(topic = %self.config.topic, "consumer closed");
        Ok(())
    }

    /// Snapshot of the consumer's metric collectors.
    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }
}

/// Polls the undivided consumer stream.
///
/// Polling the main stream is what services the group protocol (and thus
/// the rebalance callbacks); with every assigned partition split into its
/// own queue, no records are expected here.
async fn drive_main_stream(
    consumer: Arc<StreamConsumer<SessionContext>>,
    mut shutdown: watch::Receiver<bool>,
    errors: mpsc::Sender<MessagingError>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = consumer.recv() => match result {
                Ok(msg) => warn!(
                    topic = msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "record on undivided stream, dropping without acknowledgement"
                ),
                Err(RdKafkaError::PartitionEOF(partition)) => {
                    debug!(partition, "reached end of partition");
                }
                Err(err) => {
                    let _ = errors.try_send(err.into());
                    sleep(DRIVER_ERROR_PAUSE).await;
                }
            }
        }
    }
    debug!("consumer stream driver stopped");
}

struct SessionLoop {
    consumer: Arc<StreamConsumer<SessionContext>>,
    config: ConsumerConfig,
    handler: Arc<dyn RecordHandler>,
    metrics: Arc<ConsumerMetrics>,
    gate: Arc<ReadyGate>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    transport_errors: mpsc::Receiver<MessagingError>,
    shutdown: watch::Receiver<bool>,
}

impl SessionLoop {
    async fn run(mut self) {
        let mut connect_backoff =
            ExponentialBackoff::new(self.config.initial_backoff(), self.config.max_backoff());
        let mut pending_claims: Option<Vec<PartitionClaim>> = None;

        'outer: loop {
            // Connecting: wait for the broker to grant an assignment.
            let claims = match pending_claims.take() {
                Some(claims) => claims,
                None => loop {
                    tokio::select! {
                        _ = self.shutdown.changed() => break 'outer,
                        event = self.events.recv() => match event {
                            Some(SessionEvent::Assigned(claims)) => break claims,
                            Some(SessionEvent::Revoked) => continue,
                            None => break 'outer,
                        },
                        Some(err) = self.transport_errors.recv() => {
                            if self.wait_out_error(err, &mut connect_backoff).await {
                                break 'outer;
                            }
                        }
                    }
                },
            };

            // Consuming: one worker per claim, a fresh backoff per worker.
            connect_backoff.reset();
            self.gate.signal_ready();
            info!(
                topic = %self.config.topic,
                partitions = claims.len(),
                "consumer session established"
            );

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let (worker_err_tx, mut worker_err_rx) = mpsc::unbounded_channel();
            let mut workers = Vec::with_capacity(claims.len());
            for claim in claims {
                workers.push(tokio::spawn(run_partition_worker(
                    claim,
                    self.consumer.clone(),
                    self.handler.clone(),
                    cancel_rx.clone(),
                    worker_err_tx.clone(),
                    self.metrics.clone(),
                    ExponentialBackoff::new(
                        self.config.initial_backoff(),
                        self.config.max_backoff(),
                    ),
                )));
            }
            drop(worker_err_tx);
            drop(cancel_rx);

            let end = tokio::select! {
                _ = self.shutdown.changed() => SessionEnd::Closed,
                event = self.events.recv() => match event {
                    Some(SessionEvent::Revoked) => SessionEnd::Rebalance,
                    Some(SessionEvent::Assigned(claims)) => {
                        pending_claims = Some(claims);
                        SessionEnd::Rebalance
                    }
                    None => SessionEnd::Closed,
                },
                Some(err) = self.transport_errors.recv() => SessionEnd::Error(err),
                Some(err) = worker_err_rx.recv() => SessionEnd::Error(err),
            };

            let _ = cancel_tx.send(true);
            for worker in workers {
                let _ = worker.await;
            }

            match end {
                SessionEnd::Closed => break,
                SessionEnd::Rebalance => {
                    // Re-enter the subscribe loop immediately; the connect
                    // backoff is deliberately not consulted for rebalances.
                    self.metrics.rebalances.inc();
                    self.gate.replace();
                    info!(topic = %self.config.topic, "session ended by rebalance, resubscribing");
                }
                SessionEnd::Error(err) => {
                    if self.wait_out_error(err, &mut connect_backoff).await {
                        break;
                    }
                }
            }
        }

        info!(topic = %self.config.topic, "consumer session loop stopped");
    }

    /// Log a transport error and wait one connect backoff interval.
    /// Returns true when shutdown was requested during the wait.
    async fn wait_out_error(
        &mut self,
        err: MessagingError,
        backoff: &mut ExponentialBackoff,
    ) -> bool {
        let delay = backoff.next_delay();
        error!(
            topic = %self.config.topic,
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "consumer session error, backing off"
        );
        self.metrics.connect_retries.inc();

        tokio::select! {
            _ = sleep(delay) => false,
            _ = self.shutdown.changed() => true,
        }
    }
}

/// Drain one claimed partition strictly in offset order.
///
/// The worker does not advance to the next record until the current
/// record's retry cycle has concluded. Offsets are stored only on
/// completion; an abandoned cycle leaves the record uncommitted so the
/// next assignee redelivers it.
async fn run_partition_worker(
    claim: PartitionClaim,
    consumer: Arc<StreamConsumer<SessionContext>>,
    handler: Arc<dyn RecordHandler>,
    mut cancel: watch::Receiver<bool>,
    errors: mpsc::UnboundedSender<MessagingError>,
    metrics: Arc<ConsumerMetrics>,
    mut backoff: ExponentialBackoff,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.changed() => break,
            result = claim.queue.recv() => match result {
                Ok(msg) => msg,
                Err(RdKafkaError::PartitionEOF(_)) => continue,
                Err(err) => {
                    let _ = errors.send(err.into());
                    break;
                }
            }
        };

        let record = Record::from_borrowed(&msg);
        match process_record(handler.as_ref(), &record, &mut backoff, &mut cancel, &metrics).await
        {
            CycleOutcome::Completed => {
                if let Err(err) = consumer.store_offset_from_message(&msg) {
                    let _ = errors.send(err.into());
                    break;
                }
            }
            CycleOutcome::Abandoned => break,
        }
    }

    debug!(
        topic = %claim.topic,
        partition = claim.partition,
        "partition worker stopped"
    );
}
