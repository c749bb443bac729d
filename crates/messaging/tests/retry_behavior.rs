//! Retry loop behavior under simulated time.
//!
//! These tests drive the per-record retry cycle directly, with the Tokio
//! clock paused so backoff intervals are observed exactly and instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_client::registry::Registry;
use relay_messaging::backoff::ExponentialBackoff;
use relay_messaging::retry::{process_record, CycleOutcome};
use relay_messaging::{ConsumerMetrics, HandlerError, Record, RecordHandler};
use tokio::sync::watch;
use tokio::time::Instant;

/// Fails transiently a fixed number of times, then succeeds.
struct FlakyHandler {
    remaining_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyHandler {
    fn failing(times: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordHandler for FlakyHandler {
    async fn handle(&self, _record: &Record) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(HandlerError::transient("downstream unavailable"));
        }
        Ok(())
    }
}

struct PermanentHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl RecordHandler for PermanentHandler {
    async fn handle(&self, _record: &Record) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::permanent("payload references a deleted account"))
    }
}

/// Logs every invocation as (offset, clock reading), failing transiently
/// until its failure budget is spent.
struct SequenceHandler {
    invocations: Mutex<Vec<(i64, Instant)>>,
    failures_left: AtomicUsize,
}

#[async_trait]
impl RecordHandler for SequenceHandler {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError> {
        self.invocations
            .lock()
            .unwrap()
            .push((record.offset, Instant::now()));
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(HandlerError::transient("downstream unavailable"));
        }
        Ok(())
    }
}

struct AlwaysFailingHandler;

#[async_trait]
impl RecordHandler for AlwaysFailingHandler {
    async fn handle(&self, _record: &Record) -> Result<(), HandlerError> {
        Err(HandlerError::transient("downstream unavailable"))
    }
}

fn record_at_offset(offset: i64) -> Record {
    Record {
        topic: "orders".to_string(),
        partition: 0,
        offset,
        key: None,
        payload: format!("{{\"offset\":{offset}}}").into_bytes(),
        timestamp: None,
    }
}

fn test_metrics() -> ConsumerMetrics {
    let mut registry = Registry::default();
    ConsumerMetrics::new(&mut registry)
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_growing_backoff() {
    let handler = FlakyHandler::failing(2);
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(500),
        Duration::from_secs(30),
    );
    let (_cancel_tx, mut cancel_rx) = watch::channel(false);
    let metrics = test_metrics();

    let started = Instant::now();
    let outcome = process_record(
        &handler,
        &record_at_offset(0),
        &mut backoff,
        &mut cancel_rx,
        &metrics,
    )
    .await;

    assert_eq!(outcome, CycleOutcome::Completed);
    assert_eq!(handler.calls(), 3);
    // Two waits at 500ms and 750ms (multiplier 1.5).
    assert!(started.elapsed() >= Duration::from_millis(1_250));
    assert_eq!(metrics.handler_retries.get(), 2);
    assert_eq!(metrics.records_processed.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_completes_without_retrying() {
    let handler = PermanentHandler {
        calls: AtomicUsize::new(0),
    };
    let mut backoff = ExponentialBackoff::default();
    let (_cancel_tx, mut cancel_rx) = watch::channel(false);
    let metrics = test_metrics();

    let started = Instant::now();
    let outcome = process_record(
        &handler,
        &record_at_offset(0),
        &mut backoff,
        &mut cancel_rx,
        &metrics,
    )
    .await;

    assert_eq!(outcome, CycleOutcome::Completed);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    // No backoff interval was waited out.
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(metrics.records_failed.get(), 1);
    assert_eq!(metrics.handler_retries.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_backoff_abandons_promptly() {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let metrics = test_metrics();

    let started = Instant::now();
    let cycle = tokio::spawn(async move {
        process_record(
            &AlwaysFailingHandler,
            &record_at_offset(0),
            &mut backoff,
            &mut cancel_rx,
            &metrics,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel_tx.send(true).unwrap();

    let outcome = cycle.await.unwrap();
    assert_eq!(outcome, CycleOutcome::Abandoned);
    // Well short of the 60s backoff interval.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn a_record_completes_before_the_next_one_begins() {
    let handler = SequenceHandler {
        invocations: Mutex::new(Vec::new()),
        failures_left: AtomicUsize::new(2),
    };
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(500),
        Duration::from_secs(30),
    );
    let (_cancel_tx, mut cancel_rx) = watch::channel(false);
    let metrics = test_metrics();

    for offset in 0..2 {
        let outcome = process_record(
            &handler,
            &record_at_offset(offset),
            &mut backoff,
            &mut cancel_rx,
            &metrics,
        )
        .await;
        assert_eq!(outcome, CycleOutcome::Completed);
    }

    let invocations = handler.invocations.lock().unwrap();
    let offsets: Vec<i64> = invocations.iter().map(|(offset, _)| *offset).collect();
    // Offset 0's full retry cycle (two failures) runs to completion
    // before offset 1 is invoked at all.
    assert_eq!(offsets, vec![0, 0, 0, 1]);
    // Offset 1's first invocation comes after offset 0's backoff waits
    // (500ms and 750ms), not interleaved with them.
    assert!(invocations[3].1 - invocations[0].1 >= Duration::from_millis(1_250));
}

#[tokio::test(start_paused = true)]
async fn ending_session_neither_advances_the_policy_nor_counts_a_retry() {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(500),
        Duration::from_secs(30),
    );
    // The session is already ending when the record fails.
    let (_cancel_tx, mut cancel_rx) = watch::channel(true);
    let metrics = test_metrics();

    let outcome = process_record(
        &AlwaysFailingHandler,
        &record_at_offset(0),
        &mut backoff,
        &mut cancel_rx,
        &metrics,
    )
    .await;

    assert_eq!(outcome, CycleOutcome::Abandoned);
    assert_eq!(metrics.handler_retries.get(), 0);
    // The next cycle still starts from the initial interval.
    assert_eq!(backoff.next_delay(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn each_record_starts_from_the_initial_interval() {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(500),
        Duration::from_secs(30),
    );
    let (_cancel_tx, mut cancel_rx) = watch::channel(false);
    let metrics = test_metrics();

    // First record fails twice, pushing the policy past its initial
    // interval.
    let handler = FlakyHandler::failing(2);
    let outcome = process_record(
        &handler,
        &record_at_offset(0),
        &mut backoff,
        &mut cancel_rx,
        &metrics,
    )
    .await;
    assert_eq!(outcome, CycleOutcome::Completed);

    // The next record's single retry must wait the initial 500ms, not an
    // interval inherited from its predecessor.
    let handler = FlakyHandler::failing(1);
    let started = Instant::now();
    let outcome = process_record(
        &handler,
        &record_at_offset(1),
        &mut backoff,
        &mut cancel_rx,
        &metrics,
    )
    .await;

    assert_eq!(outcome, CycleOutcome::Completed);
    assert_eq!(started.elapsed(), Duration::from_millis(500));
}
