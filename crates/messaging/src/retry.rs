//! Per-record retry loop.
//!
//! Every consumed record runs one retry cycle: the handler is invoked, its
//! result classified, and transient failures are retried with exponential
//! backoff until the handler succeeds, fails permanently, or the owning
//! session is cancelled. A panic inside the handler is contained and
//! treated as a transient failure.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::HandlerError;
use crate::metrics::ConsumerMetrics;
use crate::record::Record;

/// Processes consumed records.
///
/// Returning `Ok(())` acknowledges the record. Returning
/// [`HandlerError::Permanent`] acknowledges the record without retrying.
/// Any other error is retried with backoff until the session ends.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: &Record) -> Result<(), HandlerError>;
}

/// How a record's retry cycle concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The record was handled (successfully or permanently failed) and
    /// must be acknowledged.
    Completed,
    /// The session was cancelled mid-cycle; the record must not be
    /// acknowledged so that it is redelivered after the rebalance.
    Abandoned,
}

/// Run one retry cycle for `record`.
///
/// The backoff policy is reset at the start of the cycle so a failing
/// record never inherits a long interval from its predecessor. The
/// cancellation signal is observed while waiting out a backoff interval;
/// cancellation mid-wait abandons the cycle immediately.
pub async fn process_record(
    handler: &dyn RecordHandler,
    record: &Record,
    backoff: &mut ExponentialBackoff,
    cancel: &mut watch::Receiver<bool>,
    metrics: &ConsumerMetrics,
) -> CycleOutcome {
    backoff.reset();

    loop {
        let attempt_started = Instant::now();

        let result = match AssertUnwindSafe(handler.handle(record)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::transient(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let elapsed = attempt_started.elapsed();
        metrics.handle_latency.observe(elapsed.as_secs_f64());
        let latency_ms = elapsed.as_millis() as u64;

        match result {
            Ok(()) => {
                info!(
                    latency_ms,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    payload = %record.payload_preview(),
                    "record consumed"
                );
                metrics.records_processed.inc();
                return CycleOutcome::Completed;
            }
            Err(err) if err.is_permanent() => {
                error!(
                    latency_ms,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    payload = %record.payload_preview(),
                    error = %err,
                    "record failed permanently, acknowledging without retry"
                );
                metrics.records_failed.inc();
                return CycleOutcome::Completed;
            }
            Err(err) => {
                // No retry will happen once the session is ending, so the
                // policy must not advance and the retry must not count.
                if *cancel.borrow() {
                    warn!(
                        latency_ms,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %err,
                        "record failed while the session was ending, abandoning"
                    );
                    return CycleOutcome::Abandoned;
                }

                let delay = backoff.next_delay();
                warn!(
                    latency_ms,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    payload = %record.payload_preview(),
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "record failed, retrying"
                );
                metrics.handler_retries.inc();

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.changed() => return CycleOutcome::Abandoned,
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
