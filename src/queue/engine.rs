//! Flush engine: drain, encode, submit with retry, interpret, report.
//!
//! A flush moves through `Draining -> Encoding -> Submitting -> (Retrying |
//! Interpreting) -> Reporting`. Retries resend the same encoded body for the
//! whole batch; items rejected individually by the backend are reported and
//! never resubmitted.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::encoder::{encode_batch, EncodeError, EncodedBatch};
use super::operation::Operation;
use super::outcome::{FlushOutcome, ItemError, StatsCounters, ENCODING_ERROR_TYPE};
use super::pending::PendingQueue;
use super::scheduler::InFlight;
use super::transport::{ItemResult, Transport, TransportError};
use crate::config::QueueConfig;
use crate::error::BulkError;

/// State shared between a queue handle and its background threads.
pub(crate) struct Engine {
    pub(crate) pending: PendingQueue,
    pub(crate) config: QueueConfig,
    pub(crate) stats: StatsCounters,
    pub(crate) in_flight: InFlight,
    transport: Arc<dyn Transport>,
    threshold_flush_active: AtomicBool,
    terminated: AtomicBool,
}

impl Engine {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: QueueConfig) -> Self {
        Self {
            pending: PendingQueue::new(),
            config: config.normalized(),
            stats: StatsCounters::default(),
            in_flight: InFlight::default(),
            transport,
            threshold_flush_active: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    /// Mark the queue terminal. Threshold triggers stop firing.
    pub(crate) fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn threshold_reached(&self) -> bool {
        let threshold = self.config.flush_threshold;
        threshold > 0 && !self.is_terminated() && self.pending.len() >= threshold
    }

    /// Called after every append with the resulting queue size.
    pub(crate) fn after_enqueue(self: &Arc<Self>, size: usize) {
        let threshold = self.config.flush_threshold;
        if threshold == 0 || size < threshold || self.is_terminated() {
            return;
        }

        if self
            .threshold_flush_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(size, threshold, "threshold flush already in flight");
            return;
        }

        debug!(size, threshold, "flush threshold reached");
        let engine = Arc::clone(self);
        if !self
            .in_flight
            .spawn("bulkq-threshold", move || engine.run_threshold_flushes())
        {
            self.threshold_flush_active.store(false, Ordering::Release);
        }
    }

    /// Flush until the queue is back under the threshold. Only one of these
    /// runs at a time per queue.
    fn run_threshold_flushes(&self) {
        loop {
            {
                let _active = ThresholdFlushGuard(&self.threshold_flush_active);
                self.background_flush("threshold");
            }

            // A producer may have crossed the threshold while the flag was set.
            if !self.threshold_reached()
                || self
                    .threshold_flush_active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
        }
    }

    /// Flush on a background thread with no caller to return errors to.
    /// A panicking callback is logged and does not take the thread down.
    pub(crate) fn background_flush(&self, trigger: &'static str) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.flush())) {
            Ok(Ok(outcome)) if outcome.total() > 0 => {
                debug!(trigger, succeeded = outcome.success_count, "background flush finished");
            },
            Ok(Ok(_)) => {},
            Ok(Err(e)) => {
                // Already reported through on_error.
                debug!(trigger, error = %e, "background flush failed");
            },
            Err(payload) => {
                error!(
                    trigger,
                    panic = panic_message(payload.as_ref()),
                    "background flush panicked"
                );
            },
        }
    }

    /// Drain and submit everything pending.
    pub(crate) fn flush(&self) -> Result<FlushOutcome, BulkError> {
        let items = self.pending.drain_all();
        if items.is_empty() {
            debug!("nothing to flush");
            return Ok(FlushOutcome::empty());
        }

        let batch = encode_batch(&items);
        let mut outcome = FlushOutcome::empty();

        for (index, err) in &batch.failures {
            outcome.record_failure(encoding_error(*index, &items[*index], err));
        }
        if !batch.failures.is_empty() {
            warn!(
                count = batch.failures.len(),
                "skipping operations that could not be encoded"
            );
        }

        self.stats.flush_started(batch.submitted.len());

        if !batch.is_empty() {
            match self.submit_with_retry(&batch) {
                Ok(results) => interpret(&mut outcome, &items, &batch.submitted, results),
                Err(e) => {
                    let dropped = batch.submitted.len();
                    error!(count = dropped, error = %e, "dropping batch after retries");
                    self.stats.dropped(dropped);
                    self.stats.record(&outcome);
                    if let Some(on_error) = &self.config.on_error {
                        on_error(&items, &e);
                    }
                    return Err(e);
                },
            }
        }

        outcome.flushed_at = Some(Utc::now());
        self.stats.record(&outcome);

        info!(
            succeeded = outcome.success_count,
            failed = outcome.failed_count,
            "bulk flush completed"
        );
        if !outcome.all_succeeded() {
            warn!(failed = outcome.failed_count, "some operations were rejected");
        }

        if outcome.success_count > 0 {
            if let Some(on_success) = &self.config.on_success {
                on_success(outcome.success_count, &outcome.per_collection);
            }
        }
        if let Some(on_flush) = &self.config.on_flush {
            on_flush(&outcome);
        }

        Ok(outcome)
    }

    fn submit_with_retry(&self, batch: &EncodedBatch) -> Result<Vec<ItemResult>, BulkError> {
        let expected = batch.submitted.len();
        let mut attempt = 0;

        loop {
            let result = self.transport.submit(&batch.body).and_then(|results| {
                if results.len() == expected {
                    Ok(results)
                } else {
                    Err(TransportError::MalformedResponse(format!(
                        "expected {expected} item results, got {}",
                        results.len()
                    )))
                }
            });

            match result {
                Ok(results) => return Ok(results),
                Err(source) => {
                    self.stats.transport_failed();
                    if attempt >= self.config.max_retries {
                        return Err(BulkError::Transport {
                            attempts: attempt + 1,
                            source,
                        });
                    }

                    let delay = self.config.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %source,
                        "bulk submission failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                },
            }
        }
    }
}

/// Clears the threshold flag when a threshold flush ends, even by panic.
struct ThresholdFlushGuard<'a>(&'a AtomicBool);

impl Drop for ThresholdFlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Match positional results back to their drained items.
fn interpret(
    outcome: &mut FlushOutcome,
    items: &[Operation],
    submitted: &[usize],
    results: Vec<ItemResult>,
) {
    for (&index, result) in submitted.iter().zip(results) {
        let item = &items[index];
        if result.is_success() {
            outcome.record_success(item.collection());
        } else {
            outcome.record_failure(rejection_error(index, item, result));
        }
    }
}

fn rejection_error(index: usize, item: &Operation, result: ItemResult) -> ItemError {
    let (error_type, reason, cause) = match result.error {
        Some(detail) => (detail.error_type, detail.reason, detail.caused_by),
        None => (
            String::new(),
            result
                .status
                .map_or_else(String::new, |s| format!("status {s}")),
            None,
        ),
    };

    ItemError {
        batch_index: index,
        kind: item.kind(),
        collection: item.collection().to_string(),
        document_id: item.document_id().map(String::from),
        status: result.status,
        error_type,
        reason,
        cause_type: cause.as_ref().map(|c| c.error_type.clone()),
        cause_reason: cause.map(|c| c.reason),
    }
}

fn encoding_error(index: usize, item: &Operation, err: &EncodeError) -> ItemError {
    ItemError {
        batch_index: index,
        kind: item.kind(),
        collection: item.collection().to_string(),
        document_id: item.document_id().map(String::from),
        status: None,
        error_type: ENCODING_ERROR_TYPE.to_string(),
        reason: err.to_string(),
        cause_type: None,
        cause_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::transport::MockTransport;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    fn engine(transport: MockTransport, config: QueueConfig) -> Engine {
        Engine::new(Arc::new(transport), config)
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn ops(collection: &str, count: usize) -> Vec<Operation> {
        (0..count)
            .map(|i| Operation::upsert_with_id(collection, i.to_string(), json!({"n": i})))
            .collect()
    }

    #[test]
    fn test_empty_flush_skips_transport() {
        let mut transport = MockTransport::new();
        transport.expect_submit().never();
        let engine = engine(transport, QueueConfig::default());

        let outcome = engine.flush().unwrap();
        assert_eq!(outcome, FlushOutcome::empty());
        assert_eq!(engine.stats.snapshot().flushes, 0);
    }

    #[test]
    fn test_retry_with_backoff_then_success() {
        let mut transport = MockTransport::new();
        let mut calls = 0;
        let times = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&times);
        transport.expect_submit().times(3).returning(move |_| {
            recorded.lock().push(Instant::now());
            calls += 1;
            if calls <= 2 {
                Err(TransportError::Connection("refused".to_string()))
            } else {
                Ok(vec![ItemResult::accepted(201); 2])
            }
        });

        let successes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&successes);
        let config = QueueConfig::default()
            .retries(2, Duration::from_millis(100))
            .on_success(move |count, per_collection| {
                sink.lock().push((count, per_collection.clone()));
            });
        let engine = engine(transport, config);
        engine.pending.extend(ops("a", 2));

        let outcome = engine.flush().unwrap();
        assert_eq!(outcome.success_count, 2);

        let seen_at = times.lock().clone();
        assert_eq!(seen_at.len(), 3);
        assert!(seen_at[1] - seen_at[0] >= Duration::from_millis(100));
        assert!(seen_at[2] - seen_at[1] >= Duration::from_millis(200));

        let successes = successes.lock();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].0, 2);
        assert_eq!(successes[0].1["a"], 2);

        let stats = engine.stats.snapshot();
        assert_eq!(stats.transport_failures, 2);
        assert_eq!(stats.succeeded, 2);
    }

    #[test]
    fn test_retries_exhausted_calls_on_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .times(2)
            .returning(|_| Err(TransportError::Timeout("30s".to_string())));

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let config = QueueConfig::default()
            .retries(1, Duration::from_millis(1))
            .on_success(|_, _| panic!("no success expected"))
            .on_error(move |items, err| sink.lock().push((items.len(), err.to_string())));
        let engine = engine(transport, config);
        engine.pending.extend(ops("a", 3));
        engine.pending.push(Operation::upsert("a", "{broken"));

        let err = engine.flush().unwrap_err();
        assert!(matches!(err, BulkError::Transport { attempts: 2, .. }));

        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 4);
        assert!(failures[0].1.contains("timed out"));

        assert_eq!(engine.pending.len(), 0);
        let stats = engine.stats.snapshot();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_threshold_flushing_survives_panicking_callback() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .times(2)
            .returning(|_| Ok(vec![ItemResult::accepted(201)]));

        let first_call = Arc::new(AtomicBool::new(true));
        let config = QueueConfig::default()
            .flush_threshold(1)
            .on_success(move |_, _| {
                if first_call.swap(false, Ordering::SeqCst) {
                    panic!("callback failed");
                }
            });
        let engine = Arc::new(engine(transport, config));

        for id in ["1", "2"] {
            let size = engine
                .pending
                .push(Operation::upsert_with_id("a", id, json!({"id": id})));
            engine.after_enqueue(size);
            assert!(wait_until(Duration::from_secs(5), || {
                engine.pending.is_empty()
                    && !engine.threshold_flush_active.load(Ordering::Acquire)
            }));
        }

        engine.in_flight.close_and_wait();
        assert_eq!(engine.stats.snapshot().succeeded, 2);
    }

    #[test]
    fn test_no_retry_when_disabled() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_| {
            Err(TransportError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        });
        let engine = engine(transport, QueueConfig::default());
        engine.pending.extend(ops("a", 1));

        assert!(engine.flush().unwrap_err().is_transport());
    }

    #[test]
    fn test_result_count_mismatch_is_retried() {
        let mut transport = MockTransport::new();
        let mut calls = 0;
        transport.expect_submit().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(vec![ItemResult::accepted(201)])
            } else {
                Ok(vec![ItemResult::accepted(201); 2])
            }
        });
        let config = QueueConfig::default().retries(1, Duration::from_millis(1));
        let engine = engine(transport, config);
        engine.pending.extend(ops("a", 2));

        assert_eq!(engine.flush().unwrap().success_count, 2);
    }

    #[test]
    fn test_partial_success_reports_both() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_| {
            let mut conflict = ItemResult::rejected(
                409,
                "version_conflict_engine_exception",
                "document already exists",
            );
            if let Some(detail) = conflict.error.as_mut() {
                detail.caused_by = Some(Box::new(crate::queue::ItemErrorDetail {
                    error_type: "engine_exception".to_string(),
                    reason: "seq_no mismatch".to_string(),
                    caused_by: None,
                }));
            }
            Ok(vec![
                ItemResult::accepted(201),
                conflict,
                ItemResult::accepted(201),
                ItemResult::rejected(400, "mapper_parsing_exception", "bad field"),
                ItemResult::accepted(200),
            ])
        });

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let config = QueueConfig::default().on_success(move |count, _| sink.lock().push(count));
        let engine = engine(transport, config);
        engine.pending.extend(ops("a", 5));

        let outcome = engine.flush().unwrap();
        assert_eq!(outcome.success_count, 3);
        assert_eq!(outcome.failed_count, 2);
        assert_eq!(outcome.item_errors.len(), 2);
        assert_eq!(outcome.per_collection["a"], 3);
        assert_eq!(*reported.lock(), vec![3]);

        let conflict = &outcome.item_errors[0];
        assert_eq!(conflict.batch_index, 1);
        assert_eq!(conflict.document_id.as_deref(), Some("1"));
        assert_eq!(conflict.status, Some(409));
        assert_eq!(conflict.cause_type.as_deref(), Some("engine_exception"));
        assert_eq!(conflict.cause_reason.as_deref(), Some("seq_no mismatch"));
        assert_eq!(outcome.item_errors[1].batch_index, 3);
    }

    #[test]
    fn test_encoding_failures_are_item_errors() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .times(1)
            .withf(|body| body.split(|b| *b == b'\n').count() == 5)
            .returning(|_| Ok(vec![ItemResult::accepted(201); 2]));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let config = QueueConfig::default().on_flush(move |outcome| sink.lock().push(outcome.clone()));
        let engine = engine(transport, config);
        engine.pending.push(Operation::upsert("a", json!({"ok": 1})));
        engine.pending.push(Operation::upsert("b", "{broken"));
        engine.pending.push(Operation::upsert("a", json!({"ok": 2})));

        let outcome = engine.flush().unwrap();
        assert_eq!(*observed.lock(), vec![outcome.clone()]);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.failed_count, 1);
        let err = &outcome.item_errors[0];
        assert_eq!(err.batch_index, 1);
        assert_eq!(err.collection, "b");
        assert_eq!(err.error_type, ENCODING_ERROR_TYPE);
        assert!(err.status.is_none());
    }

    #[test]
    fn test_all_items_unencodable_skips_transport() {
        let mut transport = MockTransport::new();
        transport.expect_submit().never();
        let engine = engine(transport, QueueConfig::default());
        engine.pending.push(Operation::upsert("a", json!("scalar")));

        let outcome = engine.flush().unwrap();
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.success_count, 0);
    }

    #[test]
    fn test_per_collection_counts() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_| Ok(vec![ItemResult::accepted(201); 5]));
        let engine = engine(transport, QueueConfig::default());
        engine.pending.extend(ops("a", 3));
        engine.pending.extend(ops("b", 2));

        let outcome = engine.flush().unwrap();
        let expected: HashMap<String, usize> =
            [("a".to_string(), 3), ("b".to_string(), 2)].into_iter().collect();
        assert_eq!(outcome.per_collection, expected);
        assert!(outcome.flushed_at.is_some());
    }
}
