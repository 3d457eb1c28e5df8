//! The public bulk queue handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::engine::Engine;
use super::operation::{Operation, Payload};
use super::outcome::{FlushOutcome, QueueStats};
use super::scheduler::Scheduler;
use super::transport::Transport;
use crate::config::QueueConfig;
use crate::error::BulkError;

/// A self-flushing queue of bulk write operations.
///
/// Producers on any thread append operations; the queue submits them as one
/// combined bulk request when [`flush`](Self::flush) is called, when the
/// pending count reaches the configured threshold, on every scheduler tick
/// after [`start`](Self::start), and once more during [`stop`](Self::stop).
///
/// Appending never blocks on I/O. Threshold and timer flushes run on
/// background threads and report only through the configured callbacks.
///
/// ```no_run
/// use bulkq::{BulkQueue, QueueConfig};
/// # fn demo(transport: impl bulkq::Transport + 'static) -> Result<(), bulkq::BulkError> {
/// let queue = BulkQueue::new(transport, QueueConfig::default().flush_threshold(500));
/// queue.start()?;
/// queue.add("products", serde_json::json!({"sku": "A-1"}));
/// queue.add_delete("products", "B-2");
/// let outcome = queue.stop()?;
/// # Ok(()) }
/// ```
pub struct BulkQueue {
    engine: Arc<Engine>,
    scheduler: Mutex<Scheduler>,
    running: AtomicBool,
}

impl BulkQueue {
    /// Create a queue. The scheduler is not started.
    #[must_use]
    pub fn new<T>(transport: T, config: QueueConfig) -> Self
    where
        T: Transport + 'static,
    {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Create a queue over a shared transport.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, config: QueueConfig) -> Self {
        Self {
            engine: Arc::new(Engine::new(transport, config)),
            scheduler: Mutex::new(Scheduler::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Index a document with a backend-assigned id.
    pub fn add(&self, collection: impl Into<String>, payload: impl Into<Payload>) {
        self.add_item(Operation::upsert(collection, payload));
    }

    /// Index a document under an explicit id.
    pub fn add_with_id(
        &self,
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) {
        self.add_item(Operation::upsert_with_id(collection, id, payload));
    }

    /// Create a document, rejected by the backend if the id exists.
    pub fn add_create(
        &self,
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) {
        self.add_item(Operation::create(collection, id, payload));
    }

    /// Partially update a document. Bare objects are wrapped as `{"doc": ..}`.
    pub fn add_update(
        &self,
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) {
        self.add_item(Operation::update(collection, id, payload));
    }

    /// Delete a document.
    pub fn add_delete(&self, collection: impl Into<String>, id: impl Into<String>) {
        self.add_item(Operation::delete(collection, id));
    }

    /// Append a prepared operation.
    pub fn add_item(&self, operation: Operation) {
        let size = self.engine.pending.push(operation);
        self.engine.after_enqueue(size);
    }

    /// Index many documents into one collection with backend-assigned ids.
    pub fn add_batch<I, P>(&self, collection: &str, payloads: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<Payload>,
    {
        self.add_items(
            payloads
                .into_iter()
                .map(|payload| Operation::upsert(collection, payload)),
        );
    }

    /// Index many documents into one collection under explicit ids.
    pub fn add_batch_with_ids<I, K, P>(&self, collection: &str, documents: I)
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<Payload>,
    {
        self.add_items(
            documents
                .into_iter()
                .map(|(id, payload)| Operation::upsert_with_id(collection, id, payload)),
        );
    }

    /// Append prepared operations under a single lock acquisition.
    pub fn add_items<I>(&self, operations: I)
    where
        I: IntoIterator<Item = Operation>,
    {
        // Build outside the lock so the critical section is just the append.
        let operations: Vec<Operation> = operations.into_iter().collect();
        if operations.is_empty() {
            return;
        }
        let size = self.engine.pending.extend(operations);
        self.engine.after_enqueue(size);
    }

    /// Number of pending operations.
    #[must_use]
    pub fn size(&self) -> usize {
        self.engine.pending.len()
    }

    /// Drain and submit everything pending, blocking through retries.
    ///
    /// Per-item rejections are reported in the outcome, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::Transport`] if every submission attempt failed.
    /// The drained operations are handed to `on_error` and dropped.
    pub fn flush(&self) -> Result<FlushOutcome, BulkError> {
        self.engine.flush()
    }

    /// Discard every pending operation without sending it.
    pub fn clear(&self) {
        let dropped = self.engine.pending.clear();
        debug!(dropped, "cleared pending operations");
    }

    /// The normalized configuration in use.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.engine.config
    }

    /// Cumulative counters since creation.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.engine.stats.snapshot()
    }

    /// Start periodic flushing every `flush_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::AlreadyRunning`] if started twice,
    /// [`BulkError::Stopped`] after [`stop`](Self::stop), or
    /// [`BulkError::Io`] if the timer thread cannot be spawned.
    pub fn start(&self) -> Result<(), BulkError> {
        let mut scheduler = self.scheduler.lock();
        scheduler.start(&self.engine)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the scheduler, wait for background flushes, and flush whatever
    /// is still pending.
    ///
    /// The queue is terminal afterwards: no more automatic flushing, and
    /// `start()` fails. [`flush`](Self::flush) still works.
    ///
    /// # Errors
    ///
    /// Returns the final flush's transport error, if any.
    pub fn stop(&self) -> Result<FlushOutcome, BulkError> {
        let mut scheduler = self.scheduler.lock();
        self.engine.terminate();
        scheduler.shutdown();
        self.engine.in_flight.close_and_wait();

        let result = self.engine.flush();
        self.running.store(false, Ordering::SeqCst);
        debug!("bulk queue stopped");
        result
    }

    /// Whether the scheduler is active. False again once `stop()` returns.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for BulkQueue {
    fn drop(&mut self) {
        let scheduler = self.scheduler.get_mut();
        if scheduler.is_active() {
            self.engine.terminate();
            scheduler.shutdown();
            if !self.engine.pending.is_empty() {
                warn!(
                    pending = self.engine.pending.len(),
                    "bulk queue dropped without stop(); pending operations lost"
                );
            }
        }
    }
}

impl std::fmt::Debug for BulkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkQueue")
            .field("pending", &self.size())
            .field("running", &self.is_running())
            .field("config", &self.engine.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::transport::{ItemResult, TransportError};
    use crate::queue::OperationKind;
    use serde_json::json;
    use std::collections::HashMap;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Accepts every item and records what was submitted.
    #[derive(Default)]
    struct RecordingTransport {
        bodies: Mutex<Vec<Vec<u8>>>,
        delay: Duration,
    }

    impl RecordingTransport {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn submissions(&self) -> usize {
            self.bodies.lock().len()
        }
    }

    impl Transport for RecordingTransport {
        fn submit(&self, payload: &[u8]) -> Result<Vec<ItemResult>, TransportError> {
            thread::sleep(self.delay);
            let items = payload
                .split(|b| *b == b'\n')
                .filter(|line| !line.is_empty())
                .filter(|line| {
                    serde_json::from_slice::<serde_json::Value>(line)
                        .ok()
                        .and_then(|v| v.as_object().map(|o| o.len() == 1 && action_line(o)))
                        .unwrap_or(false)
                })
                .count();
            self.bodies.lock().push(payload.to_vec());
            Ok(vec![ItemResult::accepted(201); items])
        }
    }

    fn action_line(line: &serde_json::Map<String, serde_json::Value>) -> bool {
        line.keys()
            .any(|k| OperationKind::from_action(k).is_some())
            && line.values().all(|v| v.get("_index").is_some())
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

    fn recorder() -> (Arc<RecordingTransport>, Arc<dyn Transport>) {
        let transport = Arc::new(RecordingTransport::default());
        let shared: Arc<dyn Transport> = transport.clone();
        (transport, shared)
    }

    #[test]
    fn test_mutation_api_kinds() {
        let (transport, shared) = recorder();
        let queue = BulkQueue::with_transport(shared, QueueConfig::default());

        queue.add("a", json!({"n": 1}));
        queue.add_with_id("a", "2", json!({"n": 2}));
        queue.add_create("a", "3", json!({"n": 3}));
        queue.add_update("a", "4", json!({"n": 4}));
        queue.add_delete("a", "5");
        queue.add_item(Operation::upsert("b", json!({"n": 6})).with_routing("r"));
        queue.add_batch("c", vec![json!({"n": 7}), json!({"n": 8})]);
        queue.add_batch_with_ids("c", vec![("9", json!({"n": 9}))]);
        queue.add_items(vec![Operation::delete("d", "10")]);
        assert_eq!(queue.size(), 10);

        let outcome = queue.flush().unwrap();
        assert_eq!(outcome.success_count, 10);
        assert_eq!(outcome.per_collection["a"], 5);
        assert_eq!(outcome.per_collection["b"], 1);
        assert_eq!(outcome.per_collection["c"], 3);
        assert_eq!(outcome.per_collection["d"], 1);
        assert_eq!(queue.size(), 0);

        let body = String::from_utf8(transport.bodies.lock()[0].clone()).unwrap();
        assert!(body.contains(r#"{"create":{"_index":"a","_id":"3"}}"#));
        assert!(body.contains(r#"{"doc":{"n":4}}"#));
        assert!(body.contains(r#"{"delete":{"_index":"a","_id":"5"}}"#));
        assert!(body.contains(r#"{"index":{"_index":"b","routing":"r"}}"#));
    }

    #[test]
    fn test_clear_discards_without_submitting() {
        let (transport, shared) = recorder();
        let queue = BulkQueue::with_transport(shared, QueueConfig::default());
        queue.add_batch("a", (0..5).map(|i| json!({"n": i})));

        queue.clear();
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.flush().unwrap().total(), 0);
        assert_eq!(transport.submissions(), 0);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let (_transport, shared) = recorder();
        let queue = Arc::new(BulkQueue::with_transport(shared, QueueConfig::default()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.add_with_id("a", format!("{t}-{i}"), json!({"t": t}));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.size(), 800);
    }

    #[test]
    fn test_threshold_triggers_one_flush_per_breach() {
        let (transport, shared) = recorder();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        let config = QueueConfig::default()
            .flush_threshold(5)
            .on_success(move |_, per_collection: &HashMap<String, usize>| {
                sink.lock().push(per_collection.get("A").copied().unwrap_or(0));
            });
        let queue = BulkQueue::with_transport(shared, config);

        for round in 0..2 {
            for i in 0..5 {
                queue.add_with_id("A", format!("{round}-{i}"), json!({"i": i}));
            }
            assert!(wait_until(Duration::from_secs(5), || counts.lock().len()
                == round + 1));
        }

        assert_eq!(*counts.lock(), vec![5, 5]);
        assert_eq!(transport.submissions(), 2);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_threshold_batch_append_triggers_once() {
        let (transport, shared) = recorder();
        let queue = BulkQueue::with_transport(shared, QueueConfig::default().flush_threshold(3));

        queue.add_batch("a", (0..10).map(|i| json!({"i": i})));

        assert!(wait_until(Duration::from_secs(5), || queue.size() == 0
            && transport.submissions() == 1));
        assert_eq!(queue.stats().succeeded, 10);
    }

    #[test]
    fn test_threshold_under_concurrent_producers_drains_queue() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(10)));
        let shared: Arc<dyn Transport> = transport.clone();
        let queue = Arc::new(BulkQueue::with_transport(
            shared,
            QueueConfig::default().flush_threshold(10),
        ));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.add_with_id("a", format!("{t}-{i}"), json!({}));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Background flushes leave at most a sub-threshold remainder behind.
        assert!(wait_until(Duration::from_secs(5), || {
            let size = queue.size();
            size < 10 && queue.stats().succeeded + size as u64 == 200
        }));

        queue.flush().unwrap();
        assert_eq!(queue.stats().succeeded, 200);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_scheduler_flushes_on_interval() {
        let (transport, shared) = recorder();
        let queue = BulkQueue::with_transport(
            shared,
            QueueConfig::default().flush_interval(Duration::from_millis(20)),
        );
        queue.start().unwrap();
        assert!(queue.is_running());

        queue.add("a", json!({"n": 1}));
        assert!(wait_until(Duration::from_secs(5), || transport.submissions() == 1));
        assert_eq!(queue.size(), 0);

        queue.stop().unwrap();
        assert!(!queue.is_running());
    }

    #[test]
    fn test_stop_flushes_pending_items() {
        let (transport, shared) = recorder();
        let queue = BulkQueue::with_transport(
            shared,
            QueueConfig::default().flush_interval(Duration::from_secs(3600)),
        );
        queue.start().unwrap();
        queue.add_batch("a", (0..3).map(|i| json!({"n": i})));

        let outcome = queue.stop().unwrap();
        assert_eq!(outcome.success_count, 3);
        assert_eq!(transport.submissions(), 1);
        assert_eq!(queue.size(), 0);
        assert!(!queue.is_running());
    }

    #[test]
    fn test_stop_waits_for_in_flight_flush() {
        let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(100)));
        let shared: Arc<dyn Transport> = transport.clone();
        let queue = BulkQueue::with_transport(shared, QueueConfig::default().flush_threshold(2));

        queue.add_batch("a", vec![json!({}), json!({})]);
        assert!(wait_until(Duration::from_secs(5), || queue.size() == 0));
        queue.add("a", json!({}));

        let outcome = queue.stop().unwrap();
        assert_eq!(outcome.success_count, 1);
        assert_eq!(queue.stats().succeeded, 3);
        assert_eq!(transport.submissions(), 2);
    }

    #[test]
    fn test_start_errors() {
        let (_transport, shared) = recorder();
        let queue = BulkQueue::with_transport(shared, QueueConfig::default());

        queue.start().unwrap();
        assert!(matches!(queue.start(), Err(BulkError::AlreadyRunning)));

        queue.stop().unwrap();
        assert!(matches!(queue.start(), Err(BulkError::Stopped)));
        assert!(!queue.is_running());
    }

    #[test]
    fn test_no_threshold_flush_after_stop() {
        let (transport, shared) = recorder();
        let queue = BulkQueue::with_transport(shared, QueueConfig::default().flush_threshold(1));
        queue.stop().unwrap();

        queue.add("a", json!({}));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.size(), 1);
        assert_eq!(transport.submissions(), 0);

        assert_eq!(queue.flush().unwrap().success_count, 1);
    }

    #[test]
    fn test_config_is_normalized() {
        let (_transport, shared) = recorder();
        let queue = BulkQueue::with_transport(
            shared,
            QueueConfig::default()
                .flush_interval(Duration::ZERO)
                .retries(1, Duration::ZERO),
        );
        assert_eq!(queue.config().flush_interval, Duration::from_secs(10));
        assert_eq!(queue.config().retry_delay, Duration::from_secs(1));
    }
}
