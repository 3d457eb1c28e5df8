//! Runtime queue configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::settings::QueueSettings;
use crate::error::BulkError;
use crate::queue::{FlushOutcome, Operation};

/// Default time between periodic flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Default base delay for retry backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Called after a flush with at least one accepted item, with the accepted
/// count and per-collection counts.
pub type SuccessCallback = Arc<dyn Fn(usize, &HashMap<String, usize>) + Send + Sync>;

/// Called when a batch is dropped after exhausting retries, with every
/// drained item and the final error.
pub type ErrorCallback = Arc<dyn Fn(&[Operation], &BulkError) + Send + Sync>;

/// Called with the full outcome of every flush that reached the backend or
/// failed encoding, whichever path triggered it.
pub type FlushCallback = Arc<dyn Fn(&FlushOutcome) + Send + Sync>;

/// Configuration for a [`BulkQueue`](crate::queue::BulkQueue).
///
/// Callbacks run on whichever thread performed the flush: a caller of
/// `flush()`, the scheduler, or a threshold flush. They should return
/// quickly and must not call `stop()` on the same queue.
#[derive(Clone)]
pub struct QueueConfig {
    /// Time between periodic flushes.
    pub flush_interval: Duration,
    /// Pending count that triggers a background flush. 0 disables it.
    pub flush_threshold: usize,
    /// Retries after a failed submission. 0 disables retrying.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_delay: Duration,
    /// Success callback.
    pub on_success: Option<SuccessCallback>,
    /// Error callback.
    pub on_error: Option<ErrorCallback>,
    /// Outcome callback.
    pub on_flush: Option<FlushCallback>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_threshold: 0,
            max_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            on_success: None,
            on_error: None,
            on_flush: None,
        }
    }
}

impl std::fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConfig")
            .field("flush_interval", &self.flush_interval)
            .field("flush_threshold", &self.flush_threshold)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_flush", &self.on_flush.is_some())
            .finish()
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            flush_threshold: settings.flush_threshold,
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            on_success: None,
            on_error: None,
            on_flush: None,
        }
    }
}

impl QueueConfig {
    /// Set the periodic flush interval.
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the flush threshold.
    #[must_use]
    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Set the retry count and base delay.
    #[must_use]
    pub fn retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the success callback.
    #[must_use]
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &HashMap<String, usize>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Set the error callback.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[Operation], &BulkError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Set the outcome callback.
    #[must_use]
    pub fn on_flush<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FlushOutcome) + Send + Sync + 'static,
    {
        self.on_flush = Some(Arc::new(callback));
        self
    }

    /// Replace zero interval and delay with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = DEFAULT_RETRY_DELAY;
        }
        self
    }

    /// Backoff before retry number `attempt` (0-based): `retry_delay * 2^attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }
}
