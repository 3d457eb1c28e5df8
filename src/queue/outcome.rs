//! Flush outcomes and cumulative queue statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use super::operation::OperationKind;

/// Error type recorded for items that never reached the backend.
pub const ENCODING_ERROR_TYPE: &str = "encoding_error";

/// A single rejected or unencodable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    /// Position of the item in the drained batch.
    pub batch_index: usize,
    /// Operation kind.
    pub kind: OperationKind,
    /// Target collection.
    pub collection: String,
    /// Document id, if the operation had one.
    pub document_id: Option<String>,
    /// Item status code, absent for encoding failures.
    pub status: Option<u16>,
    /// Error type.
    pub error_type: String,
    /// Error reason.
    pub reason: String,
    /// Root-cause type, when reported.
    pub cause_type: Option<String>,
    /// Root-cause reason, when reported.
    pub cause_reason: Option<String>,
}

/// Result of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    /// Number of accepted items.
    pub success_count: usize,
    /// Number of rejected or unencodable items.
    pub failed_count: usize,
    /// Accepted items per target collection.
    pub per_collection: HashMap<String, usize>,
    /// Details for every failed item, in batch order.
    pub item_errors: Vec<ItemError>,
    /// When the flush finished. `None` for an empty flush.
    pub flushed_at: Option<DateTime<Utc>>,
}

impl FlushOutcome {
    /// An outcome for a flush that found nothing to send.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total items accounted for.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.success_count + self.failed_count
    }

    /// Whether every item was accepted.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed_count == 0
    }

    /// Record an accepted item.
    pub fn record_success(&mut self, collection: &str) {
        self.success_count += 1;
        *self.per_collection.entry(collection.to_string()).or_insert(0) += 1;
    }

    /// Record a failed item.
    pub fn record_failure(&mut self, error: ItemError) {
        self.failed_count += 1;
        self.item_errors.push(error);
    }

    /// Fold another outcome into this one.
    pub fn merge(&mut self, other: Self) {
        self.success_count += other.success_count;
        self.failed_count += other.failed_count;
        for (collection, count) in other.per_collection {
            *self.per_collection.entry(collection).or_insert(0) += count;
        }
        self.item_errors.extend(other.item_errors);
        self.flushed_at = self.flushed_at.max(other.flushed_at);
    }
}

/// Snapshot of cumulative queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Non-empty flushes attempted.
    pub flushes: u64,
    /// Items handed to the transport.
    pub submitted: u64,
    /// Items accepted by the backend.
    pub succeeded: u64,
    /// Items rejected by the backend or not encodable.
    pub failed: u64,
    /// Failed submission attempts, retries included.
    pub transport_failures: u64,
    /// Submitted items dropped after retries were exhausted. Items that
    /// failed encoding in the same batch count as `failed` instead.
    pub dropped: u64,
}

/// Lock-free counters behind [`QueueStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    flushes: AtomicU64,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    transport_failures: AtomicU64,
    dropped: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn flush_started(&self, submitted: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.submitted.fetch_add(submitted as u64, Ordering::Relaxed);
    }

    pub(crate) fn transport_failed(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: &FlushOutcome) {
        self.succeeded
            .fetch_add(outcome.success_count as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(outcome.failed_count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Format a flush outcome for display.
#[must_use]
pub fn format_flush_outcome(outcome: &FlushOutcome) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Flushed {} operations", outcome.total()));
    lines.push("─".repeat(40));

    if outcome.success_count > 0 {
        lines.push(format!(
            "  {} {}",
            "✓".green(),
            format!("{} succeeded", outcome.success_count).green()
        ));

        let mut collections: Vec<_> = outcome.per_collection.iter().collect();
        collections.sort();
        for (collection, count) in collections {
            lines.push(format!("      {collection}: {count}"));
        }
    }

    if outcome.failed_count > 0 {
        lines.push(format!(
            "  {} {}",
            "✗".red(),
            format!("{} failed", outcome.failed_count).red()
        ));
    }

    if !outcome.item_errors.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        for err in outcome.item_errors.iter().take(3) {
            let status = err
                .status
                .map_or_else(|| "-".to_string(), |s| s.to_string());
            lines.push(format!(
                "  - #{} {} {}/{} [{status}] {}: {}",
                err.batch_index,
                err.kind,
                err.collection,
                err.document_id.as_deref().unwrap_or("_"),
                err.error_type,
                err.reason
            ));
        }
        if outcome.item_errors.len() > 3 {
            lines.push(format!("  ... and {} more", outcome.item_errors.len() - 3));
        }
    }

    lines.join("\n")
}
