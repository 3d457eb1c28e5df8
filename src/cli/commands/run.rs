//! `bulkq run`: feed input operations through a bulk queue.

use std::io::BufRead;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use super::to_json;
use crate::cli::args::{OutputFormat, RunArgs};
use crate::cli::input::OperationReader;
use crate::config::{QueueConfig, QueueSettings};
use crate::error::BulkError;
use crate::queue::{format_flush_outcome, BulkQueue, FlushOutcome, QueueStats, Transport};

/// Aggregate result of a `run`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Operations read from the input.
    pub read: usize,
    /// Queue counters after shutdown.
    pub stats: QueueStats,
    /// Accepted, unencodable, and rejected items across all flushes.
    pub outcome: FlushOutcome,
}

/// Apply command-line overrides on top of file settings.
#[must_use]
pub fn apply_overrides(settings: &QueueSettings, args: &RunArgs) -> QueueSettings {
    QueueSettings {
        flush_interval_ms: args.interval_ms.unwrap_or(settings.flush_interval_ms),
        flush_threshold: args.threshold.unwrap_or(settings.flush_threshold),
        max_retries: args.max_retries.unwrap_or(settings.max_retries),
        retry_delay_ms: args.retry_delay_ms.unwrap_or(settings.retry_delay_ms),
    }
}

/// Stream operations into a bulk queue and stop it once input is exhausted.
///
/// Operations are enqueued as they are parsed, so the threshold and timer
/// shape the submitted batches. Operations read before an invalid line are
/// still flushed.
///
/// # Errors
///
/// Returns an error if the input is invalid or the final flush fails.
pub fn run<R: BufRead>(
    reader: R,
    settings: &QueueSettings,
    transport: Arc<dyn Transport>,
    format: OutputFormat,
) -> Result<String, BulkError> {
    let totals = Arc::new(Mutex::new(FlushOutcome::empty()));
    let sink = Arc::clone(&totals);
    let config = QueueConfig::from(settings)
        .on_flush(move |outcome| sink.lock().merge(outcome.clone()))
        .on_error(|items, err| {
            error!(count = items.len(), error = %err, "operations dropped");
        });

    let queue = BulkQueue::with_transport(transport, config);
    queue.start()?;

    let mut read = 0;
    let mut invalid = None;
    for operation in OperationReader::new(reader) {
        match operation {
            Ok(operation) => {
                queue.add_item(operation);
                read += 1;
            },
            Err(e) => {
                invalid = Some(e);
                break;
            },
        }
    }
    debug!(read, "input consumed");

    let stopped = queue.stop();
    if let Some(e) = invalid {
        return Err(e);
    }
    stopped?;

    let summary = RunSummary {
        read,
        stats: queue.stats(),
        outcome: std::mem::take(&mut *totals.lock()),
    };

    match format {
        OutputFormat::Json => to_json(&summary),
        OutputFormat::Pretty => Ok(format!(
            "Read {} operations in {} flush(es)\n{}",
            summary.read,
            summary.stats.flushes,
            format_flush_outcome(&summary.outcome)
        )),
    }
}
