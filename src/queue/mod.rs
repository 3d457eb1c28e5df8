//! Bulk indexing queue.
//!
//! Accumulates individual write operations and submits them as combined
//! bulk requests through a pluggable [`Transport`].
//!
//! Features:
//! - Thread-safe, non-blocking appends from any number of producers
//! - Threshold-triggered and periodic background flushes
//! - Whole-batch retry with exponential backoff
//! - Per-item success and failure accounting

mod bulk_queue;
pub mod encoder;
mod engine;
pub mod operation;
pub mod outcome;
pub mod pending;
mod scheduler;
pub mod transport;

pub use bulk_queue::BulkQueue;
pub use encoder::{encode, encode_batch, EncodeError, EncodedAction, EncodedBatch};
pub use operation::{Operation, OperationKind, Payload};
pub use outcome::{format_flush_outcome, FlushOutcome, ItemError, QueueStats};
pub use pending::PendingQueue;
pub use transport::{parse_bulk_response, ItemErrorDetail, ItemResult, Transport, TransportError};
