//! bulkq - a self-flushing bulk indexing queue
//!
//! This crate batches insert, upsert, partial-update, and delete operations
//! against a document store and submits them as combined bulk requests.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod queue;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use config::QueueConfig;
pub use error::BulkError;
pub use queue::{BulkQueue, FlushOutcome, Operation, OperationKind, Payload, Transport};
