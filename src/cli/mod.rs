//! Command-line interface for bulkq.

pub mod args;
pub mod commands;
pub mod input;
pub mod sink;
