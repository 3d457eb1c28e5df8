//! Command implementations for bulkq.

mod encode;
mod run;

pub use encode::encode;
pub use run::{apply_overrides, run, RunSummary};

use std::path::Path;

use clap::CommandFactory;
use clap_complete::Shell;
use serde::Serialize;

use crate::cli::args::{Cli, OutputFormat};
use crate::config::{Config, Paths};
use crate::error::BulkError;

/// Serialize a value as pretty JSON.
///
/// # Errors
///
/// Returns `BulkError::Json` if serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, BulkError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Show the effective configuration.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn show_config(config: &Config, format: OutputFormat) -> Result<String, BulkError> {
    match format {
        OutputFormat::Json => to_json(config),
        OutputFormat::Pretty => Ok(serde_yaml::to_string(config)?.trim_end().to_string()),
    }
}

/// Write the effective configuration to `path`, or to the default config
/// file when no path is given.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn init_config(config: &Config, path: Option<&Path>) -> Result<String, BulkError> {
    let target = match path {
        Some(path) => {
            config.save_to_path(path)?;
            path.to_path_buf()
        },
        None => {
            config.save()?;
            Paths::new()?.config_file
        },
    };
    Ok(format!("Wrote configuration to {}", target.display()))
}

/// Generate shell completions.
///
/// # Errors
///
/// Returns an error if the generated script is not valid UTF-8.
pub fn completions(shell: Shell) -> Result<String, BulkError> {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, "bulkq", &mut buf);
    String::from_utf8(buf).map_err(|e| BulkError::Parse(format!("UTF-8 error: {e}")))
}
