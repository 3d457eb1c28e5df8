use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "bulkq")]
#[command(about = "Batch document writes into bulk requests")]
#[command(long_about = "bulkq - a self-flushing bulk indexing queue

Reads write operations as newline-delimited JSON, batches them through the
bulk queue, and writes the resulting bulk request bodies.

INPUT FORMAT (one operation per line):
  {\"op\": \"index\",  \"collection\": \"users\", \"id\": \"1\", \"doc\": {\"name\": \"Ada\"}}
  {\"op\": \"create\", \"collection\": \"users\", \"id\": \"2\", \"doc\": {...}}
  {\"op\": \"update\", \"collection\": \"users\", \"id\": \"1\", \"doc\": {\"age\": 36}}
  {\"op\": \"delete\", \"collection\": \"users\", \"id\": \"3\", \"routing\": \"eu\"}

QUICK START:
  bulkq encode ops.ndjson             Print the bulk body for the input
  bulkq run ops.ndjson -o out.ndjson  Queue, batch, and write bulk bodies
  bulkq run --threshold 500 < ops     Flush every 500 operations

Settings are read from ~/.bulkq/config.yaml unless --config is given.")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Defaults to the `general.default_output` setting.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Path to the configuration file
    #[arg(long, global = true, env = "BULKQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue operations and write batched bulk bodies
    ///
    /// Every operation is enqueued into a bulk queue. Each flush writes one
    /// bulk body to the output and counts every item as accepted. The queue
    /// is stopped at the end of input, flushing whatever remains.
    ///
    /// # Examples
    ///
    ///   bulkq run ops.ndjson -o bodies.ndjson
    ///   cat ops.ndjson | bulkq run --threshold 1000
    Run(RunArgs),

    /// Print the bulk body for the input without queueing
    ///
    /// Operations that cannot be encoded are reported on stderr and left out.
    Encode {
        /// Input file (stdin if omitted or "-")
        input: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },

    /// Generate shell completions
    ///
    ///   bulkq completions zsh > ~/.zsh/completions/_bulkq
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments for `bulkq run`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Input file (stdin if omitted or "-")
    pub input: Option<PathBuf>,

    /// Write bulk bodies here instead of stdout
    #[arg(short = 'O', long = "out")]
    pub out: Option<PathBuf>,

    /// Flush whenever this many operations are pending (0 disables)
    #[arg(long)]
    pub threshold: Option<usize>,

    /// Milliseconds between periodic flushes
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Retries after a failed submission
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base retry delay in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,
}
