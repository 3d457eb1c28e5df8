use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use bulkq::cli::args::{Cli, Commands};
use bulkq::cli::commands::{self, apply_overrides};
use bulkq::cli::sink::WriterTransport;
use bulkq::config::{ColorSetting, Config};
use bulkq::Transport;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        },
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    match config.general.color {
        ColorSetting::Always => colored::control::set_override(true),
        ColorSetting::Never => colored::control::set_override(false),
        ColorSetting::Auto => {},
    }
    let format = cli.output.unwrap_or(config.general.default_output);

    let output = match cli.command {
        Commands::Run(args) => {
            let settings = apply_overrides(&config.queue, &args);
            let to_stdout = args.out.is_none();
            let transport: Arc<dyn Transport> = match &args.out {
                Some(path) => Arc::new(
                    WriterTransport::file(path)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Arc::new(WriterTransport::stdout()),
            };

            let reader = open_input(args.input.as_deref())?;
            let summary = commands::run(reader, &settings, transport, format)?;

            // Bulk bodies own stdout when no output file was given.
            if to_stdout {
                eprintln!("{summary}");
                String::new()
            } else {
                summary
            }
        },
        Commands::Encode { input } => commands::encode(open_input(input.as_deref())?)?,
        Commands::Config { init: true } => commands::init_config(&config, cli.config.as_deref())?,
        Commands::Config { init: false } => commands::show_config(&config, format)?,
        Commands::Completions { shell } => commands::completions(shell)?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
