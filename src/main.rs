mod config;
mod delivery;
mod error;
mod filter;
mod identity;
mod mail;
mod message;
mod policy;
mod staging;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::fs::OpenOptions;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use crate::config::Config;
use crate::error::{FilterError, EX_CONFIG};
use crate::filter::{Filter, FilterReport};
use crate::staging::StagingStore;

/// Postfix content filter that diverts non-production mail to QA recipients.
///
/// master.cf: `argv=/usr/local/bin/divertfilter -- ${sender} ${recipient}`
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file
    #[arg(long, env = "DIVERTFILTER_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overrides RUST_LOG
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Envelope sender (empty for bounces)
    sender: String,

    /// Envelope recipients
    #[arg(required = true)]
    recipients: Vec<String>,
}

fn setup_logging(level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    if let Some(level) = level {
        builder.parse_filters(level);
    }

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialise logger")?;
    Ok(())
}

fn run(args: &Args, config: &Config) -> Result<FilterReport, FilterError> {
    let store = StagingStore::open(&config.staging_dir)?;

    let mut raw = Vec::new();
    io::stdin()
        .read_to_end(&mut raw)
        .map_err(|e| FilterError::io("reading email from stdin", e))?;
    info!("[main] read email from stdin ({} bytes)", raw.len());

    let recipients = policy::normalize_recipients(&args.recipients);
    let filter = Filter::new(
        store,
        config.policy_settings(),
        config.delivery.agent(),
        config.keep_snapshots,
    );
    filter.run(&raw, &args.sender, recipients)
}

fn main() {
    let args = Args::parse();

    let config = match config::load_config(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("divertfilter: {}", e);
            process::exit(e.exit_code());
        }
    };

    if let Err(e) = setup_logging(args.log_level.as_deref(), config.log_file.as_deref()) {
        eprintln!("divertfilter: {:#}", e);
        process::exit(EX_CONFIG);
    }

    info!(
        "[main] divertfilter starting, staging_dir={}, default_env={}",
        config.staging_dir.display(),
        config.default_env
    );

    match run(&args, &config) {
        Ok(report) => {
            info!(
                "[main] {}: done, env={}, changed={}, delivered to {}",
                report.id,
                report.class,
                report.changed,
                report.recipients.join(" ")
            );
        }
        Err(e) => {
            error!("[main] {}", e);
            process::exit(e.exit_code());
        }
    }
}
