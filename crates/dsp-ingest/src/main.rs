//! DSP Ingest - catalog record to statement ingestion

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dsp_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use dsp_ingest::config::IngestConfig;
use dsp_ingest::coordinator::{
    Coordinator, DashboardObserver, LogObserver, PoolConfig, ProcessLauncher, ProgressObserver,
};
use dsp_ingest::progress::CountingSink;
use dsp_ingest::runner::IngestRunner;
use dsp_ingest::source::{NdjsonSource, RecordSource};
use dsp_ingest::worker::run_worker;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dsp-ingest")]
#[command(author, version, about = "Catalog record ingestion into the statement store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process an offset range of the configured source
    Run(RunArgs),

    /// Worker process entry point, spawned by `run --threads`
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        seek: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// First offset to process
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Number of offsets to process
    #[arg(long, conflicts_with = "until")]
    limit: Option<u64>,

    /// Only process the record with this id
    #[arg(long)]
    seek: Option<String>,

    /// Last offset to process (inclusive)
    #[arg(long)]
    until: Option<u64>,

    /// Run a worker pool of this many processes
    #[arg(long)]
    threads: Option<usize>,

    /// Log progress instead of showing the live dashboard
    #[arg(long)]
    disablescreen: bool,
}

impl RunArgs {
    fn limit(&self) -> Option<u64> {
        self.limit.or_else(|| {
            self.until
                .map(|until| until.saturating_sub(self.offset).saturating_add(1))
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let is_worker = matches!(cli.command, Command::Worker { .. });

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let defaults = LogConfig::builder()
        .level(level)
        .output(if is_worker {
            LogOutput::Stderr
        } else {
            LogOutput::Console
        })
        .log_file_prefix("dsp-ingest")
        .build();

    // Environment variables take precedence
    let mut log_config = defaults.clone().merge_env().unwrap_or(defaults);

    // Worker stdout belongs to the protocol
    if is_worker && log_config.output != LogOutput::File {
        log_config.output = LogOutput::Stderr;
    }

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = match cli.command {
        Command::Run(args) => run(args, cli.verbose).await,
        Command::Worker { seek } => worker(seek).await,
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}

async fn run(args: RunArgs, verbose: bool) -> Result<i32> {
    let config = IngestConfig::load().context("Failed to load configuration")?;
    let limit = args.limit();

    match args.threads {
        None => run_single(&config, &args, limit).await,
        Some(threads) => run_pool(&config, &args, limit, threads, verbose).await,
    }
}

async fn run_single(config: &IngestConfig, args: &RunArgs, limit: Option<u64>) -> Result<i32> {
    let runner = IngestRunner::from_config(config, args.seek.clone()).await?;
    let summary = runner
        .run(args.offset, limit, Arc::new(CountingSink::new()))
        .await;

    let limit_label = limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| "[unbounded]".to_string());
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        offset = args.offset,
        limit = %limit_label,
        "Done updating resources"
    );
    println!(
        "Done updating {} resources (from {}, limit {})",
        summary.processed, args.offset, limit_label
    );

    Ok(if summary.is_aborted() { 1 } else { 0 })
}

async fn run_pool(
    config: &IngestConfig,
    args: &RunArgs,
    limit: Option<u64>,
    threads: usize,
    verbose: bool,
) -> Result<i32> {
    let end = match limit {
        Some(limit) => args.offset.saturating_add(limit),
        None => {
            let path = config
                .source_path
                .as_deref()
                .context("No source path configured")?;
            NdjsonSource::new(path)
                .offsets()
                .await
                .context("Failed to read source offsets")?
                .max
        },
    };

    let mut launcher = ProcessLauncher::current_exe()?.quiet(!args.disablescreen);
    if let Some(ref seek) = args.seek {
        launcher = launcher.arg("--seek").arg(seek.as_str());
    }
    if verbose {
        launcher = launcher.arg("--verbose");
    }

    let observer: Arc<dyn ProgressObserver> = if args.disablescreen {
        Arc::new(LogObserver)
    } else {
        Arc::new(DashboardObserver::new())
    };
    let pool_config = PoolConfig {
        bot_count: threads,
        ..Default::default()
    };

    let summary = Coordinator::new(pool_config, Arc::new(launcher))
        .with_observer(observer)
        .run(args.offset, end)
        .await?;

    println!(
        "Done updating {} resources (from {}, limit {})",
        summary.processed,
        args.offset,
        end.saturating_sub(args.offset)
    );
    for report in summary.incomplete_chunks() {
        eprintln!(
            "Chunk {} [{}, {}) incomplete after {} resources",
            report.chunk.index,
            report.chunk.start,
            report.chunk.end(),
            report.processed
        );
    }

    Ok(if summary.is_complete() { 0 } else { 2 })
}

async fn worker(seek: Option<String>) -> Result<i32> {
    let config = IngestConfig::load().context("Failed to load configuration")?;
    let runner = IngestRunner::from_config(&config, seek).await?;
    let summary = run_worker(runner).await?;
    Ok(if summary.is_aborted() { 1 } else { 0 })
}
