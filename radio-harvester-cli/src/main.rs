use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use radio_harvester_core::config::{Config, LogLevel, LogSettings, ShutdownPolicy};
use radio_harvester_core::harvest::{HarvestSummary, Harvester};
use radio_harvester_core::logging::{LogManager, LogManagerBuilder};
use tracing::info;

/// Walk a paginated audio listing and download every track it links to.
#[derive(Debug, Parser)]
#[command(name = "radio-harvester", version, about)]
struct Cli {
    /// Config file; created with defaults when missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listing endpoint; page indexes are appended to it
    #[arg(long)]
    base_url: Option<String>,

    /// Directory the tracks are saved into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// JSON Lines file receiving one record per failed track
    #[arg(long)]
    error_log: Option<PathBuf>,

    /// Maximum number of downloads in flight
    #[arg(short, long)]
    workers: Option<usize>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Let the stop signal race queued tracks instead of draining them
    #[arg(long)]
    best_effort: bool,

    /// Process log level (error, warn, info, debug); overrides the config
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Only print warnings and errors to stdout
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(base_url) = self.base_url {
            config.source.base_url = base_url;
        }
        if let Some(output_dir) = self.output_dir {
            config.download.output_dir = output_dir;
        }
        if let Some(error_log) = self.error_log {
            config.error_log.path = Some(error_log);
        }
        if let Some(workers) = self.workers {
            config.download.workers = workers;
        }
        if self.insecure {
            config.download.accept_invalid_certs = true;
        }
        if self.best_effort {
            config.download.shutdown = ShutdownPolicy::BestEffort;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (log_level, quiet) = (cli.log_level, cli.quiet);
    let (mut config, config_path) =
        Config::load_or_default(cli.config.as_deref()).context("failed to load config")?;
    cli.apply(&mut config);

    let log_manager = initialize_logger(&config.logging, log_level, quiet)
        .context("failed to start logging")?;
    info!("using config {}", config_path.display());
    if let Some(dir) = log_manager.file_dir() {
        info!("process log at {} ({})", dir.display(), log_manager.level());
    }

    let harvester = Harvester::new(config)?;
    let summary = harvester.run().await?;
    print_summary(&summary, &harvester);
    Ok(())
}

fn initialize_logger(
    settings: &LogSettings,
    level: Option<LogLevel>,
    quiet: bool,
) -> std::io::Result<LogManager> {
    LogManagerBuilder::default()
        .with_settings(settings)
        .level_override(level)
        .quiet(quiet)
        .build()
}

fn print_summary(summary: &HarvestSummary, harvester: &Harvester) {
    println!(
        "pages: {}  tracks: {}  dispatched: {}  saved: {}  failed: {}",
        summary.pages, summary.descriptors, summary.dispatched, summary.saved, summary.errors
    );
    if summary.dropped > 0 {
        println!("not dispatched before stop: {}", summary.dropped);
    }
    if let Some(index) = summary.failed_page {
        println!("listing ended early: page {index} could not be fetched");
    }
    match summary.log_written {
        Some(_) => println!("error log: {}", harvester.error_log_path().display()),
        None => println!("error log could not be written"),
    }
}
