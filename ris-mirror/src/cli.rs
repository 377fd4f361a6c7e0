///
/// This module implements the CLI surface of ris-mirror: command parsing, wiring of the
/// engine's collaborators and the async entrypoint shared by `main` and the tests.
///
/// All crawl, download and reconciliation logic lives in [`ris-mirror-core`]; this module
/// only decides which crawl to start and with which storage and fan-out.
///
/// ## Commands
/// - `sessions --since <date>`: full session sync from the long list
/// - `proposals --since <date>`: paginated proposal sync
/// - `last-n --count <n>`: refresh of the most recent sessions per committee
/// - `dispatch --message <json>`: process one queue message
///
/// Unless `--inline` (or `debug` in the config) is given, discovered children go through
/// the in-process work queue, which is drained before the command returns.
///
/// [`ris-mirror-core`]: ../../ris_mirror_core/
use crate::load_config::load_config;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use ris_mirror_core::config::MirrorConfig;
use ris_mirror_core::contract::{Fetcher, Storage};
use ris_mirror_core::dispatch::{DispatchOutcome, Dispatcher, FanOut, FanOutMode};
use ris_mirror_core::fetch::HttpFetcher;
use ris_mirror_core::queue::{QueueReport, WorkQueue};
use ris_mirror_core::storage::{FsStorage, MemoryStorage};
use ris_mirror_core::synchronise::{ProposalListCrawler, SessionListCrawler, SyncReport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// CLI for ris-mirror: mirror a council information portal into local storage.
#[derive(Parser)]
#[clap(
    name = "ris-mirror",
    version,
    about = "Incrementally mirror sessions, proposals and their documents from a council information portal"
)]
pub struct Cli {
    /// Refetch documents even when the stored copy is current
    #[clap(long, global = true)]
    pub redownload: bool,

    /// Process discovered children immediately, depth-first, instead of queueing them
    #[clap(long, global = true)]
    pub inline: bool,

    /// Keep everything in memory; nothing is written to the output directory
    #[clap(long, global = true)]
    pub dry_run: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronise every session created after the given date
    Sessions {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// First day to mirror (YYYY-MM-DD, portal timezone)
        #[clap(long)]
        since: NaiveDate,
    },
    /// Synchronise every proposal created after the given date
    Proposals {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// First day to mirror (YYYY-MM-DD, portal timezone)
        #[clap(long)]
        since: NaiveDate,
    },
    /// Refresh the most recent sessions of every committee
    LastN {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Sessions per committee
        #[clap(long)]
        count: usize,
    },
    /// Dispatch a single JSON queue message
    Dispatch {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// The message, as produced by the work queue
        #[clap(long)]
        message: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Sessions { .. } => "sessions",
            Commands::Proposals { .. } => "proposals",
            Commands::LastN { .. } => "last-n",
            Commands::Dispatch { .. } => "dispatch",
        }
    }

    fn config_path(&self) -> &PathBuf {
        match self {
            Commands::Sessions { config, .. }
            | Commands::Proposals { config, .. }
            | Commands::LastN { config, .. }
            | Commands::Dispatch { config, .. } => config,
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let command = cli.command.name();
    let loaded = load_config(cli.command.config_path())?;
    let mut config: MirrorConfig = loaded.mirror;
    config.redownload |= cli.redownload;
    config.debug |= cli.inline;
    let config = Arc::new(config);

    let storage: Arc<dyn Storage> = if cli.dry_run {
        tracing::info!(command, "Dry run, using in-memory storage");
        Arc::new(MemoryStorage::new())
    } else {
        tracing::info!(command, output_dir = ?loaded.output_dir, "Using filesystem storage");
        Arc::new(FsStorage::new(loaded.output_dir))
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.portal)?);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling; no stale resources will be deleted");
                cancel.cancel();
            }
        }
    });

    let queue = WorkQueue::new();
    let mode = if config.debug {
        FanOutMode::Inline
    } else {
        FanOutMode::Queue(Arc::new(queue.publisher()))
    };
    let dispatcher = Arc::new(Dispatcher::new(
        config.clone(),
        fetcher.clone(),
        storage.clone(),
        mode,
    ));
    let fan_out: Arc<dyn FanOut> = dispatcher.clone();

    tracing::info!(command, inline = config.debug, "Starting");
    match cli.command {
        Commands::Sessions { since, .. } => {
            let min_time = config.portal.local_midnight(since)?;
            let crawler = SessionListCrawler::new(config.clone(), fetcher, storage, fan_out);
            let report = crawler
                .synchronize_since(min_time, &cancel)
                .await
                .context("Session synchronisation failed")?;
            print_sync_report(command, &report);
        }
        Commands::Proposals { since, .. } => {
            let min_time = config.portal.local_midnight(since)?;
            let crawler = ProposalListCrawler::new(config.clone(), fetcher, storage, fan_out);
            let report = crawler
                .synchronize_since(min_time, &cancel)
                .await
                .context("Proposal synchronisation failed")?;
            print_sync_report(command, &report);
        }
        Commands::LastN { count, .. } => {
            let crawler = SessionListCrawler::new(config.clone(), fetcher, storage, fan_out);
            let report = crawler
                .download_last_n_per_committee(count, &cancel)
                .await
                .context("Last-N refresh failed")?;
            print_sync_report(command, &report);
        }
        Commands::Dispatch { message, .. } => {
            let outcome = dispatcher
                .dispatch_message(message.as_bytes(), &cancel)
                .await?;
            print_dispatch_outcome(&outcome);
        }
    }

    if !config.debug {
        let report = queue
            .run(dispatcher, config.workers, &cancel)
            .await
            .context("Work queue failed")?;
        print_queue_report(&report);
    }
    tracing::info!(command, "Finished");
    Ok(())
}

fn print_sync_report(command: &str, report: &SyncReport) {
    tracing::info!(command, ?report, "Crawl complete");
    println!(
        "{command}: {} index pages, {} kept, {} placeholders, {} fanned out, {} skipped committees, {} deleted",
        report.pages,
        report.kept,
        report.placeholders,
        report.fanned_out,
        report.skipped_committees,
        report.deleted.len()
    );
    for path in &report.deleted {
        println!("  deleted {path}");
    }
}

fn print_dispatch_outcome(outcome: &DispatchOutcome) {
    tracing::info!(?outcome, "Dispatch complete");
    match outcome {
        DispatchOutcome::Leaf(leaf) => println!("dispatch: leaf {leaf:?}"),
        DispatchOutcome::Container(report) => println!(
            "dispatch: {} ({} children, {} deleted, written: {})",
            report.path,
            report.children,
            report.deleted.len(),
            report.written
        ),
    }
}

fn print_queue_report(report: &QueueReport) {
    tracing::info!(?report, "Queue drained");
    println!(
        "queue: {} processed, {} failed",
        report.processed, report.failed
    );
}
