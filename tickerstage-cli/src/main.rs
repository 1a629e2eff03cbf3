//! Tickerstage CLI - download, status, and verify commands.
//!
//! Commands:
//! - `download <source>`: fetch, validate and stage prices, filings or news (resumes by default)
//! - `status <source>`: report manifest counts and failed items
//! - `verify <source>`: re-hash every completed artifact against its recorded checksum

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tickerstage_core::checksum::Integrity;
use tickerstage_core::pipeline::{run_source, RunOptions};
use tickerstage_core::universe::{parse_ticker_list, Universe};
use tickerstage_core::{
    verify_item, BatchSummary, IngestConfig, ItemIntegrity, LogProgress, ProgressTracker, Source,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tickerstage",
    about = "Tickerstage - resumable, validated market data ingestion"
)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one source, or all of them, for a ticker list.
    Download {
        #[arg(value_enum)]
        source: SourceArg,

        /// Comma- or space-separated tickers (e.g. "AAPL,MSFT").
        #[arg(long)]
        tickers: Option<String>,

        /// Sector universe TOML; used when --tickers is absent.
        #[arg(long)]
        universe: Option<PathBuf>,

        /// Ingestion config TOML. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Discard the manifest and start every ticker from scratch.
        #[arg(long, default_value_t = false)]
        fresh: bool,

        /// Worker threads.
        #[arg(long, default_value_t = 1)]
        jobs: usize,

        /// Staging directory; overrides the config file.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Report manifest counts and failed items for a source.
    Status {
        #[arg(value_enum)]
        source: SourceArg,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Re-hash completed artifacts and report mismatches.
    Verify {
        #[arg(value_enum)]
        source: SourceArg,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Prices,
    Filings,
    News,
    All,
}

impl SourceArg {
    fn sources(self) -> Vec<Source> {
        match self {
            SourceArg::Prices => vec![Source::Prices],
            SourceArg::Filings => vec![Source::Filings],
            SourceArg::News => vec![Source::News],
            SourceArg::All => Source::ALL.to_vec(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ok = match cli.command {
        Commands::Download {
            source,
            tickers,
            universe,
            config,
            fresh,
            jobs,
            output_dir,
        } => {
            let config = load_config(config.as_deref(), output_dir)?;
            let tickers = select_tickers(tickers.as_deref(), universe.as_deref(), &config)?;
            let options = RunOptions { fresh, jobs };
            run_download(&config, source.sources(), &tickers, &options)?
        }
        Commands::Status {
            source,
            config,
            output_dir,
        } => {
            let config = load_config(config.as_deref(), output_dir)?;
            run_status(&config, source.sources())?
        }
        Commands::Verify {
            source,
            config,
            output_dir,
        } => {
            let config = load_config(config.as_deref(), output_dir)?;
            run_verify(&config, source.sources())?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "tickerstage=debug,tickerstage_core=debug"
    } else {
        "tickerstage=info,tickerstage_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>, output_dir: Option<PathBuf>) -> Result<IngestConfig> {
    let mut config = match path {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IngestConfig::default(),
    };
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    Ok(config)
}

/// Explicit list, then universe file, then config `tickers`, then the built-in universe.
fn select_tickers(
    explicit: Option<&str>,
    universe: Option<&Path>,
    config: &IngestConfig,
) -> Result<Vec<String>> {
    let tickers = if let Some(raw) = explicit {
        let (tickers, rejected) = parse_ticker_list(raw);
        for entry in &rejected {
            tracing::warn!(entry = %entry, "ignoring invalid ticker");
        }
        tickers
    } else if let Some(path) = universe {
        Universe::from_file(path)
            .with_context(|| format!("loading universe {}", path.display()))?
            .all_tickers()
    } else if !config.tickers.is_empty() {
        tickers_from_config(config)
    } else {
        Universe::default_us().all_tickers()
    };

    if tickers.is_empty() {
        bail!("no valid tickers to download");
    }
    Ok(tickers)
}

fn tickers_from_config(config: &IngestConfig) -> Vec<String> {
    parse_ticker_list(&config.tickers.join(",")).0
}

fn run_download(
    config: &IngestConfig,
    sources: Vec<Source>,
    tickers: &[String],
    options: &RunOptions,
) -> Result<bool> {
    let mut summaries: Vec<BatchSummary> = Vec::new();
    for source in sources {
        let summary = run_source(source, config, tickers, options, &LogProgress)
            .with_context(|| format!("{source} run aborted"))?;
        summaries.push(summary);
    }

    println!();
    println!(
        "{:<8} {:>6} {:>9} {:>7} {:>8}",
        "Source", "Total", "Succeeded", "Failed", "Skipped"
    );
    println!("{}", "-".repeat(42));
    for s in &summaries {
        println!(
            "{:<8} {:>6} {:>9} {:>7} {:>8}",
            s.source.name(),
            s.total,
            s.succeeded,
            s.failed.len(),
            s.skipped.len()
        );
    }

    if summaries.iter().all(BatchSummary::all_succeeded) {
        return Ok(true);
    }

    eprintln!();
    let mut any_failed = false;
    for s in &summaries {
        for (id, err) in &s.failed {
            any_failed = true;
            eprintln!("Error for {}/{id}: {err}", s.source);
        }
        for (id, err) in &s.skipped {
            eprintln!("Skipped {}/{id} (retry budget spent): {err}", s.source);
        }
    }
    eprintln!();
    if any_failed {
        eprintln!("Re-run the same command to resume; completed items will not be downloaded again.");
    }
    if summaries.iter().any(|s| !s.skipped.is_empty()) {
        eprintln!("Skipped items are retried only with --fresh or a higher resume.max_retries.");
    }
    Ok(false)
}

fn run_status(config: &IngestConfig, sources: Vec<Source>) -> Result<bool> {
    for source in sources {
        let path = source.manifest_path(&config.output_dir);
        if !path.exists() {
            println!("{source}: no manifest at {}", path.display());
            continue;
        }
        let tracker = ProgressTracker::open(&path)?;
        let s = tracker.summary();
        println!();
        println!("=== {source} ===");
        println!("Manifest:        {}", path.display());
        println!("Total:           {}", s.total);
        println!("Completed:       {}", s.completed);
        println!("Failed:          {}", s.failed);
        println!("Pending:         {}", s.pending);
        println!("In progress:     {}", s.in_progress);
        println!("Skipped:         {}", s.skipped);
        println!("Completion rate: {:.1}%", s.completion_rate);

        let failed = tracker.failed();
        if !failed.is_empty() {
            println!();
            println!("--- Failed ---");
            for id in failed {
                let item = tracker.item(&id);
                let (runs, attempts) = item.as_ref().map_or((0, 0), |i| (i.runs, i.attempts));
                let error = item.and_then(|i| i.error_message).unwrap_or_default();
                println!("{id:<8} ({runs} runs, {attempts} attempts) {error}");
            }
        }

        let skipped = tracker.skipped();
        if !skipped.is_empty() {
            println!();
            println!("--- Skipped (retry budget spent) ---");
            for id in skipped {
                let error = tracker
                    .item(&id)
                    .and_then(|i| i.error_message)
                    .unwrap_or_default();
                println!("{id:<8} {error}");
            }
        }
    }
    Ok(true)
}

fn run_verify(config: &IngestConfig, sources: Vec<Source>) -> Result<bool> {
    let mut bad = 0usize;
    for source in sources {
        let path = source.manifest_path(&config.output_dir);
        if !path.exists() {
            println!("{source}: no manifest at {}", path.display());
            continue;
        }
        let tracker = ProgressTracker::open(&path)?;
        let mut checked = 0usize;
        for id in tracker.completed() {
            match verify_item(&tracker, &id)? {
                ItemIntegrity::NotCompleted | ItemIntegrity::Checked(Integrity::Intact) => {}
                ItemIntegrity::Checked(Integrity::Missing) => {
                    bad += 1;
                    println!("MISSING   {source}/{id}");
                }
                ItemIntegrity::Checked(Integrity::Mismatch { expected, actual }) => {
                    bad += 1;
                    println!("MISMATCH  {source}/{id}: expected {expected}, got {actual}");
                }
            }
            checked += 1;
        }
        println!("{source}: verified {checked} completed item(s)");
    }

    if bad > 0 {
        eprintln!("{bad} artifact(s) failed verification");
        return Ok(false);
    }
    Ok(true)
}
