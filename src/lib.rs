//! songdedupe - Near-duplicate audio track finder
//!
//! Groups a music library by normalized artist and title, compares acoustic
//! fingerprints only inside those groups, and keeps every track, tag and
//! fingerprint in a SQLite store so later runs (after deletions) redo no
//! fingerprint work.

pub mod actions;
pub mod cache;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;

use crate::actions::{purge, read_deletion_list, reconcile, DeleteConfig};
use crate::cache::TrackStore;
use crate::cli::{AnalysisArgs, Cli, Commands, OutputFormat};
use crate::config::Config;
use crate::duplicates::{DedupeFinder, DedupeReport, FinderConfig};
use crate::error::ExitCode;
use crate::output::{CandidateList, CsvOutput, JsonOutput, TextOutput};
use crate::progress::Progress;

/// Run the application for parsed CLI arguments.
///
/// # Errors
///
/// Any error that ends the run: bad configuration, a corrupt store, an
/// unreadable deletion list, an invalid root or an interrupt
/// ([`duplicates::FinderError::Interrupted`]).
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.merge_cli(&cli);

    match cli.command {
        Commands::Scan(ref args) => {
            config.merge_scan_args(args);
            let store = open_store(&config)?;
            let finder = build_finder(&config, store, &args.analysis, cli.quiet)?;
            let report = finder.run(&args.root)?;
            emit_report(&report, &args.analysis, cli.no_color)
        }
        Commands::Report(ref args) => {
            config.merge_analysis_args(&args.analysis);
            let store = open_store(&config)?;
            let finder = build_finder(&config, store, &args.analysis, cli.quiet)?;
            let report = finder.analyze(None)?;
            emit_report(&report, &args.analysis, cli.no_color)
        }
        Commands::Reconcile(ref args) => {
            let store = open_store(&config)?;
            let deleted = read_deletion_list(&args.deletions)?;
            let report = reconcile(&store, &deleted)?;
            if !cli.quiet {
                println!(
                    "Removed {} records; {} paths were not tracked; {} stale records pruned",
                    report.removed,
                    report.unknown_paths.len(),
                    report.pruned_detached
                );
            }
            Ok(ExitCode::Success)
        }
        Commands::Purge(ref args) => {
            let store = open_store(&config)?;
            let list = CandidateList::load(&args.candidates)?;
            let delete_config = DeleteConfig::default()
                .with_permanent(args.permanent)
                .with_dry_run(args.dry_run);
            let report = purge(&store, &list, &delete_config)?;

            if args.dry_run {
                for path in &report.planned {
                    println!("{}", path.display());
                }
            } else if !cli.quiet {
                println!("{}", report.summary());
                for (path, err) in &report.failures {
                    eprintln!("  failed: {}: {}", path.display(), err);
                }
                for group in &report.skipped_groups {
                    eprintln!("  skipped {}: {}", group.label, group.reason);
                }
            }
            Ok(if report.all_succeeded() {
                ExitCode::Success
            } else {
                ExitCode::PartialSuccess
            })
        }
        Commands::Stats => {
            let store = open_store(&config)?;
            let stats = store.stats()?;
            println!("Store:         {}", store.location());
            println!("Tracks:        {}", stats.records);
            println!("Fingerprinted: {}", stats.fingerprinted);
            println!("Detached:      {}", stats.detached);
            Ok(ExitCode::Success)
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<TrackStore>> {
    let path = config.store_path()?;
    log::debug!("Opening fingerprint store {}", path.display());
    let store = TrackStore::open(&path).with_context(|| {
        format!(
            "Cannot use fingerprint store {}; delete it and rescan to rebuild",
            path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn build_finder(
    config: &Config,
    store: Arc<TrackStore>,
    args: &AnalysisArgs,
    quiet: bool,
) -> Result<DedupeFinder> {
    let handler = signal::install_handler().context("Failed to install Ctrl+C handler")?;

    let mut finder_config = FinderConfig::default()
        .with_io_threads(config.io_threads)
        .with_walker_config(config.walker_config())
        .with_thresholds(config.thresholds()?)
        .with_fingerprinter(config.fingerprinter())
        .with_shutdown_flag(handler.get_flag());
    if !quiet && !args.no_progress {
        finder_config = finder_config.with_progress_callback(Arc::new(Progress::new(false)));
    }

    log::debug!("Finder configuration: {:?}", finder_config);
    Ok(DedupeFinder::new(store, finder_config))
}

fn emit_report(report: &DedupeReport, args: &AnalysisArgs, no_color: bool) -> Result<ExitCode> {
    let exit_code = ExitCode::for_report(report);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.output {
        OutputFormat::Text => TextOutput::new(report)
            .with_color(!no_color)
            .write_to(&mut out)?,
        OutputFormat::Json => JsonOutput::new(report, exit_code).write_to(&mut out, true)?,
        OutputFormat::Csv => CsvOutput::new(report).write_to(&mut out)?,
    }
    out.flush()?;

    if let Some(ref path) = args.candidates {
        write_candidates(report, path)?;
    }
    Ok(exit_code)
}

fn write_candidates(report: &DedupeReport, path: &Path) -> Result<()> {
    let list = CandidateList::from_report(report);
    list.save(path)?;
    log::info!(
        "{} deletion candidates ({}) written to {}",
        list.len(),
        ByteSize(list.reclaimable_bytes()),
        path.display()
    );
    Ok(())
}
