//! Command-line interface definitions for songdedupe.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! The CLI follows standard conventions with global options (verbosity, color, store
//! location) and subcommands for the different operations.
//!
//! # Example
//!
//! ```bash
//! # Scan a library, print the comparison matrices and duplicate groups
//! songdedupe scan ~/Music
//!
//! # Write a deletion candidate list for review
//! songdedupe scan ~/Music --candidates delete-me.txt
//!
//! # After deleting files by hand, drop them from the store
//! songdedupe reconcile delete-me.txt
//!
//! # Or let songdedupe move the candidates to the trash
//! songdedupe scan ~/Music --candidates candidates.json
//! songdedupe purge candidates.json
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Near-duplicate audio track finder.
///
/// songdedupe groups tracks by artist and title, compares acoustic
/// fingerprints only inside those groups, and keeps every fingerprint in a
/// local store so re-runs after deletions are cheap.
#[derive(Debug, Parser)]
#[command(name = "songdedupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print errors as a JSON object on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (TOML)
    ///
    /// Defaults to config.toml in the platform config directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Fingerprint store database
    ///
    /// Defaults to tracks.db in the platform data directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a library into the store and report duplicates
    Scan(ScanArgs),
    /// Report duplicates among everything already in the store
    Report(ReportArgs),
    /// Drop deleted files from the store
    Reconcile(ReconcileArgs),
    /// Delete the redundant files of a candidate list, then reconcile
    Purge(PurgeArgs),
    /// Show store statistics
    Stats,
}

/// Options shared by `scan` and `report`.
#[derive(Debug, Clone, Args)]
pub struct AnalysisArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Write deletion candidates to this file
    ///
    /// JSON when the name ends in .json (readable by `purge`), otherwise
    /// one path per line (readable by `reconcile`).
    #[arg(long, value_name = "FILE")]
    pub candidates: Option<PathBuf>,

    /// Score at or above which two tracks are the same recording
    #[arg(long, value_name = "SCORE")]
    pub identical_threshold: Option<f64>,

    /// Score at or above which two tracks are a near match
    #[arg(long, value_name = "SCORE")]
    pub near_threshold: Option<f64>,

    /// Number of I/O threads for hashing and fingerprinting (default: 4)
    ///
    /// Lower values reduce disk thrashing on HDDs.
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Seconds allowed for one fingerprint extraction
    #[arg(long, value_name = "SECS")]
    pub fingerprint_timeout: Option<u64>,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Library root to scan
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Glob patterns to ignore (can be specified multiple times)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Audio extensions to include (can be specified multiple times)
    #[arg(short = 'e', long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Follow symbolic links during scan
    ///
    /// Warning: May cause infinite loops if symlinks form cycles.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    #[command(flatten)]
    pub analysis: AnalysisArgs,
}

/// Arguments for the report subcommand.
#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub analysis: AnalysisArgs,
}

/// Arguments for the reconcile subcommand.
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// File listing deleted paths, one per line (# starts a comment)
    #[arg(value_name = "FILE")]
    pub deletions: PathBuf,
}

/// Arguments for the purge subcommand.
#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Candidate list written by `--candidates <FILE>.json`
    #[arg(value_name = "CANDIDATES_JSON")]
    pub candidates: PathBuf,

    /// Use permanent deletion instead of moving to trash
    ///
    /// Warning: Files cannot be recovered after permanent deletion.
    #[arg(long, requires = "yes")]
    pub permanent: bool,

    /// Confirm deletion (required with --permanent)
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Show what would be deleted without touching anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Matrices and groups for humans
    Text,
    /// JSON output for scripting
    Json,
    /// CSV output for spreadsheets
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_help() {
        let result = Cli::try_parse_from(["songdedupe", "--help"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_scan_basic() {
        let cli = Cli::try_parse_from(["songdedupe", "scan", "/music"]).unwrap();
        assert_eq!(cli.verbose, 0);
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.root, PathBuf::from("/music"));
                assert_eq!(args.analysis.output, OutputFormat::Text);
                assert!(args.analysis.identical_threshold.is_none());
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_parse_scan_with_options() {
        let cli = Cli::try_parse_from([
            "songdedupe",
            "-v",
            "--store",
            "/tmp/t.db",
            "scan",
            "/music",
            "--output",
            "json",
            "--identical-threshold",
            "0.9",
            "--near-threshold",
            "0.5",
            "--io-threads",
            "8",
            "--ignore",
            "Podcasts/",
            "--ext",
            "opus",
            "--candidates",
            "out.txt",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/t.db")));
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.analysis.output, OutputFormat::Json);
                assert_eq!(args.analysis.identical_threshold, Some(0.9));
                assert_eq!(args.analysis.near_threshold, Some(0.5));
                assert_eq!(args.analysis.io_threads, Some(8));
                assert_eq!(args.ignore_patterns, vec!["Podcasts/"]);
                assert_eq!(args.extensions, vec!["opus"]);
                assert_eq!(args.analysis.candidates, Some(PathBuf::from("out.txt")));
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["songdedupe", "-v", "-q", "scan", "/music"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_root() {
        assert!(Cli::try_parse_from(["songdedupe", "scan"]).is_err());
    }

    #[test]
    fn test_cli_parse_reconcile_and_stats() {
        let cli = Cli::try_parse_from(["songdedupe", "reconcile", "gone.txt"]).unwrap();
        match cli.command {
            Commands::Reconcile(args) => assert_eq!(args.deletions, PathBuf::from("gone.txt")),
            _ => panic!("Expected Reconcile command"),
        }
        let cli = Cli::try_parse_from(["songdedupe", "stats"]).unwrap();
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_cli_permanent_requires_yes() {
        assert!(Cli::try_parse_from(["songdedupe", "purge", "c.json", "--permanent"]).is_err());
        let cli =
            Cli::try_parse_from(["songdedupe", "purge", "c.json", "--permanent", "-y"]).unwrap();
        match cli.command {
            Commands::Purge(args) => {
                assert!(args.permanent);
                assert!(args.yes);
            }
            _ => panic!("Expected Purge command"),
        }
    }

    #[test]
    fn test_cli_report_json_errors() {
        let cli = Cli::try_parse_from(["songdedupe", "--json-errors", "report", "-o", "csv"])
            .unwrap();
        assert!(cli.json_errors);
        match cli.command {
            Commands::Report(args) => assert_eq!(args.analysis.output, OutputFormat::Csv),
            _ => panic!("Expected Report command"),
        }
    }
}
