//! Command-line interface of the `review-ingest` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "review-ingest")]
#[command(author, version, about = "Ingest hotel review exports into Postgres", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the CLI reference as Markdown and exit
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process every export file under a prefix
    Run(RunArgs),

    /// List the export files a run would consider
    List(SourceArgs),

    /// Show the ledger entry for one file
    Status {
        /// Full file path, e.g. s3://bucket/2025/04/agoda.jsonl
        path: String,
    },

    /// Apply database migrations
    Migrate,
}

/// Where to look for export files.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Key prefix to list (defaults to S3_PREFIX)
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Read files from this directory instead of S3
    #[arg(long, value_name = "DIR")]
    pub local_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Files processed at the same time (defaults to INGEST_CONCURRENCY)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Write into an in-memory store instead of the database
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub summary_json: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "review-ingest",
            "run",
            "--prefix",
            "2025/04/",
            "--concurrency",
            "2",
            "--dry-run",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.source.prefix.as_deref(), Some("2025/04/"));
        assert_eq!(args.concurrency, Some(2));
        assert!(args.dry_run);
        assert!(!args.summary_json);
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["review-ingest", "status", "s3://bucket/a.jsonl"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Status { ref path }) if path == "s3://bucket/a.jsonl"
        ));
    }
}
