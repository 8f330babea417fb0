//! review-ingest - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use review_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::{io::Write, process, sync::Arc};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use review_ingest::{
    cli::{Cli, Command, RunArgs, SourceArgs},
    config::Config,
    db,
    ingest::{
        EntityStore, FileLedger, FileProcessor, IngestOrchestrator, MemoryStore, PgStore,
        ProcessingConfig, RunSummary,
    },
    storage::{FileInfo, FileSource, LocalFileSource, S3FileSource},
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("review-ingest")
        .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    if let Err(e) = execute_command(command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(command: Command) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match command {
        Command::Run(args) => run(config, args).await,
        Command::List(args) => list(config, args).await,
        Command::Status { path } => status(config, &path).await,
        Command::Migrate => migrate(config).await,
    }
}

async fn run(config: Config, args: RunArgs) -> Result<()> {
    let (source, prefix) = open_source(&config, &args.source).await?;
    let files = source.list(&prefix).await?;
    let concurrency = args.concurrency.unwrap_or(config.concurrency);

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let summary = if args.dry_run {
        info!("Dry run, records go to an in-memory store");
        let store = Arc::new(MemoryStore::new());
        run_pipeline(store, config.processing, source, files, concurrency, cancel).await
    } else {
        let pool = db::create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;
        let store = Arc::new(PgStore::new(pool));
        run_pipeline(store, config.processing, source, files, concurrency, cancel).await
    };

    report(&summary, args.summary_json)?;

    match summary.first_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn run_pipeline<S>(
    store: Arc<S>,
    processing: ProcessingConfig,
    source: Arc<dyn FileSource>,
    files: Vec<FileInfo>,
    concurrency: usize,
    cancel: CancellationToken,
) -> RunSummary
where
    S: EntityStore + FileLedger,
{
    let processor = Arc::new(FileProcessor::new(store, processing));
    IngestOrchestrator::new(processor, source)
        .process_all(files, concurrency, cancel)
        .await
}

fn report(summary: &RunSummary, as_json: bool) -> Result<()> {
    let totals = summary.totals();
    let mut stdout = std::io::stdout().lock();

    if as_json {
        let body = serde_json::json!({
            "totals": totals,
            "files": &summary.results,
            "error": summary.first_error.as_ref().map(ToString::to_string),
        });
        serde_json::to_writer_pretty(&mut stdout, &body)?;
        writeln!(stdout)?;
        return Ok(());
    }

    let mut keys: Vec<_> = summary.results.keys().collect();
    keys.sort();
    for key in keys {
        let result = &summary.results[key];
        let status = match (result.skipped, result.status) {
            (true, _) => "Skipped".to_string(),
            (false, Some(status)) => status.to_string(),
            (false, None) => "-".to_string(),
        };
        writeln!(
            stdout,
            "{:<10} {:>8} records {:>6} errors  {}",
            status, result.total_records, result.error_records, key
        )?;
    }
    writeln!(
        stdout,
        "{} file(s), {} record(s), {} error(s)",
        totals.files, totals.records, totals.error_records
    )?;

    Ok(())
}

async fn list(config: Config, args: SourceArgs) -> Result<()> {
    let (source, prefix) = open_source(&config, &args).await?;
    let files = source.list(&prefix).await?;

    let mut stdout = std::io::stdout().lock();
    for file in &files {
        let modified = file
            .last_modified
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        writeln!(stdout, "{:>12}  {}  {}", file.size, modified, file.path)?;
    }

    Ok(())
}

async fn status(config: Config, path: &str) -> Result<()> {
    let pool = db::create_pool(&config.database).await?;
    let store = PgStore::new(pool);

    match store.find_entry(path).await? {
        Some(entry) => {
            println!(
                "{}: {} ({} records, {} errors, last run {})",
                entry.s3_path,
                entry.status,
                entry.records_count,
                entry.errors_count,
                entry.processed_at.to_rfc3339()
            );
            if entry.status.is_processed() {
                println!("Processed; later runs skip this file");
            } else {
                println!("Not processed; the next run picks this file up");
            }
        },
        None => println!("No ledger entry for {}; the next run picks this file up", path),
    }

    Ok(())
}

async fn migrate(config: Config) -> Result<()> {
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    info!("Database migrations completed");
    Ok(())
}

async fn open_source(config: &Config, args: &SourceArgs) -> Result<(Arc<dyn FileSource>, String)> {
    let prefix = args
        .prefix
        .clone()
        .unwrap_or_else(|| config.storage.prefix.clone());

    let source: Arc<dyn FileSource> = match &args.local_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Reading files from local directory");
            Arc::new(LocalFileSource::new(dir.clone()))
        },
        None => Arc::new(S3FileSource::new(config.storage.clone()).await?),
    };

    Ok((source, prefix))
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                },
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                },
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => warn!("Received Ctrl+C, cancelling ingestion"),
            _ = terminate => warn!("Received terminate signal, cancelling ingestion"),
        }

        token.cancel();
    });
}
