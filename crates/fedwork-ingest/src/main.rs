//! Fedwork Ingest - bulk import tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fedwork_common::logging::{init_logging, LogConfig, LogLevel};
use fedwork_common::types::Dataset;
use fedwork_ingest::config::IngestConfig;
use fedwork_ingest::ledger::{ImportLedger, PgImportLedger};
use fedwork_ingest::loader::PgBulkLoader;
use fedwork_ingest::notify::{CacheNotifier, HttpNotifier, NoopNotifier};
use fedwork_ingest::pipeline::check_data_file;
use fedwork_ingest::scan::scan_directory;
use fedwork_ingest::{db, ImportReport, Importer, IngestError};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fedwork-ingest")]
#[command(author, version, about = "Bulk import of OPM workforce data files")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import one data file
    Import {
        /// Dataset kind: employment, accessions or separations
        dataset: String,

        /// Pipe-delimited data file
        file: PathBuf,

        /// Skip cache revalidation
        #[arg(long)]
        no_notify: bool,
    },

    /// Import every not-yet-imported file in a local directory
    Sync {
        /// Directory holding the data files
        #[arg(long, env = "FEDWORK_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Only list what would be imported
        #[arg(long)]
        dry_run: bool,

        /// Skip cache revalidation
        #[arg(long)]
        no_notify: bool,
    },

    /// Show recent import records
    History {
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::default()
        .with_level(log_level)
        .with_file_prefix("fedwork-ingest");

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Command failed");
        eprintln!("Error: {:#}", e);
        // 2: the input was rejected before anything was recorded
        let validation = e
            .downcast_ref::<IngestError>()
            .is_some_and(IngestError::is_validation);
        process::exit(if validation { 2 } else { 1 });
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = IngestConfig::load()?;

    match cli.command {
        Command::Import {
            dataset,
            file,
            no_notify,
        } => {
            let dataset: Dataset = dataset.parse().map_err(IngestError::from)?;
            check_data_file(&file).await?;
            let importer = build_importer(&config, !no_notify).await?;

            match importer.import(dataset, &file).await? {
                ImportReport::Imported(summary) => {
                    println!(
                        "Imported {} rows of {} from {} into {} (import {})",
                        summary.rows_copied,
                        summary.dataset.label(),
                        summary.filename,
                        summary.dataset.table_name(),
                        summary.import_id
                    );
                    if let Some(total) = summary.table_total {
                        println!("{} now holds {} rows", summary.dataset.table_name(), total);
                    }
                },
                ImportReport::AlreadyImported { filename, .. } => {
                    println!("{} was already imported, skipping", filename);
                },
            }
        },
        Command::Sync {
            data_dir,
            dry_run,
            no_notify,
        } => {
            let dir = data_dir.unwrap_or_else(|| config.data_dir.clone());
            let files = scan_directory(&dir)
                .await
                .with_context(|| format!("Failed to scan {}", dir.display()))?;
            info!(dir = %dir.display(), files = files.len(), "scanned data directory");

            let importer = build_importer(&config, !no_notify).await?;
            let summary = importer.sync(&files, dry_run).await;

            if dry_run {
                for path in &summary.pending {
                    println!("would import {}", path.display());
                }
            }
            println!(
                "{} files: {} imported, {} skipped, {} failed",
                summary.discovered, summary.imported, summary.skipped, summary.failed
            );
            for (file, reason) in &summary.failures {
                println!("  {}: {}", file, reason);
            }
            if summary.failed > 0 {
                anyhow::bail!("{} of {} files failed to import", summary.failed, summary.discovered);
            }
        },
        Command::History { limit } => {
            let pool = db::create_pool(&config.database).await?;
            let ledger = PgImportLedger::new(pool);
            for record in ledger.recent(limit).await? {
                println!(
                    "{:>6}  {:<9}  {:<11}  {:>10}  {:<6}  {}  {}",
                    record.id.0,
                    record.status.as_str(),
                    record.dataset.as_str(),
                    record.row_count,
                    record.snapshot_period.as_ref().map(|p| p.as_str()).unwrap_or("-"),
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.filename
                );
            }
        },
    }

    Ok(())
}

async fn build_importer(
    config: &IngestConfig,
    notify: bool,
) -> Result<Importer<PgImportLedger, PgBulkLoader, Box<dyn CacheNotifier>>> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;
    db::health_check(&pool).await?;

    let notifier: Box<dyn CacheNotifier> = if notify {
        let http = HttpNotifier::new(
            config.revalidate.url.clone(),
            config.revalidate.token.clone(),
            config.revalidate.timeout(),
        )?;
        info!(url = http.url(), "cache revalidation enabled");
        Box::new(http)
    } else {
        Box::new(NoopNotifier)
    };

    Ok(Importer::new(PgImportLedger::new(pool.clone()), PgBulkLoader::new(pool), notifier)
        .with_chunk_size(config.copy_chunk_bytes)
        .with_notify(notify))
}
