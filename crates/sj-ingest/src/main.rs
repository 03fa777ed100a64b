//! Sales journal ingestion tool

use anyhow::{Context, Result};
use clap::Parser;
use sj_common::logging::{init_logging, LogConfig};
use sj_common::types::RunMode;
use sj_ingest::schema::ColumnCatalog;
use sj_ingest::store::{postgres::create_pool, PgRecordStore};
use sj_ingest::{IngestConfig, IngestPipeline, RunLoopController};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sj-ingest")]
#[command(author, version, about = "Load sales journal exports into PostgreSQL")]
struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, env = "SJ_CONFIG")]
    config: Option<PathBuf>,

    /// Directory containing the exported csv files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Table description csv
    #[arg(long)]
    table_desc: Option<PathBuf>,

    /// Run mode: normal (one pass) or loop (until drained)
    #[arg(short, long)]
    mode: Option<RunMode>,

    /// Only load these set ids
    #[arg(long, value_delimiter = ',')]
    file_sets: Option<Vec<String>>,

    /// Maximum number of sets per pass
    #[arg(long)]
    max_sets: Option<usize>,

    /// Write the commit results to this file as JSON
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ref desc) = self.table_desc {
            config.table_description = desc.clone();
        }
        if let Some(mode) = self.mode {
            config.run_mode = mode;
        }
        if let Some(ref sets) = self.file_sets {
            config.load_file_sets = Some(sets.clone());
        }
        if let Some(max) = self.max_sets {
            config.max_file_sets_per_run = max;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::for_tool("sj-ingest", cli.verbose)?;
    let _guard = init_logging(&log_config)?;

    if let Err(e) = run(&cli).await {
        error!(error = %e, "Ingestion failed");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config =
        IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        data_dir = %config.data_dir.display(),
        mode = %config.run_mode,
        max_sets = config.max_file_sets_per_run,
        "Starting sales journal ingestion"
    );

    let catalog = ColumnCatalog::from_path(&config.table_description)
        .context("Failed to read table description")?;

    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = PgRecordStore::new(
        pool,
        &config.tables,
        &config.columns.primary_key,
        &config.tracking_columns,
    )?
    .with_chunk_rows(config.database.insert_chunk_rows);

    let controller = RunLoopController::new(config.run_mode);
    let pipeline = IngestPipeline::new(config, catalog, store)?;
    let summary = controller.run(&pipeline).await?;

    if let Some(ref path) = cli.report {
        summary
            .write_report(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    info!(
        passes = summary.passes.len(),
        sets = summary.results.len(),
        uploaded = summary.uploaded(),
        "Ingestion complete"
    );
    Ok(())
}
