//! icefall: batch job landing a raw CSV object in an Iceberg table.
//!
//! Reads `s3://<bucket>/<key>`, replaces `<catalog>.<database>.<folder>` with
//! its contents and archives the object, or quarantines the record set when
//! the table write fails.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use icefall::config::{Config, JobArgs};
use icefall::error::{
    AddressParseSnafu, CatalogSnafu, ConfigSnafu, MetricsSnafu, PipelineError,
    PipelineStorageSnafu,
};
use icefall::pipeline::IngestionJob;
use icefall::sink::IcebergSink;
use icefall::storage::StorageProvider;
use icefall::{metrics, paths};

/// CSV to Iceberg ingestion job.
#[derive(Parser, Debug)]
#[command(name = "icefall")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    job: JobArgs,

    /// Path to an optional job configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - derive locations and validate configuration without any I/O.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("icefall starting job {}", args.job.job_name);

    args.job.validate().context(ConfigSnafu)?;
    let config = build_config(&args)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        return dry_run(&args.job, &config);
    }

    let storage = StorageProvider::for_url_with_options(
        &format!("s3://{}", args.job.bucket),
        config.storage_options.clone(),
    )
    .await
    .context(PipelineStorageSnafu)?;

    let sink = IcebergSink::glue(&config.catalog, config.warehouse(&args.job.bucket))
        .await
        .context(CatalogSnafu)?;

    let job = IngestionJob::new(args.job, config, Arc::new(storage), Arc::new(sink));
    let summary = job.run().await?;

    info!("Job completed successfully");
    info!("  Run id: {}", summary.run_id);
    info!("  Started at: {}", summary.started_at.to_rfc3339());
    info!("  Table: {}", summary.table);
    info!("  Rows read: {}", summary.rows);
    info!("  Columns: {}", summary.columns);
    info!("  Records written: {}", summary.records_written);
    info!("  Data files: {}", summary.data_files);
    info!("  Bytes written: {}", summary.bytes_written);
    if !summary.added_columns.is_empty() {
        info!("  Added columns: {}", summary.added_columns.join(", "));
    }
    info!("  Archived to: {}", summary.archived_to);
    info!("  Elapsed: {:.2?}", summary.elapsed);

    Ok(())
}

/// Load the job file if one was given, defaults otherwise.
fn build_config(args: &Args) -> Result<Config, PipelineError> {
    match &args.config {
        Some(path) => Config::from_file(path).context(ConfigSnafu),
        None => {
            let config = Config::default();
            config.validate().context(ConfigSnafu)?;
            Ok(config)
        }
    }
}

fn dry_run(job: &JobArgs, config: &Config) -> Result<(), PipelineError> {
    info!("Dry run mode - validating configuration");
    let run_date = paths::utc_run_date();
    let paths = paths::JobPaths::derive(job, &config.layout, &config.catalog.name, run_date)
        .context(ConfigSnafu)?;

    let plan = serde_json::json!({
        "job": job.job_name,
        "run_date": run_date.to_string(),
        "table": paths.table.to_string(),
        "source": paths.raw_uri(),
        "location": paths.processed_location,
        "warehouse": config.warehouse(&job.bucket),
        "archive": paths.archive_uri(),
        "quarantine": paths.quarantine_uri(),
        "compression": config.table.compression.as_str(),
        "distribution_mode": config.table.distribution_mode.as_str(),
        "schema_auto_merge": config.table.schema_auto_merge,
    });
    info!("Plan: {}", plan);
    info!("Configuration is valid");
    Ok(())
}
