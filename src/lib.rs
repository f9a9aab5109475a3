//! icefall: lands raw CSV objects in Iceberg tables.
//!
//! A single run reads `raw/<folder>/<file>.csv`, infers its schema, stamps
//! every row with the run's ingestion date and replaces the table
//! `<catalog>.<database>.<folder>` with the result. Successful runs move the
//! raw object to the archive prefix; failed writes leave it in place and drop
//! the record set into the quarantine prefix as Parquet.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use icefall::{Config, IcebergSink, IngestionJob, JobArgs, StorageProvider};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let args = JobArgs::new("ingest-orders", "lake", "raw/orders/2024.csv", "sales");
//! let config = Config::default();
//! let storage = StorageProvider::for_url_with_options("s3://lake", config.storage_options.clone()).await?;
//! let sink = IcebergSink::glue(&config.catalog, config.warehouse("lake")).await?;
//!
//! let summary = IngestionJob::new(args, config, Arc::new(storage), Arc::new(sink))
//!     .run()
//!     .await?;
//! println!("Wrote {} rows to {}", summary.rows, summary.table);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod paths;
pub mod pipeline;
pub mod quarantine;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

// Re-export main types
pub use config::{Config, JobArgs};
pub use job::{JobRun, JobState};
pub use paths::JobPaths;
pub use pipeline::{IngestionJob, RunSummary};
pub use sink::{IcebergSink, TableSink, WriteOutcome};
pub use storage::{StorageProvider, StorageProviderRef};
