//! Destination table sink.
//!
//! The ingestion job talks to the table through [`TableSink`]; the Iceberg
//! implementation lives in [`iceberg`]. The write yields a [`WriteOutcome`]
//! rather than an error so the caller can route failures to quarantine.

pub mod iceberg;
pub mod parquet;
pub mod schema;

use arrow::array::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::config::{DistributionMode, ParquetCompression, TableConfig};
use crate::error::TableError;
use crate::paths::TableAddress;

pub use self::iceberg::IcebergSink;

/// Table property naming the Parquet codec of data files.
pub const PROPERTY_COMPRESSION: &str = "write.parquet.compression-codec";
/// Table property naming the write distribution mode.
pub const PROPERTY_DISTRIBUTION_MODE: &str = "write.distribution-mode";
/// Table property recording that schema auto-merge is on.
pub const PROPERTY_AUTO_MERGE: &str = "write.schema.auto-merge.enabled";
/// Table property naming the job that last replaced the table.
pub const PROPERTY_JOB_NAME: &str = "icefall.job-name";
/// Table property holding the run id that last replaced the table.
pub const PROPERTY_RUN_ID: &str = "icefall.run-id";

/// How the record set is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub compression: ParquetCompression,
    pub distribution_mode: DistributionMode,
    pub schema_auto_merge: bool,
    /// Identity partition column; must hold the run date.
    pub partition_column: String,
}

impl WriteOptions {
    pub fn from_config(config: &TableConfig, partition_column: impl Into<String>) -> Self {
        Self {
            compression: config.compression,
            distribution_mode: config.distribution_mode,
            schema_auto_merge: config.schema_auto_merge,
            partition_column: partition_column.into(),
        }
    }

    /// Properties recorded on the table.
    pub fn table_properties(&self, job_name: &str, run_id: &str) -> HashMap<String, String> {
        HashMap::from([
            (
                PROPERTY_COMPRESSION.to_string(),
                self.compression.as_str().to_string(),
            ),
            (
                PROPERTY_DISTRIBUTION_MODE.to_string(),
                self.distribution_mode.as_str().to_string(),
            ),
            (
                PROPERTY_AUTO_MERGE.to_string(),
                self.schema_auto_merge.to_string(),
            ),
            (PROPERTY_JOB_NAME.to_string(), job_name.to_string()),
            (PROPERTY_RUN_ID.to_string(), run_id.to_string()),
        ])
    }
}

/// One create-or-replace write.
#[derive(Debug, Clone)]
pub struct TableWriteRequest<'a> {
    pub table: &'a TableAddress,
    /// Table location, e.g. `s3://<bucket>/processed/<folder>`.
    pub location: &'a str,
    pub batch: &'a RecordBatch,
    pub partition_date: NaiveDate,
    pub options: &'a WriteOptions,
    pub job_name: &'a str,
    pub run_id: &'a str,
}

/// What a successful write produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableWriteSummary {
    /// Whether a table already existed and was replaced.
    pub replaced: bool,
    pub data_files: usize,
    pub records: u64,
    pub bytes: u64,
    pub added_columns: Vec<String>,
}

/// Result of the destination write.
#[derive(Debug)]
pub enum WriteOutcome {
    Success(TableWriteSummary),
    Failure(TableError),
}

impl From<Result<TableWriteSummary, TableError>> for WriteOutcome {
    fn from(result: Result<TableWriteSummary, TableError>) -> Self {
        match result {
            Ok(summary) => WriteOutcome::Success(summary),
            Err(err) => WriteOutcome::Failure(err),
        }
    }
}

/// Destination of the record set.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Create the namespace if it does not exist.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), TableError>;

    /// Write `request.batch` as the full contents of the table, creating it
    /// if absent and merging the schema of an existing one.
    async fn create_or_replace(&self, request: TableWriteRequest<'_>) -> WriteOutcome;
}
