//! Error types for icefall using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use arrow::error::ArrowError;
use snafu::prelude::*;

use crate::job::JobState;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during argument and configuration validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required job argument was empty.
    #[snafu(display("Job argument --{name} cannot be empty"))]
    EmptyArgument { name: &'static str },

    /// The source key does not carry a dataset folder segment.
    #[snafu(display("Source key '{key}' has no dataset folder (expected <prefix>/<folder>/<file>)"))]
    MissingDatasetFolder { key: String },

    /// The source key is not a valid object path.
    #[snafu(display("Source key '{key}' is not a valid object path"))]
    InvalidKey {
        key: String,
        source: object_store::path::Error,
    },

    /// The source key is not located under the raw prefix.
    #[snafu(display("Source key '{key}' is not under the raw prefix '{prefix}/'"))]
    OutsideRawPrefix { key: String, prefix: String },

    /// A layout prefix is empty or spans more than one path segment.
    #[snafu(display("Layout prefix {name} must be a single non-empty path segment, got '{value}'"))]
    InvalidPrefix { name: &'static str, value: String },

    /// Two layout prefixes resolve to the same location.
    #[snafu(display("Layout prefixes must be distinct, '{value}' is used twice"))]
    DuplicatePrefix { value: String },

    /// CSV delimiter must be a single ASCII character.
    #[snafu(display("source.delimiter must be an ASCII character, got '{delimiter}'"))]
    InvalidDelimiter { delimiter: char },

    /// Batch size must be positive.
    #[snafu(display("source.batch_size must be greater than zero"))]
    ZeroBatchSize,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Reader Errors ============

/// Errors that can occur while reading the raw CSV object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The object holds no header row.
    #[snafu(display("Source object {path} is empty"))]
    EmptySource { path: String },

    /// Schema inference over the CSV content failed.
    #[snafu(display("Failed to infer CSV schema for {path}"))]
    CsvInfer { path: String, source: ArrowError },

    /// Failed to build the CSV decoder.
    #[snafu(display("Failed to build CSV reader for {path}"))]
    CsvBuild { path: String, source: ArrowError },

    /// A row could not be decoded with the inferred schema.
    #[snafu(display("Failed to decode CSV for {path}"))]
    CsvDecode { path: String, source: ArrowError },

    /// Decoded batches could not be combined into one record set.
    #[snafu(display("Failed to combine CSV batches for {path}"))]
    ConcatBatches { path: String, source: ArrowError },
}

// ============ Transform Errors ============

/// Errors raised while shaping the record set.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// Appending the ingestion date column failed.
    #[snafu(display("Failed to append column {column}"))]
    AppendColumn { column: String, source: ArrowError },
}

// ============ Table Errors ============

/// Errors that can occur while writing the destination table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TableError {
    /// Column type with no Iceberg counterpart.
    #[snafu(display("Column '{column}' has unsupported type {data_type}"))]
    UnsupportedType { column: String, data_type: String },

    /// Incoming column type cannot be merged into the table's column type.
    #[snafu(display(
        "Cannot merge column '{column}': table type {table_type} is incompatible with incoming type {incoming_type}"
    ))]
    IncompatibleType {
        column: String,
        table_type: String,
        incoming_type: String,
    },

    /// Schemas differ while auto-merge is disabled.
    #[snafu(display("Schema of {table} differs from incoming data and auto-merge is disabled"))]
    SchemaMismatch { table: String },

    /// The partition source column is absent from the schema.
    #[snafu(display("Partition column '{column}' is missing from the table schema"))]
    MissingPartitionColumn { column: String },

    /// Building an Iceberg schema or spec failed.
    #[snafu(display("Invalid Iceberg schema"))]
    IcebergSchema { source: iceberg::Error },

    /// Converting the table schema to Arrow failed.
    #[snafu(display("Failed to convert table schema to Arrow"))]
    ArrowSchema { source: iceberg::Error },

    /// A column could not be cast to the table's type.
    #[snafu(display("Failed to align column '{column}' with the table schema"))]
    AlignColumn { column: String, source: ArrowError },

    /// The aligned batch could not be assembled.
    #[snafu(display("Failed to assemble aligned record batch"))]
    AlignBatch { source: ArrowError },

    /// Catalog client could not be created.
    #[snafu(display("Failed to initialize catalog"))]
    CatalogInit { source: iceberg::Error },

    /// Namespace lookup or creation failed.
    #[snafu(display("Failed to ensure namespace {namespace}"))]
    Namespace {
        namespace: String,
        source: iceberg::Error,
    },

    /// Existing table could not be loaded.
    #[snafu(display("Failed to load table {table}"))]
    LoadTable {
        table: String,
        source: iceberg::Error,
    },

    /// Existing table could not be dropped for replacement.
    #[snafu(display("Failed to drop table {table} for replacement"))]
    DropTable {
        table: String,
        source: iceberg::Error,
    },

    /// The staged table could not be moved into place.
    #[snafu(display("Failed to rename staged table {staged} to {table}"))]
    RenameTable {
        staged: String,
        table: String,
        source: iceberg::Error,
    },

    /// Table creation failed.
    #[snafu(display("Failed to create table {table}"))]
    CreateTable {
        table: String,
        source: iceberg::Error,
    },

    /// Writing Parquet data files failed.
    #[snafu(display("Failed to write data files for {table}"))]
    DataFileWrite {
        table: String,
        source: iceberg::Error,
    },

    /// Committing the append snapshot failed.
    #[snafu(display("Failed to commit snapshot to {table}"))]
    Commit {
        table: String,
        source: iceberg::Error,
    },
}

// ============ Parquet Errors ============

/// Errors that can occur during Parquet encoding.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParquetError {
    /// Failed to create Parquet writer.
    #[snafu(display("Failed to create Parquet writer"))]
    WriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Parquet write error.
    #[snafu(display("Parquet write error"))]
    Write {
        source: parquet::errors::ParquetError,
    },

    /// Failed to finalize the Parquet footer.
    #[snafu(display("Failed to finish Parquet file"))]
    Finish {
        source: parquet::errors::ParquetError,
    },
}

// ============ Quarantine Errors ============

/// Errors that can occur while writing the quarantine artifact.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts (e.g., WriteSnafu)
#[allow(clippy::enum_variant_names)]
pub enum QuarantineError {
    /// Failed to encode the record set.
    #[snafu(display("Failed to encode quarantine artifact"))]
    QuarantineEncode { source: ParquetError },

    /// Failed to store the artifact.
    #[snafu(display("Failed to write quarantine artifact to {path}"))]
    QuarantineWrite { path: String, source: StorageError },
}

// ============ Archive Errors ============

/// Errors that can occur while moving the raw object to the archive.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(clippy::enum_variant_names)]
pub enum ArchiveError {
    /// Copy to the archive location failed; the raw object is untouched.
    #[snafu(display("Failed to copy {from} to {to}"))]
    ArchiveCopy {
        from: String,
        to: String,
        source: StorageError,
    },

    /// Delete of the raw object failed after a successful copy.
    #[snafu(display("Failed to delete {path} after archiving"))]
    ArchiveDelete { path: String, source: StorageError },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// The raw object could not be fetched.
    #[snafu(display("Failed to read source object {path}"))]
    ReadSource { path: String, source: StorageError },

    /// Reader error.
    #[snafu(display("Reader error"))]
    Reader { source: ReaderError },

    /// Transform error.
    #[snafu(display("Transform error"))]
    Transform { source: TransformError },

    /// Catalog client could not be built.
    #[snafu(display("Catalog error"))]
    Catalog { source: TableError },

    /// Destination namespace could not be ensured.
    #[snafu(display("Namespace error"))]
    EnsureNamespace { source: TableError },

    /// The destination write failed; the record set was sent to quarantine.
    #[snafu(display("Write to {table} failed"))]
    TableWrite { table: String, source: TableError },

    /// Archive error.
    #[snafu(display("Archive error"))]
    Archive { source: ArchiveError },

    /// Job state machine was driven out of order.
    #[snafu(display("Invalid job state transition from {from} to {to}"))]
    InvalidTransition { from: JobState, to: JobState },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

impl PipelineError {
    /// Returns true when the error came from the destination write, i.e.
    /// the quarantine path was taken.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, PipelineError::TableWrite { .. })
    }
}
