//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the job. Events
//! implement the `InternalEvent` trait which records the corresponding
//! Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

use crate::job::JobState;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when raw bytes are fetched from the source object.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("icefall_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when CSV rows have been decoded.
pub struct RecordsRead {
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, "Records read");
        counter!("icefall_records_read_total").increment(self.count);
    }
}

/// Event emitted when data files are committed to the destination table.
pub struct DataFilesCommitted {
    pub count: u64,
    pub bytes: u64,
}

impl InternalEvent for DataFilesCommitted {
    fn emit(self) {
        trace!(count = self.count, bytes = self.bytes, "Data files committed");
        counter!("icefall_data_files_committed_total").increment(self.count);
        counter!("icefall_bytes_written_total").increment(self.bytes);
    }
}

/// Event emitted when the destination write fails.
pub struct TableWriteFailed;

impl InternalEvent for TableWriteFailed {
    fn emit(self) {
        trace!("Table write failed");
        counter!("icefall_table_write_failures_total").increment(1);
    }
}

/// Event emitted when the quarantine artifact has been stored.
pub struct QuarantineWritten {
    pub bytes: u64,
}

impl InternalEvent for QuarantineWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Quarantine written");
        counter!("icefall_quarantine_writes_total").increment(1);
        counter!("icefall_quarantine_bytes_total").increment(self.bytes);
    }
}

/// Event emitted when the raw object has been moved to the archive.
pub struct ObjectArchived;

impl InternalEvent for ObjectArchived {
    fn emit(self) {
        trace!("Object archived");
        counter!("icefall_objects_archived_total").increment(1);
    }
}

/// Event emitted when a run reaches a terminal state.
pub struct JobFinished {
    pub state: JobState,
    pub duration: Duration,
}

impl InternalEvent for JobFinished {
    fn emit(self) {
        trace!(
            state = self.state.as_str(),
            duration_ms = self.duration.as_millis(),
            "Job finished"
        );
        counter!("icefall_jobs_total", "state" => self.state.as_str()).increment(1);
        histogram!("icefall_job_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Histogram events for timing
// ============================================================================

/// Event emitted when CSV decoding completes.
pub struct CsvParseCompleted {
    pub duration: Duration,
}

impl InternalEvent for CsvParseCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "CSV parse completed"
        );
        histogram!("icefall_csv_parse_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a table write attempt completes, successful or not.
pub struct TableWriteCompleted {
    pub duration: Duration,
}

impl InternalEvent for TableWriteCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Table write completed"
        );
        histogram!("icefall_table_write_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Copy,
    Delete,
    Head,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Copy => "copy",
            StorageOperation::Delete => "delete",
            StorageOperation::Head => "head",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "icefall_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "icefall_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
