//! The ingestion job.
//!
//! One invocation reads one raw CSV object, writes it to the destination
//! table and either archives the object or quarantines the record set:
//!
//! ```text
//! Bootstrapped -> Read -> WriteSucceeded -> Archived -> Committed
//!                      \-> WriteFailed -> Quarantined -> Terminated
//! ```
//!
//! Only a failed table write takes the quarantine branch. Every other error
//! propagates as-is and leaves the raw object where it was.

use arrow::array::RecordBatch;
use chrono::{DateTime, NaiveDate, Utc};
use snafu::IntoError;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::archive::archive_object;
use crate::config::{Config, JobArgs};
use crate::emit;
use crate::error::{
    ArchiveSnafu, ConfigSnafu, EnsureNamespaceSnafu, PipelineError, ReadSourceSnafu,
    ReaderSnafu, TableError, TableWriteSnafu, TransformSnafu,
};
use crate::job::{JobRun, JobState};
use crate::metrics::events::TableWriteFailed;
use crate::paths::{JobPaths, utc_run_date};
use crate::quarantine::Quarantine;
use crate::sink::{TableSink, TableWriteRequest, TableWriteSummary, WriteOptions, WriteOutcome};
use crate::source::CsvReader;
use crate::storage::StorageProviderRef;
use crate::transform::{INGESTION_DATE_COLUMN, with_ingestion_date};

/// Summary of a committed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_name: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub table: String,
    /// Rows read from the raw object.
    pub rows: usize,
    pub columns: usize,
    /// Records committed to the table.
    pub records_written: u64,
    pub data_files: usize,
    pub bytes_written: u64,
    pub replaced: bool,
    pub added_columns: Vec<String>,
    pub archived_to: String,
    pub elapsed: Duration,
}

/// A configured, not yet started ingestion run.
///
/// Storage and the table sink are handed in by the caller and live for the
/// duration of the invocation.
pub struct IngestionJob {
    args: JobArgs,
    config: Config,
    storage: StorageProviderRef,
    sink: Arc<dyn TableSink>,
    run_date: NaiveDate,
}

impl IngestionJob {
    pub fn new(
        args: JobArgs,
        config: Config,
        storage: StorageProviderRef,
        sink: Arc<dyn TableSink>,
    ) -> Self {
        Self {
            args,
            config,
            storage,
            sink,
            run_date: utc_run_date(),
        }
    }

    /// Pin the run date instead of taking today's UTC date.
    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = run_date;
        self
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    /// Locations this run will touch.
    pub fn paths(&self) -> Result<JobPaths, PipelineError> {
        JobPaths::derive(
            &self.args,
            &self.config.layout,
            &self.config.catalog.name,
            self.run_date,
        )
        .context(ConfigSnafu)
    }

    /// Execute the job once.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        self.args.validate().context(ConfigSnafu)?;
        self.config.validate().context(ConfigSnafu)?;

        let mut run = JobRun::init(&self.args.job_name);
        let paths = self.paths()?;
        debug!(
            raw = %paths.raw_uri(),
            archive = %paths.archive_uri(),
            quarantine = %paths.quarantine_uri(),
            location = %paths.processed_location,
            "Derived job paths"
        );

        let batch = self.read(&paths).await?;
        run.transition(JobState::Read)?;

        self.sink
            .ensure_namespace(&paths.table.namespace)
            .await
            .context(EnsureNamespaceSnafu)?;

        let options = WriteOptions::from_config(&self.config.table, INGESTION_DATE_COLUMN);
        let run_id = run.run_id().to_string();
        let request = TableWriteRequest {
            table: &paths.table,
            location: &paths.processed_location,
            batch: &batch,
            partition_date: paths.run_date,
            options: &options,
            job_name: &self.args.job_name,
            run_id: &run_id,
        };

        let outcome = self.sink.create_or_replace(request).await;
        match outcome {
            WriteOutcome::Success(summary) => {
                info!("Wrote Iceberg table: {}", paths.table);
                run.transition(JobState::WriteSucceeded)?;
                self.archive(&mut run, &paths).await?;
                run.commit()?;
                Ok(self.summary(&run, &paths, &batch, summary))
            }
            WriteOutcome::Failure(err) => Err(self.quarantine(&mut run, &paths, &batch, err).await),
        }
    }

    async fn read(&self, paths: &JobPaths) -> Result<RecordBatch, PipelineError> {
        let raw_uri = paths.raw_uri();
        let data = self
            .storage
            .get(paths.raw_key.clone())
            .await
            .context(ReadSourceSnafu { path: &raw_uri })?;

        let read = CsvReader::new((&self.config.source).into())
            .read(data, &raw_uri)
            .context(ReaderSnafu)?;
        info!(
            "Read {} rows x {} columns from {} (types inferred from {} records)",
            read.batch.num_rows(),
            read.batch.num_columns(),
            raw_uri,
            read.inferred_from
        );

        with_ingestion_date(&read.batch, paths.run_date).context(TransformSnafu)
    }

    async fn archive(&self, run: &mut JobRun, paths: &JobPaths) -> Result<(), PipelineError> {
        archive_object(&self.storage, &paths.raw_key, &paths.archive_key)
            .await
            .context(ArchiveSnafu)?;
        run.transition(JobState::Archived)
    }

    /// Handle a failed write: quarantine the record set and hand back the
    /// original write error. A quarantine failure is logged only.
    async fn quarantine(
        &self,
        run: &mut JobRun,
        paths: &JobPaths,
        batch: &RecordBatch,
        err: TableError,
    ) -> PipelineError {
        emit!(TableWriteFailed);
        error!(
            "Write failed, sending to quarantine: {}",
            snafu::Report::from_error(&err)
        );

        if let Err(e) = run.transition(JobState::WriteFailed) {
            return e;
        }

        match Quarantine::new(&self.storage)
            .write(batch, &paths.quarantine_key)
            .await
        {
            Ok(receipt) => {
                if let Err(e) = run.transition(JobState::Quarantined) {
                    return e;
                }
                debug!("Quarantine artifact at {}", receipt.path);
            }
            Err(q) => error!(
                "Quarantine write to {} failed: {}",
                paths.quarantine_uri(),
                snafu::Report::from_error(q)
            ),
        }

        if let Err(e) = run.terminate() {
            warn!("Could not terminate job run: {}", e);
        }

        TableWriteSnafu {
            table: paths.table.to_string(),
        }
        .into_error(err)
    }

    fn summary(
        &self,
        run: &JobRun,
        paths: &JobPaths,
        batch: &RecordBatch,
        write: TableWriteSummary,
    ) -> RunSummary {
        RunSummary {
            job_name: run.name().to_string(),
            run_id: run.run_id().to_string(),
            started_at: run.started_at(),
            table: paths.table.to_string(),
            rows: batch.num_rows(),
            columns: batch.num_columns(),
            records_written: write.records,
            data_files: write.data_files,
            bytes_written: write.bytes,
            replaced: write.replaced,
            added_columns: write.added_columns,
            archived_to: paths.archive_uri(),
            elapsed: run.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Sink that refuses every write.
    struct RejectingSink;

    #[async_trait]
    impl TableSink for RejectingSink {
        async fn ensure_namespace(&self, _namespace: &str) -> Result<(), TableError> {
            Ok(())
        }

        async fn create_or_replace(&self, request: TableWriteRequest<'_>) -> WriteOutcome {
            WriteOutcome::Failure(TableError::SchemaMismatch {
                table: request.table.to_string(),
            })
        }
    }

    async fn job(dir: &TempDir, key: &str) -> IngestionJob {
        let storage =
            StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();
        IngestionJob::new(
            JobArgs::new("ingest", "lake", key, "sales"),
            Config::default(),
            Arc::new(storage),
            Arc::new(RejectingSink),
        )
        .with_run_date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
    }

    #[tokio::test]
    async fn test_paths_use_pinned_run_date() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir, "raw/orders/2024.csv").await;
        let paths = job.paths().unwrap();
        assert_eq!(
            paths.quarantine_key.as_ref(),
            "quarantine/orders/bad_2024-03-09.parquet"
        );
    }

    #[tokio::test]
    async fn test_bad_key_fails_before_io() {
        let dir = TempDir::new().unwrap();
        let err = job(&dir, "orders.csv").await.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[tokio::test]
    async fn test_missing_source_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = job(&dir, "raw/orders/2024.csv").await.run().await.unwrap_err();
        match err {
            PipelineError::ReadSource { source, .. } => assert!(source.is_not_found()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_write_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir, "raw/orders/2024.csv").await;
        job.storage
            .put("raw/orders/2024.csv", b"id,name\n1,a\n".to_vec())
            .await
            .unwrap();

        let err = job.run().await.unwrap_err();
        assert!(err.is_write_failure());

        let paths = job.paths().unwrap();
        assert!(job.storage.exists(&paths.quarantine_key).await.unwrap());
        assert!(job.storage.exists(&paths.raw_key).await.unwrap());
        assert!(!job.storage.exists(&paths.archive_key).await.unwrap());
    }
}
