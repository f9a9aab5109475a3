//! Quarantine for record sets the destination table rejected.
//!
//! The whole record set, ingestion date included, is written as a single
//! Parquet object. A second failure for the same folder on the same date
//! overwrites the first artifact.

use arrow::array::RecordBatch;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::info;

use crate::config::ParquetCompression;
use crate::emit;
use crate::error::{QuarantineEncodeSnafu, QuarantineError, QuarantineWriteSnafu};
use crate::metrics::events::QuarantineWritten;
use crate::sink::parquet::encode_parquet;
use crate::storage::StorageProvider;

/// Where the artifact went and how large it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineReceipt {
    pub path: Path,
    pub rows: usize,
    pub bytes: u64,
}

/// Writes rejected record sets to the quarantine prefix.
#[derive(Debug)]
pub struct Quarantine<'a> {
    storage: &'a StorageProvider,
}

impl<'a> Quarantine<'a> {
    pub fn new(storage: &'a StorageProvider) -> Self {
        Self { storage }
    }

    /// Write `batch` to `path`, overwriting any previous artifact.
    pub async fn write(
        &self,
        batch: &RecordBatch,
        path: &Path,
    ) -> Result<QuarantineReceipt, QuarantineError> {
        let bytes = encode_parquet(batch, ParquetCompression::Snappy).context(QuarantineEncodeSnafu)?;
        let size = bytes.len() as u64;

        self.storage
            .put_payload(path, PutPayload::from(bytes))
            .await
            .context(QuarantineWriteSnafu {
                path: path.to_string(),
            })?;

        emit!(QuarantineWritten { bytes: size });
        info!(
            "Quarantined {} rows ({} bytes) to {}",
            batch.num_rows(),
            size,
            path
        );

        Ok(QuarantineReceipt {
            path: path.clone(),
            rows: batch.num_rows(),
            bytes: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn batch(values: Vec<i64>) -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(values))],
        )
        .unwrap()
    }

    async fn storage(dir: &TempDir) -> StorageProvider {
        StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap()
    }

    fn rows(bytes: bytes::Bytes) -> usize {
        ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .sum()
    }

    #[tokio::test]
    async fn test_writes_all_rows() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let path = Path::from("quarantine/orders/bad_2024-03-09.parquet");

        let receipt = Quarantine::new(&storage)
            .write(&batch(vec![1, 2, 3]), &path)
            .await
            .unwrap();
        assert_eq!(receipt.rows, 3);
        assert!(receipt.bytes > 0);

        let stored = storage.get(path).await.unwrap();
        assert_eq!(rows(stored), 3);
    }

    #[tokio::test]
    async fn test_same_day_failure_overwrites() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let path = Path::from("quarantine/orders/bad_2024-03-09.parquet");
        let quarantine = Quarantine::new(&storage);

        quarantine.write(&batch(vec![1, 2, 3]), &path).await.unwrap();
        quarantine.write(&batch(vec![4]), &path).await.unwrap();

        let stored = storage.get(path).await.unwrap();
        assert_eq!(rows(stored), 1);
    }
}
