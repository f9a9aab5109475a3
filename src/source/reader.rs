//! CSV reader.
//!
//! Parses a whole CSV object into a single Arrow RecordBatch. The first row
//! is the header; column types are inferred from the data.

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use snafu::prelude::*;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::SourceConfig;
use crate::emit;
use crate::error::{
    ConcatBatchesSnafu, CsvBuildSnafu, CsvDecodeSnafu, CsvInferSnafu, EmptySourceSnafu,
    ReaderError,
};
use crate::metrics::events::{BytesRead, CsvParseCompleted, RecordsRead};

/// Configuration for the CSV reader.
#[derive(Debug, Clone)]
pub struct CsvReaderConfig {
    /// Rows decoded per intermediate batch.
    pub batch_size: usize,
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Rows sampled for type inference; `None` reads everything.
    pub infer_schema_max_records: Option<usize>,
}

impl Default for CsvReaderConfig {
    fn default() -> Self {
        Self::from(&SourceConfig::default())
    }
}

impl From<&SourceConfig> for CsvReaderConfig {
    fn from(config: &SourceConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            delimiter: config.delimiter_byte(),
            infer_schema_max_records: config.infer_schema_max_records,
        }
    }
}

/// Result of reading a CSV object.
#[derive(Debug)]
pub struct ReadResult {
    /// Every row of the object.
    pub batch: RecordBatch,
    /// Rows consumed during schema inference.
    pub inferred_from: usize,
}

/// A reader turning CSV bytes into a single record set.
#[derive(Debug, Clone, Default)]
pub struct CsvReader {
    config: CsvReaderConfig,
}

impl CsvReader {
    pub fn new(config: CsvReaderConfig) -> Self {
        Self { config }
    }

    fn format(&self) -> Format {
        Format::default()
            .with_header(true)
            .with_delimiter(self.config.delimiter)
    }

    /// Infer the schema of `data`.
    ///
    /// Columns that hold no values at all (inferred as `Null`) are read as
    /// strings so they survive into the table schema.
    pub fn infer_schema(&self, data: &[u8], path: &str) -> Result<(SchemaRef, usize), ReaderError> {
        let (schema, rows) = self
            .format()
            .infer_schema(Cursor::new(data), self.config.infer_schema_max_records)
            .context(CsvInferSnafu { path })?;

        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .map(|field| match field.data_type() {
                DataType::Null => Field::new(field.name(), DataType::Utf8, true),
                _ => field.as_ref().clone().with_nullable(true),
            })
            .collect();

        Ok((Arc::new(Schema::new(fields)), rows))
    }

    /// Read `data` into one record batch.
    pub fn read(&self, data: Bytes, path: &str) -> Result<ReadResult, ReaderError> {
        emit!(BytesRead {
            bytes: data.len() as u64,
        });

        ensure!(
            !data.iter().all(u8::is_ascii_whitespace),
            EmptySourceSnafu { path }
        );

        let start = Instant::now();
        let (schema, inferred_from) = self.infer_schema(&data, path)?;

        let reader = ReaderBuilder::new(Arc::clone(&schema))
            .with_header(true)
            .with_delimiter(self.config.delimiter)
            .with_batch_size(self.config.batch_size)
            .build(Cursor::new(data.as_ref()))
            .context(CsvBuildSnafu { path })?;

        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .context(CsvDecodeSnafu { path })?;

        let batch = concat_batches(&schema, &batches).context(ConcatBatchesSnafu { path })?;
        emit!(CsvParseCompleted {
            duration: start.elapsed()
        });
        emit!(RecordsRead {
            count: batch.num_rows() as u64,
        });

        debug!(
            "Parsed {} rows x {} columns from {} ({} batches)",
            batch.num_rows(),
            batch.num_columns(),
            path,
            batches.len()
        );

        Ok(ReadResult {
            batch,
            inferred_from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};

    fn read(csv: &str) -> Result<ReadResult, ReaderError> {
        CsvReader::default().read(Bytes::from(csv.to_string()), "raw/orders/2024.csv")
    }

    #[test]
    fn test_header_and_inferred_types() {
        let result = read("id,name,amount\n1,apple,1.5\n2,pear,2.25\n3,plum,3\n").unwrap();
        let batch = result.batch;

        assert_eq!(batch.num_rows(), 3);
        let schema = batch.schema();
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(2).data_type(), &DataType::Float64);
        assert!(schema.fields().iter().all(|f| f.is_nullable()));

        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.values(), &[1, 2, 3]);
        let amounts = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(amounts.value(1), 2.25);
    }

    #[test]
    fn test_rows_span_several_batches() {
        let mut csv = String::from("id,label\n");
        for i in 0..25 {
            csv.push_str(&format!("{i},row-{i}\n"));
        }
        let reader = CsvReader::new(CsvReaderConfig {
            batch_size: 4,
            ..CsvReaderConfig::default()
        });

        let result = reader.read(Bytes::from(csv), "raw/orders/big.csv").unwrap();
        assert_eq!(result.batch.num_rows(), 25);

        let labels = result
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(labels.value(24), "row-24");
    }

    #[test]
    fn test_empty_object_rejected() {
        let err = read("").unwrap_err();
        assert!(matches!(err, ReaderError::EmptySource { .. }));

        let err = read("\n  \n").unwrap_err();
        assert!(matches!(err, ReaderError::EmptySource { .. }));
    }

    #[test]
    fn test_header_only_object_yields_string_columns() {
        let result = read("id,name\n").unwrap();
        assert_eq!(result.batch.num_rows(), 0);
        let schema = result.batch.schema();
        assert_eq!(schema.fields().len(), 2);
        assert!(
            schema
                .fields()
                .iter()
                .all(|f| f.data_type() == &DataType::Utf8)
        );
    }

    #[test]
    fn test_empty_values_are_null() {
        let result = read("id,note\n1,\n2,hello\n").unwrap();
        let notes = result.batch.column(1);
        assert!(notes.is_null(0));
        assert!(!notes.is_null(1));
    }

    #[test]
    fn test_custom_delimiter() {
        let reader = CsvReader::new(CsvReaderConfig {
            delimiter: b';',
            ..CsvReaderConfig::default()
        });
        let result = reader
            .read(Bytes::from_static(b"a;b\n1;x\n"), "raw/orders/semi.csv")
            .unwrap();
        assert_eq!(result.batch.num_columns(), 2);
        assert_eq!(result.batch.schema().field(1).name(), "b");
    }

    #[test]
    fn test_ragged_row_is_decode_error() {
        let err = read("a,b\n1,2\n3\n").unwrap_err();
        assert!(matches!(
            err,
            ReaderError::CsvDecode { .. } | ReaderError::CsvInfer { .. }
        ));
    }
}
