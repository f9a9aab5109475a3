//! Parquet encoding.
//!
//! Writer properties shared by the table's data files and the quarantine
//! artifact, and a one-shot encoder for a whole record set.

use arrow::array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;

use crate::config::ParquetCompression;
use crate::error::{FinishSnafu, ParquetError, WriteSnafu, WriterCreateSnafu};

/// Parquet codec for a configured compression.
pub fn compression(codec: ParquetCompression) -> Compression {
    match codec {
        ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        ParquetCompression::Lz4Raw => Compression::LZ4_RAW,
    }
}

/// Writer properties for the given codec.
pub fn writer_properties(codec: ParquetCompression) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(compression(codec))
        .build()
}

/// Encode `batch` as a complete Parquet file.
pub fn encode_parquet(
    batch: &RecordBatch,
    codec: ParquetCompression,
) -> Result<Bytes, ParquetError> {
    let mut writer = ArrowWriter::try_new(
        Vec::with_capacity(batch.get_array_memory_size()),
        batch.schema(),
        Some(writer_properties(codec)),
    )
    .context(WriterCreateSnafu)?;

    writer.write(batch).context(WriteSnafu)?;
    let buffer = writer.into_inner().context(FinishSnafu)?;
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("value", DataType::Int64, true),
        ]))
    }

    fn test_batch(num_rows: usize) -> RecordBatch {
        let ids: Vec<String> = (0..num_rows).map(|i| format!("id_{}", i)).collect();
        let values: Vec<i64> = (0..num_rows).map(|i| i as i64).collect();

        RecordBatch::try_new(
            test_schema(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(Int64Array::from(values)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_encoded_file_is_snappy_and_complete() {
        let bytes = encode_parquet(&test_batch(100), ParquetCompression::Snappy).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");

        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).unwrap();
        let row_group = builder.metadata().row_group(0);
        assert_eq!(row_group.column(0).compression(), Compression::SNAPPY);

        let rows: usize = builder
            .build()
            .unwrap()
            .map(|batch| batch.unwrap().num_rows())
            .sum();
        assert_eq!(rows, 100);
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(
            compression(ParquetCompression::Uncompressed),
            Compression::UNCOMPRESSED
        );
        assert!(matches!(
            compression(ParquetCompression::Zstd),
            Compression::ZSTD(_)
        ));
        assert!(matches!(
            compression(ParquetCompression::Gzip),
            Compression::GZIP(_)
        ));
        assert_eq!(
            compression(ParquetCompression::Lz4Raw),
            Compression::LZ4_RAW
        );
    }

    #[test]
    fn test_empty_batch_encodes() {
        let bytes = encode_parquet(&test_batch(0), ParquetCompression::Snappy).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(reader.map(|b| b.unwrap().num_rows()).sum::<usize>(), 0);
    }
}
