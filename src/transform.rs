//! Record set shaping before the table write.

use arrow::array::{ArrayRef, Date32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::{DateTime, NaiveDate};
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{AppendColumnSnafu, TransformError};

/// Name of the partition column carrying the run date.
pub const INGESTION_DATE_COLUMN: &str = "ingestion_date";

/// Days since the Unix epoch, as stored in `Date32` columns.
pub fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = DateTime::UNIX_EPOCH.date_naive();
    // A calendar date fits in i32 days.
    (date - epoch).num_days() as i32
}

/// Append a constant `ingestion_date` column equal to `run_date`.
///
/// A column of the same name already present in the input is dropped first,
/// so the appended column is always last and always the run date.
pub fn with_ingestion_date(
    batch: &RecordBatch,
    run_date: NaiveDate,
) -> Result<RecordBatch, TransformError> {
    let schema = batch.schema();
    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| field.name() != INGESTION_DATE_COLUMN)
        .map(|(i, _)| i)
        .collect();

    let mut fields: Vec<Field> = keep
        .iter()
        .map(|&i| schema.field(i).clone())
        .collect();
    let mut columns: Vec<ArrayRef> = keep.iter().map(|&i| batch.column(i).clone()).collect();

    fields.push(Field::new(INGESTION_DATE_COLUMN, DataType::Date32, true));
    columns.push(Arc::new(Date32Array::from_value(
        days_since_epoch(run_date),
        batch.num_rows(),
    )));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context(AppendColumnSnafu {
        column: INGESTION_DATE_COLUMN,
    })
}
