//! Schema conversion and evolution for the destination table.
//!
//! Incoming Arrow schemas are mapped onto Iceberg primitive types, merged
//! with the schema of an existing table, and record batches are aligned to
//! the merged result before writing.

use arrow::array::{ArrayRef, RecordBatch, new_null_array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};
use iceberg::arrow::schema_to_arrow_schema;
use iceberg::spec::{NestedField, NestedFieldRef, PrimitiveType, Schema, Type};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::{
    AlignBatchSnafu, AlignColumnSnafu, ArrowSchemaSnafu, IcebergSchemaSnafu,
    IncompatibleTypeSnafu, MissingPartitionColumnSnafu, SchemaMismatchSnafu, TableError,
    UnsupportedTypeSnafu,
};

/// A named, always-optional table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: PrimitiveType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Map an Arrow type onto its Iceberg primitive, if there is one.
pub fn primitive_type(data_type: &DataType) -> Option<PrimitiveType> {
    let ty = match data_type {
        DataType::Boolean => PrimitiveType::Boolean,
        DataType::Int8 | DataType::Int16 | DataType::Int32 => PrimitiveType::Int,
        DataType::Int64 => PrimitiveType::Long,
        DataType::Float16 | DataType::Float32 => PrimitiveType::Float,
        DataType::Float64 => PrimitiveType::Double,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Null => PrimitiveType::String,
        DataType::Date32 | DataType::Date64 => PrimitiveType::Date,
        DataType::Timestamp(_, None) => PrimitiveType::Timestamp,
        DataType::Timestamp(_, Some(_)) => PrimitiveType::Timestamptz,
        DataType::Binary | DataType::LargeBinary => PrimitiveType::Binary,
        DataType::Decimal128(precision, scale) if *scale >= 0 => PrimitiveType::Decimal {
            precision: u32::from(*precision),
            scale: *scale as u32,
        },
        _ => return None,
    };
    Some(ty)
}

/// Columns of an Arrow schema, in order.
pub fn columns_from_arrow(schema: &ArrowSchema) -> Result<Vec<Column>, TableError> {
    schema
        .fields()
        .iter()
        .map(|field| {
            let ty = primitive_type(field.data_type()).context(UnsupportedTypeSnafu {
                column: field.name(),
                data_type: field.data_type().to_string(),
            })?;
            Ok(Column::new(field.name(), ty))
        })
        .collect()
}

/// Columns of an existing Iceberg schema, in order.
pub fn columns_from_iceberg(schema: &Schema) -> Result<Vec<Column>, TableError> {
    schema
        .as_struct()
        .fields()
        .iter()
        .map(|field| match field.field_type.as_ref() {
            Type::Primitive(ty) => Ok(Column::new(&field.name, ty.clone())),
            other => UnsupportedTypeSnafu {
                column: &field.name,
                data_type: other.to_string(),
            }
            .fail(),
        })
        .collect()
}

/// Build an Iceberg schema, assigning field ids from 1 in column order.
pub fn iceberg_schema(columns: &[Column]) -> Result<Schema, TableError> {
    let fields: Vec<NestedFieldRef> = columns
        .iter()
        .zip(1..)
        .map(|(column, id)| {
            Arc::new(NestedField::optional(
                id,
                &column.name,
                Type::Primitive(column.ty.clone()),
            ))
        })
        .collect();

    Schema::builder()
        .with_schema_id(0)
        .with_fields(fields)
        .build()
        .context(IcebergSchemaSnafu)
}

/// Arrow schema the data files are written with.
pub fn arrow_schema(schema: &Schema) -> Result<ArrowSchemaRef, TableError> {
    Ok(Arc::new(
        schema_to_arrow_schema(schema).context(ArrowSchemaSnafu)?,
    ))
}

/// The type a column takes when `incoming` is merged into `table`.
///
/// Identical types are kept. Widening goes in either direction, so the wider
/// of the two wins: int→long, float→double and a decimal precision increase
/// at equal scale. Anything else cannot be merged.
pub fn merged_type(table: &PrimitiveType, incoming: &PrimitiveType) -> Option<PrimitiveType> {
    use PrimitiveType::*;

    if table == incoming {
        return Some(table.clone());
    }
    match (table, incoming) {
        (Int, Long) | (Long, Int) => Some(Long),
        (Float, Double) | (Double, Float) => Some(Double),
        (
            Decimal {
                precision: p1,
                scale: s1,
            },
            Decimal {
                precision: p2,
                scale: s2,
            },
        ) if s1 == s2 => Some(Decimal {
            precision: *p1.max(p2),
            scale: *s1,
        }),
        _ => None,
    }
}

/// Outcome of merging an incoming schema into an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSchema {
    pub columns: Vec<Column>,
    /// Incoming columns the table did not have.
    pub added: Vec<String>,
    /// Table columns absent from the incoming data; written as nulls.
    pub missing: Vec<String>,
    /// Columns whose type was widened.
    pub widened: Vec<String>,
}

impl MergedSchema {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.missing.is_empty() && self.widened.is_empty()
    }
}

/// Merge `incoming` into the `existing` table columns.
///
/// Existing columns keep their position, new columns are appended in
/// incoming order. With `auto_merge` off any difference is an error.
pub fn merge_columns(
    table: &str,
    existing: &[Column],
    incoming: &[Column],
    auto_merge: bool,
) -> Result<MergedSchema, TableError> {
    let incoming_by_name: HashMap<&str, &Column> =
        incoming.iter().map(|c| (c.name.as_str(), c)).collect();
    let existing_names: HashSet<&str> = existing.iter().map(|c| c.name.as_str()).collect();

    let mut columns = Vec::with_capacity(existing.len() + incoming.len());
    let mut missing = Vec::new();
    let mut widened = Vec::new();

    for column in existing {
        match incoming_by_name.get(column.name.as_str()) {
            Some(other) => {
                let ty = merged_type(&column.ty, &other.ty).context(IncompatibleTypeSnafu {
                    column: &column.name,
                    table_type: column.ty.to_string(),
                    incoming_type: other.ty.to_string(),
                })?;
                if ty != column.ty {
                    widened.push(column.name.clone());
                }
                columns.push(Column::new(&column.name, ty));
            }
            None => {
                missing.push(column.name.clone());
                columns.push(column.clone());
            }
        }
    }

    let added: Vec<String> = incoming
        .iter()
        .filter(|c| !existing_names.contains(c.name.as_str()))
        .map(|c| {
            columns.push(c.clone());
            c.name.clone()
        })
        .collect();

    let merged = MergedSchema {
        columns,
        added,
        missing,
        widened,
    };

    ensure!(auto_merge || merged.is_unchanged(), SchemaMismatchSnafu { table });

    if !merged.is_unchanged() {
        debug!(
            table,
            added = ?merged.added,
            missing = ?merged.missing,
            widened = ?merged.widened,
            "Merged table schema"
        );
    }

    Ok(merged)
}

/// Check that `column` exists with a date type, as identity partitioning
/// on the run date requires.
pub fn require_partition_column(columns: &[Column], column: &str) -> Result<usize, TableError> {
    columns
        .iter()
        .position(|c| c.name == column && c.ty == PrimitiveType::Date)
        .context(MissingPartitionColumnSnafu { column })
}

/// Reorder, cast and null-fill `batch` so it matches `target` exactly.
pub fn align_batch(batch: &RecordBatch, target: &ArrowSchemaRef) -> Result<RecordBatch, TableError> {
    let source = batch.schema();
    let columns = target
        .fields()
        .iter()
        .map(|field| {
            let array: ArrayRef = match source.index_of(field.name()) {
                Ok(i) => {
                    let column = batch.column(i);
                    if column.data_type() == field.data_type() {
                        column.clone()
                    } else {
                        cast(column, field.data_type()).context(AlignColumnSnafu {
                            column: field.name(),
                        })?
                    }
                }
                Err(_) => new_null_array(field.data_type(), batch.num_rows()),
            };
            Ok(array)
        })
        .collect::<Result<Vec<_>, TableError>>()?;

    RecordBatch::try_new(Arc::clone(target), columns).context(AlignBatchSnafu)
}
