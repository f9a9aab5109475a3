//! Iceberg table sink.
//!
//! Replaces the contents of `<catalog>.<namespace>.<table>` with one record
//! set. Schema merging and batch alignment happen before the catalog is
//! touched. The replacement is then built and committed as a staged table
//! next to the live one; only once that succeeds is the live table dropped
//! and the staged table renamed into its place. A failed write therefore
//! leaves an existing table, its properties and its snapshots as they were.

use arrow::array::RecordBatch;
use async_trait::async_trait;
use iceberg::spec::{
    DataFile, DataFileFormat, Literal, Schema, Struct, Transform, UnboundPartitionSpec,
};
use iceberg::table::Table;
use iceberg::transaction::{ApplyTransactionAction, Transaction};
use iceberg::writer::base_writer::data_file_writer::DataFileWriterBuilder;
use iceberg::writer::file_writer::ParquetWriterBuilder;
use iceberg::writer::file_writer::location_generator::{
    DefaultFileNameGenerator, DefaultLocationGenerator,
};
use iceberg::writer::{IcebergWriter, IcebergWriterBuilder};
use iceberg::{Catalog, NamespaceIdent, TableCreation, TableIdent};
use iceberg_catalog_glue::{GlueCatalog, GlueCatalogConfig};
use snafu::IntoError;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::parquet::writer_properties;
use super::schema::{
    MergedSchema, align_batch, arrow_schema, columns_from_arrow, columns_from_iceberg,
    iceberg_schema, merge_columns, require_partition_column,
};
use super::{TableSink, TableWriteRequest, TableWriteSummary, WriteOptions, WriteOutcome};
use crate::config::CatalogConfig;
use crate::emit;
use crate::error::{
    CatalogInitSnafu, CommitSnafu, CreateTableSnafu, DataFileWriteSnafu, DropTableSnafu,
    IcebergSchemaSnafu, LoadTableSnafu, NamespaceSnafu, RenameTableSnafu, TableError,
};
use crate::metrics::events::{DataFilesCommitted, TableWriteCompleted};
use crate::transform::days_since_epoch;

/// Everything needed to materialize the table, computed without side effects.
#[derive(Debug)]
pub struct WritePlan {
    pub merged: MergedSchema,
    pub schema: Schema,
    pub partition_spec: UnboundPartitionSpec,
    pub batch: RecordBatch,
}

/// Merge the incoming batch with the `existing` table columns and shape the
/// batch for writing.
pub fn plan_write(
    table: &str,
    existing: Option<&Schema>,
    batch: &RecordBatch,
    options: &WriteOptions,
) -> Result<WritePlan, TableError> {
    let incoming = columns_from_arrow(&batch.schema())?;

    let merged = match existing {
        Some(schema) => merge_columns(
            table,
            &columns_from_iceberg(schema)?,
            &incoming,
            options.schema_auto_merge,
        )?,
        None => MergedSchema {
            columns: incoming,
            added: Vec::new(),
            missing: Vec::new(),
            widened: Vec::new(),
        },
    };

    let position = require_partition_column(&merged.columns, &options.partition_column)?;
    let schema = iceberg_schema(&merged.columns)?;
    let source_id = schema.as_struct().fields()[position].id;

    let partition_spec = UnboundPartitionSpec::builder()
        .with_spec_id(0)
        .add_partition_field(source_id, &options.partition_column, Transform::Identity)
        .context(IcebergSchemaSnafu)?
        .build();

    let batch = align_batch(batch, &arrow_schema(&schema)?)?;

    Ok(WritePlan {
        merged,
        schema,
        partition_spec,
        batch,
    })
}

/// Table sink backed by an Iceberg catalog.
pub struct IcebergSink {
    catalog: Arc<dyn Catalog>,
}

impl std::fmt::Debug for IcebergSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IcebergSink")
    }
}

impl IcebergSink {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Connect to a Glue catalog.
    ///
    /// `properties` configure both the Glue client and the FileIO used for
    /// table data (e.g. `s3.region`, `s3.endpoint`).
    pub async fn glue(config: &CatalogConfig, warehouse: String) -> Result<Self, TableError> {
        let props = config.properties.clone();
        let builder = GlueCatalogConfig::builder().warehouse(warehouse);
        let glue_config = match (config.uri.clone(), config.catalog_id.clone()) {
            (Some(uri), Some(id)) => builder.uri(uri).catalog_id(id).props(props).build(),
            (Some(uri), None) => builder.uri(uri).props(props).build(),
            (None, Some(id)) => builder.catalog_id(id).props(props).build(),
            (None, None) => builder.props(props).build(),
        };

        let catalog = GlueCatalog::new(glue_config)
            .await
            .context(CatalogInitSnafu)?;
        Ok(Self::new(Arc::new(catalog)))
    }

    async fn existing_table(&self, ident: &TableIdent, name: &str) -> Result<Option<Table>, TableError> {
        let exists = self
            .catalog
            .table_exists(ident)
            .await
            .context(LoadTableSnafu { table: name })?;
        if !exists {
            return Ok(None);
        }

        let table = self
            .catalog
            .load_table(ident)
            .await
            .context(LoadTableSnafu { table: name })?;
        Ok(Some(table))
    }

    async fn write_data_files(
        &self,
        table: &Table,
        batch: RecordBatch,
        request: &TableWriteRequest<'_>,
        name: &str,
    ) -> Result<Vec<DataFile>, TableError> {
        let metadata = table.metadata();
        let location_generator = DefaultLocationGenerator::new(metadata.clone())
            .context(DataFileWriteSnafu { table: name })?;
        let file_name_generator = DefaultFileNameGenerator::new(
            request.run_id.to_string(),
            None,
            DataFileFormat::Parquet,
        );

        let parquet_writer = ParquetWriterBuilder::new(
            writer_properties(request.options.compression),
            metadata.current_schema().clone(),
            table.file_io().clone(),
            location_generator,
            file_name_generator,
        );

        let partition = Struct::from_iter([Some(Literal::date(days_since_epoch(
            request.partition_date,
        )))]);
        let mut writer = DataFileWriterBuilder::new(
            parquet_writer,
            Some(partition),
            metadata.default_partition_spec_id(),
        )
        .build()
        .await
        .context(DataFileWriteSnafu { table: name })?;

        writer
            .write(batch)
            .await
            .context(DataFileWriteSnafu { table: name })?;
        writer
            .close()
            .await
            .context(DataFileWriteSnafu { table: name })
    }

    /// Write `batch` into `table` and commit it as one snapshot. Returns the
    /// number of data files and their total size.
    async fn append(
        &self,
        table: &Table,
        batch: RecordBatch,
        request: &TableWriteRequest<'_>,
        name: &str,
    ) -> Result<(usize, u64), TableError> {
        if batch.num_rows() == 0 {
            return Ok((0, 0));
        }

        let data_files = self.write_data_files(table, batch, request, name).await?;
        let count = data_files.len();
        let bytes = data_files.iter().map(|f| f.file_size_in_bytes()).sum();

        let tx = Transaction::new(table);
        let action = tx.fast_append().add_data_files(data_files);
        let tx = action.apply(tx).context(CommitSnafu { table: name })?;
        tx.commit(self.catalog.as_ref())
            .await
            .context(CommitSnafu { table: name })?;

        Ok((count, bytes))
    }

    async fn discard(&self, staged: &TableIdent, name: &str) {
        match self.catalog.drop_table(staged).await {
            Ok(()) => debug!("Discarded staged table {}", name),
            Err(e) => warn!("Could not drop staged table {}: {}", name, e),
        }
    }

    async fn write(&self, request: TableWriteRequest<'_>) -> Result<TableWriteSummary, TableError> {
        let name = request.table.to_string();
        let namespace = NamespaceIdent::new(request.table.namespace.clone());
        let ident = TableIdent::new(namespace.clone(), request.table.table.clone());

        let existing = self.existing_table(&ident, &name).await?;
        let plan = plan_write(
            &name,
            existing.as_ref().map(|t| t.metadata().current_schema().as_ref()),
            request.batch,
            request.options,
        )?;
        let records = plan.batch.num_rows() as u64;

        let staged = staging_ident(&ident, request.run_id);
        let staged_name = format!(
            "{}.{}.{}",
            request.table.catalog,
            request.table.namespace,
            staged.name()
        );

        let creation = TableCreation::builder()
            .name(staged.name().to_string())
            .location(request.location.to_string())
            .schema(plan.schema)
            .partition_spec(plan.partition_spec)
            .properties(
                request
                    .options
                    .table_properties(request.job_name, request.run_id),
            )
            .build();
        let table = self
            .catalog
            .create_table(&namespace, creation)
            .await
            .context(CreateTableSnafu {
                table: &staged_name,
            })?;
        debug!("Staging replacement of {} as {}", name, staged_name);

        let (file_count, bytes) = match self
            .append(&table, plan.batch, &request, &staged_name)
            .await
        {
            Ok(appended) => appended,
            Err(err) => {
                self.discard(&staged, &staged_name).await;
                return Err(err);
            }
        };

        // The live table is untouched up to this point.
        if existing.is_some() {
            if let Err(source) = self.catalog.drop_table(&ident).await {
                self.discard(&staged, &staged_name).await;
                return Err(DropTableSnafu { table: &name }.into_error(source));
            }
            debug!("Dropped {} for replacement", name);
        }

        self.catalog
            .rename_table(&staged, &ident)
            .await
            .context(RenameTableSnafu {
                staged: &staged_name,
                table: &name,
            })?;

        emit!(DataFilesCommitted {
            count: file_count as u64,
            bytes,
        });

        Ok(TableWriteSummary {
            replaced: existing.is_some(),
            data_files: file_count,
            records,
            bytes,
            added_columns: plan.merged.added,
        })
    }
}

/// Identifier of the table a run stages its replacement under,
/// `<table>__<run id without dashes>`.
fn staging_ident(ident: &TableIdent, run_id: &str) -> TableIdent {
    let suffix: String = run_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    TableIdent::new(
        ident.namespace().clone(),
        format!("{}__{}", ident.name(), suffix),
    )
}

#[async_trait]
impl TableSink for IcebergSink {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), TableError> {
        let ident = NamespaceIdent::new(namespace.to_string());
        let exists = self
            .catalog
            .namespace_exists(&ident)
            .await
            .context(NamespaceSnafu { namespace })?;

        if !exists {
            self.catalog
                .create_namespace(&ident, HashMap::new())
                .await
                .context(NamespaceSnafu { namespace })?;
            info!("Created namespace {}", namespace);
        }
        Ok(())
    }

    async fn create_or_replace(&self, request: TableWriteRequest<'_>) -> WriteOutcome {
        let start = Instant::now();
        let result = self.write(request).await;
        emit!(TableWriteCompleted {
            duration: start.elapsed()
        });
        WriteOutcome::from(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::sink::schema::Column;
    use crate::transform::{INGESTION_DATE_COLUMN, with_ingestion_date};
    use arrow::array::{Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
    use crate::paths::TableAddress;
    use chrono::NaiveDate;
    use iceberg::MemoryCatalog;
    use iceberg::io::FileIOBuilder;
    use iceberg::spec::PrimitiveType;
    use tempfile::TempDir;

    fn options() -> WriteOptions {
        WriteOptions::from_config(&TableConfig::default(), INGESTION_DATE_COLUMN)
    }

    fn batch() -> RecordBatch {
        let batch = RecordBatch::try_new(
            Arc::new(ArrowSchema::new(vec![
                Field::new("id", DataType::Int64, true),
                Field::new("region", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["eu", "us"])),
            ],
        )
        .unwrap();
        with_ingestion_date(&batch, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()).unwrap()
    }

    #[test]
    fn test_plan_for_new_table() {
        let plan = plan_write("c.sales.orders", None, &batch(), &options()).unwrap();

        let fields = plan.schema.as_struct().fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2].name, INGESTION_DATE_COLUMN);

        let partition = &plan.partition_spec.fields()[0];
        assert_eq!(partition.source_id, 3);
        assert_eq!(partition.name, INGESTION_DATE_COLUMN);
        assert_eq!(partition.transform, Transform::Identity);
        assert_eq!(plan.batch.num_rows(), 2);
    }

    #[test]
    fn test_plan_merges_with_existing_table() {
        let existing = iceberg_schema(&[
            Column::new("id", PrimitiveType::Int),
            Column::new("legacy", PrimitiveType::String),
            Column::new(INGESTION_DATE_COLUMN, PrimitiveType::Date),
        ])
        .unwrap();

        let plan = plan_write("c.sales.orders", Some(&existing), &batch(), &options()).unwrap();

        let names: Vec<_> = plan
            .merged
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["id", "legacy", INGESTION_DATE_COLUMN, "region"]);
        assert_eq!(plan.merged.columns[0].ty, PrimitiveType::Long);
        assert_eq!(plan.merged.added, ["region"]);
        assert_eq!(plan.batch.num_columns(), 4);
        assert_eq!(plan.batch.column(1).null_count(), 2);
        assert_eq!(plan.partition_spec.fields()[0].source_id, 3);
    }

    #[test]
    fn test_plan_rejects_incompatible_existing_column() {
        let existing = iceberg_schema(&[
            Column::new("id", PrimitiveType::String),
            Column::new(INGESTION_DATE_COLUMN, PrimitiveType::Date),
        ])
        .unwrap();

        let err = plan_write("c.sales.orders", Some(&existing), &batch(), &options()).unwrap_err();
        assert!(matches!(err, TableError::IncompatibleType { ref column, .. } if column == "id"));
    }

    #[test]
    fn test_plan_requires_partition_column() {
        let plain = RecordBatch::try_new(
            Arc::new(ArrowSchema::new(vec![Field::new("id", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(vec![1]))],
        )
        .unwrap();

        let err = plan_write("c.sales.orders", None, &plain, &options()).unwrap_err();
        assert!(matches!(err, TableError::MissingPartitionColumn { .. }));
    }

    #[test]
    fn test_staging_ident() {
        let ident = TableIdent::new(NamespaceIdent::new("sales".to_string()), "orders".to_string());
        let staged = staging_ident(&ident, "0190A1B2-c3d4-7e5f-8a9b-0c1d2e3f4a5b");

        assert_eq!(staged.namespace(), ident.namespace());
        assert_eq!(staged.name(), "orders__0190a1b2c3d47e5f8a9b0c1d2e3f4a5b");
    }

    fn memory_catalog(dir: &TempDir) -> Arc<MemoryCatalog> {
        let file_io = FileIOBuilder::new_fs_io().build().unwrap();
        Arc::new(MemoryCatalog::new(
            file_io,
            Some(dir.path().to_str().unwrap().to_string()),
        ))
    }

    fn address() -> TableAddress {
        TableAddress {
            catalog: "glue_catalog".to_string(),
            namespace: "sales".to_string(),
            table: "orders".to_string(),
        }
    }

    fn orders_ident() -> TableIdent {
        TableIdent::new(NamespaceIdent::new("sales".to_string()), "orders".to_string())
    }

    fn header_only(columns: &[&str]) -> RecordBatch {
        let schema = Arc::new(ArrowSchema::new(
            columns
                .iter()
                .map(|c| Field::new(*c, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ));
        let empty = RecordBatch::new_empty(schema);
        with_ingestion_date(&empty, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()).unwrap()
    }

    async fn replace(
        sink: &IcebergSink,
        location: &str,
        batch: &RecordBatch,
        run_id: &str,
    ) -> WriteOutcome {
        let address = address();
        let options = options();
        sink.create_or_replace(TableWriteRequest {
            table: &address,
            location,
            batch,
            partition_date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            options: &options,
            job_name: "ingest-orders",
            run_id,
        })
        .await
    }

    fn succeeded(outcome: WriteOutcome) -> TableWriteSummary {
        match outcome {
            WriteOutcome::Success(summary) => summary,
            WriteOutcome::Failure(err) => panic!("write failed: {err}"),
        }
    }

    fn failed(outcome: WriteOutcome) -> TableError {
        match outcome {
            WriteOutcome::Success(summary) => panic!("write succeeded: {summary:?}"),
            WriteOutcome::Failure(err) => err,
        }
    }

    async fn table_names(catalog: &MemoryCatalog) -> Vec<String> {
        let mut names: Vec<String> = catalog
            .list_tables(&NamespaceIdent::new("sales".to_string()))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_ensure_namespace_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let catalog = memory_catalog(&dir);
        let sink = IcebergSink::new(catalog.clone());

        sink.ensure_namespace("sales").await.unwrap();
        sink.ensure_namespace("sales").await.unwrap();

        let namespaces = catalog.list_namespaces(None).await.unwrap();
        assert_eq!(namespaces, [NamespaceIdent::new("sales".to_string())]);
    }

    #[tokio::test]
    async fn test_header_only_batch_creates_table_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let catalog = memory_catalog(&dir);
        let sink = IcebergSink::new(catalog.clone());
        sink.ensure_namespace("sales").await.unwrap();
        let location = format!("{}/processed/orders", dir.path().display());

        let summary =
            succeeded(replace(&sink, &location, &header_only(&["id", "customer"]), "r1").await);
        assert!(!summary.replaced);
        assert_eq!(summary.data_files, 0);
        assert_eq!(summary.records, 0);

        let table = catalog.load_table(&orders_ident()).await.unwrap();
        let metadata = table.metadata();
        assert!(metadata.current_snapshot().is_none());
        assert_eq!(metadata.location(), location);
        assert_eq!(metadata.properties()["icefall.run-id"], "r1");
        assert_eq!(
            metadata.default_partition_spec().fields()[0].name,
            INGESTION_DATE_COLUMN
        );
        assert_eq!(table_names(&catalog).await, ["orders"]);
    }

    #[tokio::test]
    async fn test_replace_swaps_in_merged_table() {
        let dir = TempDir::new().unwrap();
        let catalog = memory_catalog(&dir);
        let sink = IcebergSink::new(catalog.clone());
        sink.ensure_namespace("sales").await.unwrap();
        let location = format!("{}/processed/orders", dir.path().display());

        succeeded(replace(&sink, &location, &header_only(&["id"]), "r1").await);
        let before = catalog.load_table(&orders_ident()).await.unwrap();

        let summary =
            succeeded(replace(&sink, &location, &header_only(&["id", "channel"]), "r2").await);
        assert!(summary.replaced);
        assert_eq!(summary.added_columns, ["channel"]);

        let after = catalog.load_table(&orders_ident()).await.unwrap();
        assert_ne!(after.metadata().uuid(), before.metadata().uuid());
        assert_eq!(after.metadata().properties()["icefall.run-id"], "r2");
        let columns: Vec<_> = after
            .metadata()
            .current_schema()
            .as_struct()
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(columns, ["id", INGESTION_DATE_COLUMN, "channel"]);
        assert_eq!(table_names(&catalog).await, ["orders"]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_existing_table() {
        let dir = TempDir::new().unwrap();
        let catalog = memory_catalog(&dir);
        let sink = IcebergSink::new(catalog.clone());
        sink.ensure_namespace("sales").await.unwrap();
        let location = format!("{}/processed/orders", dir.path().display());

        succeeded(replace(&sink, &location, &batch().slice(0, 0), "r1").await);
        let before = catalog.load_table(&orders_ident()).await.unwrap();

        // The in-memory catalog cannot commit snapshots, so a write with
        // rows fails after its data files are written.
        let err = failed(replace(&sink, &location, &batch(), "r2").await);
        assert!(matches!(err, TableError::Commit { .. }));

        let after = catalog.load_table(&orders_ident()).await.unwrap();
        assert_eq!(after.metadata().uuid(), before.metadata().uuid());
        assert_eq!(after.metadata().properties()["icefall.run-id"], "r1");
        assert_eq!(table_names(&catalog).await, ["orders"]);
    }

    #[tokio::test]
    async fn test_schema_conflict_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let catalog = memory_catalog(&dir);
        let sink = IcebergSink::new(catalog.clone());
        sink.ensure_namespace("sales").await.unwrap();
        let location = format!("{}/processed/orders", dir.path().display());

        // `id` lands as a string column; the next batch carries it as long.
        succeeded(replace(&sink, &location, &header_only(&["id"]), "r1").await);
        let before = catalog.load_table(&orders_ident()).await.unwrap();

        let err = failed(replace(&sink, &location, &batch(), "r2").await);
        assert!(matches!(err, TableError::IncompatibleType { ref column, .. } if column == "id"));

        let after = catalog.load_table(&orders_ident()).await.unwrap();
        assert_eq!(after.metadata().uuid(), before.metadata().uuid());
        assert_eq!(table_names(&catalog).await, ["orders"]);
    }
}
