//! [`TableSink`] writing Hive-partitioned Parquet on a storage location.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, warn};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;

use crate::sink::partition::{
    PartitionFilter, PartitionSlice, constant_column, dir_name, parse_dir_name, resolve_columns,
    split_batch,
};
use crate::sink::{
    ArrowSnafu, ColumnTypeSnafu, InvalidPartitionDirSnafu, MissingColumnSnafu, ParquetSnafu,
    SUCCESS_MARKER, SinkResult, StorageSnafu, TableNotMaterializedSnafu, TableSink,
    UnknownPartitionColumnSnafu, WriteReport,
};
use crate::storage::{self, StorageCredentials, StorageLocation};
use crate::tables::TableSpec;

/// Directory under the output root holding in-flight table versions.
pub const STAGING_DIR: &str = "_staging";

const DATA_FILE: &str = "part-00000.parquet";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Names starting with `_` or `.` are bookkeeping, never table data.
fn is_hidden(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

/// Parquet-backed [`TableSink`] rooted at a [`StorageLocation`].
#[derive(Debug, Clone)]
pub struct ParquetTableSink {
    location: StorageLocation,
    credentials: Option<StorageCredentials>,
}

impl ParquetTableSink {
    /// Sink writing tables under `location`.
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            credentials: None,
        }
    }

    /// Attach backend credentials. The local backend has nothing to
    /// authenticate against and only records them.
    pub fn with_credentials(mut self, credentials: Option<StorageCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn staging_dir(table: &str) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().timestamp_micros();
        Path::new(STAGING_DIR).join(format!("{table}-{}-{stamp}-{seq}", std::process::id()))
    }

    async fn write_slices(
        &self,
        spec: &TableSpec,
        staging: &Path,
        slices: &[PartitionSlice],
    ) -> SinkResult<usize> {
        let table = spec.name;
        let mut files = 0;

        for slice in slices {
            let mut rel = staging.to_path_buf();
            for (column, value) in spec.partition_by.iter().zip(&slice.values) {
                rel.push(dir_name(column, value.as_deref()));
            }
            rel.push(DATA_FILE);

            let payload = encode_parquet(table, &rel, &slice.batch)?;
            storage::write_atomic(&self.location, &rel, &payload)
                .await
                .context(StorageSnafu { table })?;
            debug!("{table}: wrote {} rows to {}", slice.batch.num_rows(), rel.display());
            files += 1;
        }

        storage::write_atomic(&self.location, &staging.join(SUCCESS_MARKER), b"")
            .await
            .context(StorageSnafu { table })?;
        Ok(files)
    }

    /// Move the staged version into place, retiring the previous one.
    async fn swap_in(&self, table: &str, staging: &Path) -> SinkResult<()> {
        let live = PathBuf::from(table);
        let retired = PathBuf::from(format!("{}.old", staging.display()));

        let had_previous = storage::exists(&self.location, &live)
            .await
            .context(StorageSnafu { table })?;
        if had_previous {
            storage::rename(&self.location, &live, &retired)
                .await
                .context(StorageSnafu { table })?;
        }

        if let Err(source) = storage::rename(&self.location, staging, &live).await {
            if had_previous {
                // Put the previous version back so the table stays readable.
                if let Err(e) = storage::rename(&self.location, &retired, &live).await {
                    warn!("{table}: failed to restore previous version: {e}");
                }
            }
            return Err(source).context(StorageSnafu { table });
        }

        storage::remove_dir_all_if_exists(&self.location, &retired)
            .await
            .context(StorageSnafu { table })?;
        storage::remove_dir_if_empty(&self.location, Path::new(STAGING_DIR)).await;
        Ok(())
    }

    /// Leaf directories of `spec` that survive `filters`, with their
    /// partition values.
    async fn partition_dirs(
        &self,
        spec: &TableSpec,
        filters: &[PartitionFilter],
    ) -> SinkResult<Vec<(PathBuf, Vec<Option<String>>)>> {
        let table = spec.name;
        let mut frontier = vec![(PathBuf::from(table), Vec::new())];

        for column in spec.partition_by {
            let mut next = Vec::new();
            for (dir, values) in frontier {
                let entries = storage::list_dir(&self.location, &dir)
                    .await
                    .context(StorageSnafu { table })?;

                for entry in entries {
                    if is_hidden(&entry.name) {
                        continue;
                    }
                    let parsed = parse_dir_name(&entry.name)
                        .filter(|(c, _)| entry.is_dir && c == column);
                    let (_, value) = parsed.context(InvalidPartitionDirSnafu {
                        table,
                        path: entry.rel_path.display().to_string(),
                    })?;

                    let pruned = filters
                        .iter()
                        .any(|f| f.column == *column && f.value != value);
                    if pruned {
                        continue;
                    }

                    let mut values = values.clone();
                    values.push(value);
                    next.push((entry.rel_path, values));
                }
            }
            frontier = next;
        }
        Ok(frontier)
    }

    async fn read_dir_batches(
        &self,
        spec: &TableSpec,
        schema: &SchemaRef,
        dir: &Path,
        values: &[Option<String>],
        out: &mut Vec<RecordBatch>,
    ) -> SinkResult<()> {
        let table = spec.name;
        let entries = storage::list_dir(&self.location, dir)
            .await
            .context(StorageSnafu { table })?;

        for entry in entries {
            if entry.is_dir || is_hidden(&entry.name) || !entry.name.ends_with(".parquet") {
                continue;
            }
            let bytes = storage::read_all_bytes(&self.location, &entry.rel_path)
                .await
                .context(StorageSnafu { table })?;
            for batch in decode_parquet(table, &entry.rel_path, bytes)? {
                out.push(restore_partition_columns(spec, schema, values, &batch)?);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TableSink for ParquetTableSink {
    async fn write_table(&self, spec: &TableSpec, batch: &RecordBatch) -> SinkResult<WriteReport> {
        let table = spec.name;
        let partition_idx = resolve_columns(table, &batch.schema(), spec.partition_by)?;
        let slices = split_batch(table, batch, &partition_idx)?;

        let staging = Self::staging_dir(table);
        debug!(
            "{table}: staging {} slices in {} under {} (credentials: {:?})",
            slices.len(),
            staging.display(),
            self.location,
            self.credentials
        );
        let files = match self.write_slices(spec, &staging, &slices).await {
            Ok(files) => files,
            Err(e) => {
                if let Err(cleanup) =
                    storage::remove_dir_all_if_exists(&self.location, &staging).await
                {
                    warn!("{table}: failed to remove staging dir: {cleanup}");
                }
                return Err(e);
            }
        };

        self.swap_in(table, &staging).await?;

        Ok(WriteReport {
            table: table.to_string(),
            rows: batch.num_rows(),
            files,
        })
    }

    async fn drop_table(&self, spec: &TableSpec) -> SinkResult<bool> {
        let table = spec.name;
        let live = PathBuf::from(table);
        let existed = storage::exists(&self.location, &live)
            .await
            .context(StorageSnafu { table })?;
        if existed {
            storage::remove_dir_all_if_exists(&self.location, &live)
                .await
                .context(StorageSnafu { table })?;
        }
        Ok(existed)
    }

    async fn read_table(
        &self,
        spec: &TableSpec,
        schema: SchemaRef,
        filters: &[PartitionFilter],
    ) -> SinkResult<RecordBatch> {
        let table = spec.name;
        for filter in filters {
            ensure!(
                spec.partition_by.iter().any(|c| *c == filter.column),
                UnknownPartitionColumnSnafu {
                    table,
                    column: filter.column.clone(),
                }
            );
        }

        let marker = Path::new(table).join(SUCCESS_MARKER);
        let complete = storage::exists(&self.location, &marker)
            .await
            .context(StorageSnafu { table })?;
        ensure!(
            complete,
            TableNotMaterializedSnafu {
                table,
                path: marker.display().to_string(),
            }
        );

        let dirs = self.partition_dirs(spec, filters).await?;
        let mut batches = Vec::new();
        for (dir, values) in &dirs {
            self.read_dir_batches(spec, &schema, dir, values, &mut batches)
                .await?;
        }
        debug!(
            "{table}: read {} batches from {} partitions",
            batches.len(),
            dirs.len()
        );

        if batches.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }
        concat_batches(&schema, &batches).context(ArrowSnafu { table })
    }
}

fn encode_parquet(table: &str, rel: &Path, batch: &RecordBatch) -> SinkResult<Vec<u8>> {
    let path = rel.display().to_string();
    let mut buf = Vec::new();
    let props = WriterProperties::builder().build();

    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))
        .context(ParquetSnafu { table, path: &path })?;
    writer
        .write(batch)
        .context(ParquetSnafu { table, path: &path })?;
    writer.close().context(ParquetSnafu { table, path: &path })?;
    Ok(buf)
}

fn decode_parquet(table: &str, rel: &Path, bytes: Vec<u8>) -> SinkResult<Vec<RecordBatch>> {
    let path = rel.display().to_string();
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .context(ParquetSnafu { table, path: &path })?
        .build()
        .context(ParquetSnafu { table, path: &path })?;

    reader
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu { table })
}

/// Rebuild a batch in `schema` order, re-inserting partition columns from
/// their directory values.
fn restore_partition_columns(
    spec: &TableSpec,
    schema: &SchemaRef,
    values: &[Option<String>],
    batch: &RecordBatch,
) -> SinkResult<RecordBatch> {
    let table = spec.name;
    let columns = schema
        .fields()
        .iter()
        .map(|field| -> SinkResult<ArrayRef> {
            let name = field.name().as_str();
            if let Some(pos) = spec.partition_by.iter().position(|c| *c == name) {
                let value = values.get(pos).and_then(|v| v.as_deref());
                return constant_column(table, name, field.data_type(), value, batch.num_rows());
            }

            let column = batch.column_by_name(name).context(MissingColumnSnafu {
                table,
                column: name,
            })?;
            ensure!(
                column.data_type() == field.data_type(),
                ColumnTypeSnafu {
                    table,
                    column: name,
                    expected: field.data_type().clone(),
                    actual: column.data_type().clone(),
                }
            );
            Ok(column.clone())
        })
        .collect::<SinkResult<Vec<_>>>()?;

    RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu { table })
}
