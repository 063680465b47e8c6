//! Table sink: persists whole tables under an output root and reads them back.
//!
//! A table lives in `<root>/<table>/`. Partitioned tables nest one
//! `<column>=<value>` directory per partition column; data files are Parquet
//! and never contain the partition columns themselves. A `_SUCCESS` marker
//! is the last file written, and readers refuse a table without it.
//!
//! Writes are overwrite-on-conflict and swap whole tables: the new version is
//! fully written into a staging directory before the previous one is moved
//! out of the way, so readers see either the old table or the new one.

mod error;
mod parquet_sink;
mod partition;

pub use error::{SinkError, SinkResult};
pub(crate) use error::{
    ArrowSnafu, ColumnTypeSnafu, InvalidPartitionDirSnafu, InvalidPartitionValueSnafu,
    MissingColumnSnafu, ParquetSnafu, StorageSnafu, TableNotMaterializedSnafu,
    UnknownPartitionColumnSnafu, UnsupportedPartitionTypeSnafu,
};
pub use parquet_sink::ParquetTableSink;
pub use partition::{NULL_PARTITION, PartitionFilter, escape_value, unescape_value};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;

use crate::tables::TableSpec;

/// Name of the completion marker inside a table directory.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Outcome of one table write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Table name.
    pub table: String,
    /// Rows written.
    pub rows: usize,
    /// Data files written (the marker is not counted).
    pub files: usize,
}

/// Persists and re-reads output tables.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Replace the table named by `spec` with `batch`, partitioned by
    /// `spec.partition_by`.
    ///
    /// Unknown partition columns are rejected before anything is written.
    async fn write_table(&self, spec: &TableSpec, batch: &RecordBatch) -> SinkResult<WriteReport>;

    /// Remove the table named by `spec` if it exists. Returns whether a
    /// table was removed.
    async fn drop_table(&self, spec: &TableSpec) -> SinkResult<bool>;

    /// Read a completely written table back in `schema`'s column order,
    /// visiting only partitions that satisfy every filter.
    ///
    /// Fails with [`SinkError::TableNotMaterialized`] if the table has not
    /// been written at this location.
    async fn read_table(
        &self,
        spec: &TableSpec,
        schema: SchemaRef,
        filters: &[PartitionFilter],
    ) -> SinkResult<RecordBatch>;
}
