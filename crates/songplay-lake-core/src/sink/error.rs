//! Error types and SNAFU context selectors for the table sink.
//!
//! Selectors are `pub(crate)` so [`crate::tables`] can attach table context
//! when building or decoding record batches.

use arrow::{datatypes::DataType, error::ArrowError};
use parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::storage::StorageError;

/// Result alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors from writing or reading partitioned tables.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SinkError {
    /// A partition column (or partition filter column) is not part of the
    /// table. Raised before anything is written.
    #[snafu(display("Cannot partition {table} by {column}: no such column"))]
    UnknownPartitionColumn {
        /// Table being written or read.
        table: String,
        /// The requested partition column.
        column: String,
    },

    /// Partition columns must be strings or integers.
    #[snafu(display("Cannot partition {table} by {column} of type {datatype}"))]
    UnsupportedPartitionType {
        /// Table being written.
        table: String,
        /// The offending column.
        column: String,
        /// Its Arrow type.
        datatype: DataType,
    },

    /// Building, slicing, or concatenating record batches failed.
    #[snafu(display("Arrow error on table {table}: {source}"))]
    Arrow {
        /// Table being processed.
        table: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Encoding or decoding a Parquet file failed.
    #[snafu(display("Parquet error on {path} (table {table}): {source}"))]
    Parquet {
        /// Table being processed.
        table: String,
        /// File involved, relative to the output root.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Storage-layer failure while writing, swapping, or reading files.
    #[snafu(display("Storage error on table {table}: {source}"))]
    Storage {
        /// Table being processed.
        table: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// The table has never been completely written at this location.
    #[snafu(display("Table {table} is not materialized: {path} is missing"))]
    TableNotMaterialized {
        /// Table that was requested.
        table: String,
        /// Completion marker that was looked for.
        path: String,
    },

    /// A directory inside a partitioned table is not `<column>=<value>`.
    #[snafu(display("Unexpected directory {path} in partitioned table {table}"))]
    InvalidPartitionDir {
        /// Table being read.
        table: String,
        /// Offending directory.
        path: String,
    },

    /// A partition directory value does not parse as the column's type.
    #[snafu(display("Partition value {value:?} for {table}.{column} does not match its type"))]
    InvalidPartitionValue {
        /// Table being read.
        table: String,
        /// Partition column.
        column: String,
        /// Raw directory value.
        value: String,
    },

    /// A stored file lacks a column of the requested schema.
    #[snafu(display("Table {table} has no column {column}"))]
    MissingColumn {
        /// Table being read.
        table: String,
        /// Missing column.
        column: String,
    },

    /// A stored column has a different type than requested.
    #[snafu(display("Column {table}.{column} has type {actual}, expected {expected}"))]
    ColumnType {
        /// Table being read.
        table: String,
        /// Column with the mismatch.
        column: String,
        /// Requested type.
        expected: DataType,
        /// Stored type.
        actual: DataType,
    },
}
