//! Hive-style partition directories: `<column>=<value>` path segments.
//!
//! Values are percent-escaped outside `[A-Za-z0-9._-]` so any string is a
//! safe single path component. A leading `.` or `_` is always escaped. Nulls
//! use [`NULL_PARTITION`].

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, RecordBatch, StringArray, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::{DataType, Schema};
use snafu::prelude::*;

use crate::sink::{
    ArrowSnafu, InvalidPartitionValueSnafu, SinkResult, UnknownPartitionColumnSnafu,
    UnsupportedPartitionTypeSnafu,
};

/// Directory value used for a null partition key.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Equality predicate on one partition column, used to prune directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFilter {
    /// Partition column name.
    pub column: String,
    /// Required value in its directory text form; `None` selects nulls.
    pub value: Option<String>,
}

impl PartitionFilter {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: Some(value.to_string()),
        }
    }

    /// `column IS NULL`.
    pub fn is_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: None,
        }
    }
}

/// Percent-escape a partition value.
///
/// A leading `_` or `.` is escaped too, so no value can spell
/// [`NULL_PARTITION`] or a hidden name.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, byte) in value.bytes().enumerate() {
        let safe = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || (i > 0 && matches!(byte, b'.' | b'_'));
        if safe {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Reverse [`escape_value`]. Returns `None` on a broken escape sequence or
/// non-UTF-8 output.
pub fn unescape_value(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Directory name for one partition level.
pub fn dir_name(column: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("{column}={}", escape_value(v)),
        None => format!("{column}={NULL_PARTITION}"),
    }
}

/// Parse a `<column>=<value>` directory name. `Some((column, None))` is the
/// null partition; `None` means the name is not a partition directory.
pub fn parse_dir_name(name: &str) -> Option<(String, Option<String>)> {
    let (column, raw) = name.split_once('=')?;
    if column.is_empty() {
        return None;
    }
    if raw == NULL_PARTITION {
        return Some((column.to_string(), None));
    }
    Some((column.to_string(), Some(unescape_value(raw)?)))
}

fn is_supported(datatype: &DataType) -> bool {
    matches!(datatype, DataType::Utf8 | DataType::Int32 | DataType::Int64)
}

/// Resolve partition column names to indices in `schema`, rejecting unknown
/// columns and unsupported types.
pub fn resolve_columns(table: &str, schema: &Schema, columns: &[&str]) -> SinkResult<Vec<usize>> {
    columns
        .iter()
        .map(|column| {
            let idx = schema
                .index_of(column)
                .ok()
                .context(UnknownPartitionColumnSnafu {
                    table,
                    column: *column,
                })?;
            let datatype = schema.field(idx).data_type();
            ensure!(
                is_supported(datatype),
                UnsupportedPartitionTypeSnafu {
                    table,
                    column: *column,
                    datatype: datatype.clone(),
                }
            );
            Ok(idx)
        })
        .collect()
}

/// Text form of one cell of a supported partition column.
fn cell_text(array: &ArrayRef, row: usize) -> Option<String> {
    if array.is_null(row) {
        return None;
    }
    let any = array.as_any();
    if let Some(a) = any.downcast_ref::<StringArray>() {
        Some(a.value(row).to_string())
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        Some(a.value(row).to_string())
    } else {
        any.downcast_ref::<Int32Array>()
            .map(|a| a.value(row).to_string())
    }
}

/// One partition of a batch: its key values and the rows without the
/// partition columns.
#[derive(Debug, Clone)]
pub struct PartitionSlice {
    /// Partition values, one per partition column.
    pub values: Vec<Option<String>>,
    /// Rows of this partition, partition columns removed.
    pub batch: RecordBatch,
}

/// Split `batch` by the partition columns at `partition_idx`.
///
/// Slices come out sorted by partition values; row order inside a slice is
/// the input order.
pub fn split_batch(
    table: &str,
    batch: &RecordBatch,
    partition_idx: &[usize],
) -> SinkResult<Vec<PartitionSlice>> {
    let data_idx: Vec<usize> = (0..batch.num_columns())
        .filter(|i| !partition_idx.contains(i))
        .collect();
    let data = batch.project(&data_idx).context(ArrowSnafu { table })?;

    if partition_idx.is_empty() {
        return Ok(vec![PartitionSlice {
            values: Vec::new(),
            batch: data,
        }]);
    }

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let key = partition_idx
            .iter()
            .map(|&i| cell_text(batch.column(i), row))
            .collect();
        groups.entry(key).or_default().push(row as u32);
    }

    groups
        .into_iter()
        .map(|(values, rows)| {
            let indices = UInt32Array::from(rows);
            let batch = take_record_batch(&data, &indices).context(ArrowSnafu { table })?;
            Ok(PartitionSlice { values, batch })
        })
        .collect()
}

/// Column of `len` copies of a partition value, typed per `datatype`.
pub fn constant_column(
    table: &str,
    column: &str,
    datatype: &DataType,
    value: Option<&str>,
    len: usize,
) -> SinkResult<ArrayRef> {
    let invalid = || {
        InvalidPartitionValueSnafu {
            table,
            column,
            value: value.unwrap_or_default(),
        }
        .build()
    };

    let array: ArrayRef = match datatype {
        DataType::Utf8 => Arc::new(StringArray::from(vec![value; len])),
        DataType::Int64 => {
            let parsed = value
                .map(|v| v.parse::<i64>().map_err(|_| invalid()))
                .transpose()?;
            Arc::new(Int64Array::from(vec![parsed; len]))
        }
        DataType::Int32 => {
            let parsed = value
                .map(|v| v.parse::<i32>().map_err(|_| invalid()))
                .transpose()?;
            Arc::new(Int32Array::from(vec![parsed; len]))
        }
        other => {
            return UnsupportedPartitionTypeSnafu {
                table,
                column,
                datatype: other.clone(),
            }
            .fail();
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Field;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn escape_round_trips_awkward_values() {
        for raw in ["AR5KOSW1187FB35FF4", "Los Angeles, CA", "a/b=c%d", "", "Björk"] {
            let escaped = escape_value(raw);
            assert!(!escaped.contains('/'));
            assert!(!escaped.contains('='));
            assert_eq!(unescape_value(&escaped).as_deref(), Some(raw));
        }
        assert_eq!(escape_value("a b"), "a%20b");
    }

    #[test]
    fn default_partition_name_is_escaped_as_a_value() {
        let escaped = escape_value(NULL_PARTITION);
        assert_ne!(escaped, NULL_PARTITION);
        assert_eq!(escaped, "%5F_HIVE_DEFAULT_PARTITION__");
        assert_eq!(
            parse_dir_name(&dir_name("artist_id", Some(NULL_PARTITION))),
            Some(("artist_id".to_string(), Some(NULL_PARTITION.to_string())))
        );

        assert_eq!(escape_value(".hidden"), "%2Ehidden");
        assert_eq!(escape_value("a_b.c"), "a_b.c");
        assert_eq!(escape_value("-1"), "-1");
    }

    #[test]
    fn broken_escape_is_rejected() {
        assert_eq!(unescape_value("abc%2"), None);
        assert_eq!(unescape_value("%ZZ"), None);
    }

    #[test]
    fn dir_names_parse_back() {
        assert_eq!(dir_name("year", Some("2018")), "year=2018");
        assert_eq!(
            parse_dir_name("year=2018"),
            Some(("year".to_string(), Some("2018".to_string())))
        );
        assert_eq!(
            parse_dir_name(&dir_name("artist_id", None)),
            Some(("artist_id".to_string(), None))
        );
        assert_eq!(parse_dir_name("part-00000.parquet"), None);
        assert_eq!(parse_dir_name("=x"), None);
    }

    #[test]
    fn resolve_columns_rejects_unknown_and_float_columns() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("score", DataType::Float64, true),
        ]);
        assert!(resolve_columns("t", &schema, &["id"]).is_ok());

        let unknown = resolve_columns("t", &schema, &["year"]).expect_err("unknown column");
        assert!(unknown.to_string().contains("no such column"));

        let float = resolve_columns("t", &schema, &["score"]).expect_err("float column");
        assert!(float.to_string().contains("Float64"));
    }

    #[test]
    fn split_batch_groups_rows_and_drops_partition_columns() -> TestResult {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("year", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
                Arc::new(Int64Array::from(vec![Some(2001), None, Some(1999), Some(2001)])),
            ],
        )?;

        let slices = split_batch("t", &batch, &[1])?;
        let values: Vec<_> = slices.iter().map(|s| s.values.clone()).collect();
        assert_eq!(
            values,
            vec![
                vec![None],
                vec![Some("1999".to_string())],
                vec![Some("2001".to_string())],
            ]
        );

        let last = &slices[2].batch;
        assert_eq!(last.num_columns(), 1);
        let names = last
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or("name column")?;
        assert_eq!(names.value(0), "a");
        assert_eq!(names.value(1), "d");
        Ok(())
    }

    #[test]
    fn constant_column_parses_typed_values() -> TestResult {
        let col = constant_column("t", "month", &DataType::Int32, Some("11"), 3)?;
        let months = col.as_any().downcast_ref::<Int32Array>().ok_or("int32")?;
        assert_eq!(months.values().to_vec(), vec![11, 11, 11]);

        let nulls = constant_column("t", "artist_id", &DataType::Utf8, None, 2)?;
        assert_eq!(nulls.null_count(), 2);

        assert!(constant_column("t", "year", &DataType::Int64, Some("abc"), 1).is_err());
        Ok(())
    }
}
