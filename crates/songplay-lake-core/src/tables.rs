//! Output table definitions: names, partition columns, Arrow schemas, and
//! conversions between row structs and record batches.
//!
//! Timestamps are stored as `Timestamp(Millisecond, "UTC")`. Calendar fields
//! of the time table are `Int32`; song years stay `Int64` as read from JSON.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use snafu::prelude::*;

use crate::model::{Artist, Song, Songplay, TimeRow, User};
use crate::sink::{ArrowSnafu, ColumnTypeSnafu, MissingColumnSnafu, SinkResult};

/// Time zone recorded on every timestamp column.
pub const UTC: &str = "UTC";

/// Name and partitioning of an output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Directory name under the output root.
    pub name: &'static str,
    /// Partition columns, outermost directory level first.
    pub partition_by: &'static [&'static str],
}

/// `songs`, partitioned by release year then artist.
pub const SONGS: TableSpec = TableSpec {
    name: "songs",
    partition_by: &["year", "artist_id"],
};

/// `artists`, unpartitioned.
pub const ARTISTS: TableSpec = TableSpec {
    name: "artists",
    partition_by: &[],
};

/// `users`, unpartitioned.
pub const USERS: TableSpec = TableSpec {
    name: "users",
    partition_by: &[],
};

/// `users_latest`, one row per user id; unpartitioned.
pub const USERS_LATEST: TableSpec = TableSpec {
    name: "users_latest",
    partition_by: &[],
};

/// `time`, partitioned by year then month.
pub const TIME: TableSpec = TableSpec {
    name: "time",
    partition_by: &["year", "month"],
};

/// `songplays`, unpartitioned: it carries no year or month column.
pub const SONGPLAYS: TableSpec = TableSpec {
    name: "songplays",
    partition_by: &[],
};

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some(UTC.into()))
}

/// Schema of `songs`.
pub fn songs_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("year", DataType::Int64, true),
        Field::new("duration", DataType::Float64, true),
    ]))
}

/// Schema of `artists`.
pub fn artists_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("latitude", DataType::Float64, true),
        Field::new("longitude", DataType::Float64, true),
    ]))
}

/// Schema of `users` and `users_latest`.
pub fn users_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, true),
        Field::new("first_name", DataType::Utf8, true),
        Field::new("last_name", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
    ]))
}

/// Schema of `time`.
pub fn time_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("start_time", timestamp_type(), false),
        Field::new("hour", DataType::Int32, false),
        Field::new("day", DataType::Int32, false),
        Field::new("week", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("year", DataType::Int32, false),
        Field::new("weekday", DataType::Int32, false),
    ]))
}

/// Schema of `songplays`.
pub fn songplays_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("songplay_id", DataType::Int64, false),
        Field::new("start_time", timestamp_type(), true),
        Field::new("user_id", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("session_id", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
    ]))
}

fn strings<'a, R: 'a>(rows: &'a [R], f: impl Fn(&'a R) -> Option<&'a str>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn build(table: &str, schema: SchemaRef, columns: Vec<ArrayRef>) -> SinkResult<RecordBatch> {
    RecordBatch::try_new(schema, columns).context(ArrowSnafu { table })
}

/// Record batch for `songs`.
pub fn songs_batch(rows: &[Song]) -> SinkResult<RecordBatch> {
    build(
        SONGS.name,
        songs_schema(),
        vec![
            strings(rows, |r| r.song_id.as_deref()),
            strings(rows, |r| r.title.as_deref()),
            strings(rows, |r| r.artist_id.as_deref()),
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.year).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.duration).collect::<Vec<_>>(),
            )),
        ],
    )
}

/// Record batch for `artists`.
pub fn artists_batch(rows: &[Artist]) -> SinkResult<RecordBatch> {
    build(
        ARTISTS.name,
        artists_schema(),
        vec![
            strings(rows, |r| r.artist_id.as_deref()),
            strings(rows, |r| r.name.as_deref()),
            strings(rows, |r| r.location.as_deref()),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.latitude).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.longitude).collect::<Vec<_>>(),
            )),
        ],
    )
}

/// Record batch for `spec`, which is [`USERS`] or [`USERS_LATEST`]; both
/// share one shape.
pub fn users_batch(spec: &TableSpec, rows: &[User]) -> SinkResult<RecordBatch> {
    build(
        spec.name,
        users_schema(),
        vec![
            strings(rows, |r| r.user_id.as_deref()),
            strings(rows, |r| r.first_name.as_deref()),
            strings(rows, |r| r.last_name.as_deref()),
            strings(rows, |r| r.gender.as_deref()),
            strings(rows, |r| r.level.as_deref()),
        ],
    )
}

/// Record batch for `time`.
pub fn time_batch(rows: &[TimeRow]) -> SinkResult<RecordBatch> {
    let int32 = |f: fn(&TimeRow) -> i32| -> ArrayRef {
        Arc::new(Int32Array::from(rows.iter().map(f).collect::<Vec<_>>()))
    };

    build(
        TIME.name,
        time_schema(),
        vec![
            Arc::new(
                TimestampMillisecondArray::from(
                    rows.iter()
                        .map(|r| r.start_time.timestamp_millis())
                        .collect::<Vec<_>>(),
                )
                .with_timezone(UTC),
            ),
            int32(|r| r.hour as i32),
            int32(|r| r.day as i32),
            int32(|r| r.week as i32),
            int32(|r| r.month as i32),
            int32(|r| r.year),
            int32(|r| r.weekday as i32),
        ],
    )
}

/// Record batch for `songplays`.
pub fn songplays_batch(rows: &[Songplay]) -> SinkResult<RecordBatch> {
    build(
        SONGPLAYS.name,
        songplays_schema(),
        vec![
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.songplay_id).collect::<Vec<_>>(),
            )),
            Arc::new(
                TimestampMillisecondArray::from(
                    rows.iter()
                        .map(|r| r.start_time.map(|t| t.timestamp_millis()))
                        .collect::<Vec<_>>(),
                )
                .with_timezone(UTC),
            ),
            strings(rows, |r| r.user_id.as_deref()),
            strings(rows, |r| r.level.as_deref()),
            strings(rows, |r| r.song_id.as_deref()),
            strings(rows, |r| r.artist_id.as_deref()),
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.session_id).collect::<Vec<_>>(),
            )),
            strings(rows, |r| r.location.as_deref()),
            strings(rows, |r| r.user_agent.as_deref()),
        ],
    )
}

fn column<'a, T: 'static>(
    table: &str,
    batch: &'a RecordBatch,
    name: &str,
    expected: &DataType,
) -> SinkResult<&'a T> {
    let array = batch.column_by_name(name).context(MissingColumnSnafu {
        table,
        column: name,
    })?;
    array.as_any().downcast_ref::<T>().context(ColumnTypeSnafu {
        table,
        column: name,
        expected: expected.clone(),
        actual: array.data_type().clone(),
    })
}

fn opt_string(col: &StringArray, row: usize) -> Option<String> {
    (!col.is_null(row)).then(|| col.value(row).to_string())
}

/// Decode `songs` rows from a batch read back from the sink.
pub fn songs_from_batch(batch: &RecordBatch) -> SinkResult<Vec<Song>> {
    let table = SONGS.name;
    let song_id = column::<StringArray>(table, batch, "song_id", &DataType::Utf8)?;
    let title = column::<StringArray>(table, batch, "title", &DataType::Utf8)?;
    let artist_id = column::<StringArray>(table, batch, "artist_id", &DataType::Utf8)?;
    let year = column::<Int64Array>(table, batch, "year", &DataType::Int64)?;
    let duration = column::<Float64Array>(table, batch, "duration", &DataType::Float64)?;

    Ok((0..batch.num_rows())
        .map(|row| Song {
            song_id: opt_string(song_id, row),
            title: opt_string(title, row),
            artist_id: opt_string(artist_id, row),
            year: (!year.is_null(row)).then(|| year.value(row)),
            duration: (!duration.is_null(row)).then(|| duration.value(row)),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{time_row, timestamp_from_millis};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn song(id: &str, year: Option<i64>) -> Song {
        Song {
            song_id: Some(id.to_string()),
            title: Some("Intro".to_string()),
            artist_id: None,
            year,
            duration: Some(12.5),
        }
    }

    #[test]
    fn songs_batch_decodes_back_to_rows() -> TestResult {
        let rows = vec![song("S1", Some(1999)), song("S2", None)];
        let batch = songs_batch(&rows)?;
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(songs_from_batch(&batch)?, rows);
        Ok(())
    }

    #[test]
    fn songs_from_batch_reports_missing_column() -> TestResult {
        let batch = artists_batch(&[])?;
        let err = songs_from_batch(&batch).expect_err("artists batch has no song_id");
        assert!(err.to_string().contains("song_id"));
        Ok(())
    }

    #[test]
    fn users_batch_is_labelled_with_its_table() -> TestResult {
        let user = User {
            user_id: Some("15".to_string()),
            first_name: None,
            last_name: None,
            gender: None,
            level: Some("paid".to_string()),
        };
        let batch = users_batch(&USERS_LATEST, &[user])?;
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema(), users_schema());

        let err = build(USERS_LATEST.name, users_schema(), Vec::new())
            .expect_err("no columns for a five-column schema");
        assert!(err.to_string().contains("table users_latest"));
        Ok(())
    }

    #[test]
    fn time_batch_uses_utc_millisecond_timestamps() -> TestResult {
        let ts = timestamp_from_millis(1_541_440_781_000).ok_or("out of range")?;
        let batch = time_batch(&[time_row(ts)])?;

        assert_eq!(batch.schema().field(0).data_type(), &timestamp_type());
        let start = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .ok_or("start_time type")?;
        assert_eq!(start.value(0), 1_541_440_781_000);

        let year = batch
            .column_by_name("year")
            .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
            .ok_or("year column")?;
        assert_eq!(year.value(0), 2018);
        Ok(())
    }

    #[test]
    fn songplays_batch_keeps_null_song_and_artist() -> TestResult {
        let batch = songplays_batch(&[Songplay {
            songplay_id: 7,
            start_time: None,
            user_id: Some("8".to_string()),
            level: Some("free".to_string()),
            song_id: None,
            artist_id: None,
            session_id: Some(139),
            location: None,
            user_agent: None,
        }])?;

        let song_id = batch.column_by_name("song_id").ok_or("song_id")?;
        assert!(song_id.is_null(0));
        assert!(batch.column_by_name("year").is_none());
        Ok(())
    }
}
