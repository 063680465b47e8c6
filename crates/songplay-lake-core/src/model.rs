//! Row types for the raw inputs and for every output table.
//!
//! Input records are read permissively: each field is optional, and a key
//! that is missing, `null`, or holds a JSON value of the wrong type simply
//! becomes `None`. Rejecting a whole record is reserved for lines that are
//! not JSON objects at all (see [`crate::source`]).

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A JSON object as read from one line of an input file.
pub type JsonObject = Map<String, Value>;

/// One track/artist entry of the song catalog (`song_data`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRecord {
    /// Natural key of the song.
    pub song_id: Option<String>,
    /// Song title; also the join key for play events.
    pub title: Option<String>,
    /// Natural key of the artist.
    pub artist_id: Option<String>,
    /// Artist display name.
    pub artist_name: Option<String>,
    /// Free-text artist location.
    pub artist_location: Option<String>,
    /// Artist latitude in degrees.
    pub artist_latitude: Option<f64>,
    /// Artist longitude in degrees.
    pub artist_longitude: Option<f64>,
    /// Release year (`0` in the raw data often means unknown; kept as-is).
    pub year: Option<i64>,
    /// Track length in seconds.
    pub duration: Option<f64>,
}

impl CatalogRecord {
    /// Extract a catalog record from a parsed JSON object.
    pub fn from_json(obj: &JsonObject) -> Self {
        Self {
            song_id: str_field(obj, "song_id"),
            title: str_field(obj, "title"),
            artist_id: str_field(obj, "artist_id"),
            artist_name: str_field(obj, "artist_name"),
            artist_location: str_field(obj, "artist_location"),
            artist_latitude: f64_field(obj, "artist_latitude"),
            artist_longitude: f64_field(obj, "artist_longitude"),
            year: i64_field(obj, "year"),
            duration: f64_field(obj, "duration"),
        }
    }
}

/// One logged user action (`log_data`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    /// `userId`; logged-out sessions carry an empty string.
    pub user_id: Option<String>,
    /// `firstName`
    pub first_name: Option<String>,
    /// `lastName`
    pub last_name: Option<String>,
    /// `gender`
    pub gender: Option<String>,
    /// Subscription level (`free` / `paid`).
    pub level: Option<String>,
    /// Page the action happened on; `NextSong` marks a play.
    pub page: Option<String>,
    /// `ts`, milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
    /// `song`, the played title as logged by the client.
    pub song_title: Option<String>,
    /// `sessionId`
    pub session_id: Option<i64>,
    /// `location`
    pub location: Option<String>,
    /// `userAgent`
    pub user_agent: Option<String>,
}

impl EventRecord {
    /// Extract an event record from a parsed JSON object.
    pub fn from_json(obj: &JsonObject) -> Self {
        Self {
            user_id: id_field(obj, "userId"),
            first_name: str_field(obj, "firstName"),
            last_name: str_field(obj, "lastName"),
            gender: str_field(obj, "gender"),
            level: str_field(obj, "level"),
            page: str_field(obj, "page"),
            timestamp_ms: i64_field(obj, "ts"),
            song_title: str_field(obj, "song"),
            session_id: i64_field(obj, "sessionId"),
            location: str_field(obj, "location"),
            user_agent: str_field(obj, "userAgent"),
        }
    }
}

fn str_field(obj: &JsonObject, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Like [`str_field`], but integer ids are accepted and rendered as text.
fn id_field(obj: &JsonObject, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn f64_field(obj: &JsonObject, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

fn i64_field(obj: &JsonObject, key: &str) -> Option<i64> {
    let value = obj.get(key)?;
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = value.as_f64()?;
    // Integral floats (e.g. `2004.0`) are accepted; fractional ones are not.
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

/// A row of the `songs` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Natural key (not asserted unique).
    pub song_id: Option<String>,
    /// Song title.
    pub title: Option<String>,
    /// Artist natural key.
    pub artist_id: Option<String>,
    /// Release year; a partition column.
    pub year: Option<i64>,
    /// Track length in seconds.
    pub duration: Option<f64>,
}

/// A row of the `artists` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Artist {
    /// Natural key.
    pub artist_id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Free-text location.
    pub location: Option<String>,
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
}

/// A row of the `users` dimension: one snapshot of a user's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// Natural key.
    pub user_id: Option<String>,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Gender as logged.
    pub gender: Option<String>,
    /// Subscription level at the time of the play.
    pub level: Option<String>,
}

/// A row of the `time` dimension.
///
/// All calendar fields are computed in UTC from `start_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRow {
    /// The play timestamp (primary key).
    pub start_time: DateTime<Utc>,
    /// Hour of day, 0-23.
    pub hour: u32,
    /// Day of month, 1-31.
    pub day: u32,
    /// ISO-8601 week of year, 1-53.
    pub week: u32,
    /// Month, 1-12.
    pub month: u32,
    /// Calendar year.
    pub year: i32,
    /// Day of week, 1 = Sunday through 7 = Saturday.
    pub weekday: u32,
}

/// A row of the `songplays` fact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Songplay {
    /// Surrogate key, unique within a run.
    pub songplay_id: i64,
    /// Play timestamp.
    pub start_time: Option<DateTime<Utc>>,
    /// User natural key.
    pub user_id: Option<String>,
    /// Subscription level at play time.
    pub level: Option<String>,
    /// Matched song, `None` when the title found no catalog entry.
    pub song_id: Option<String>,
    /// Matched artist, `None` when the title found no catalog entry.
    pub artist_id: Option<String>,
    /// Client session id.
    pub session_id: Option<i64>,
    /// Client location.
    pub location: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

/// Hashable stand-in for an `Option<f64>` column value.
///
/// Two values are equal when they compare equal as numbers, except that all
/// NaNs are equal to each other; `-0.0` and `0.0` collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FloatKey(Option<u64>);

impl From<Option<f64>> for FloatKey {
    fn from(value: Option<f64>) -> Self {
        FloatKey(value.map(|v| {
            if v == 0.0 {
                0.0f64.to_bits()
            } else if v.is_nan() {
                f64::NAN.to_bits()
            } else {
                v.to_bits()
            }
        }))
    }
}

/// Rows that can be deduplicated on full-row equality.
pub(crate) trait RowIdentity {
    /// Hashable key covering every column of the row.
    type Key: Eq + Hash;

    fn row_key(&self) -> Self::Key;
}

impl RowIdentity for Song {
    type Key = (Option<String>, Option<String>, Option<String>, Option<i64>, FloatKey);

    fn row_key(&self) -> Self::Key {
        (
            self.song_id.clone(),
            self.title.clone(),
            self.artist_id.clone(),
            self.year,
            self.duration.into(),
        )
    }
}

impl RowIdentity for Artist {
    type Key = (Option<String>, Option<String>, Option<String>, FloatKey, FloatKey);

    fn row_key(&self) -> Self::Key {
        (
            self.artist_id.clone(),
            self.name.clone(),
            self.location.clone(),
            self.latitude.into(),
            self.longitude.into(),
        )
    }
}

impl RowIdentity for User {
    type Key = User;

    fn row_key(&self) -> Self::Key {
        self.clone()
    }
}

/// Remove exact-duplicate rows, keeping the first occurrence in input order.
pub(crate) fn distinct_rows<R: RowIdentity>(rows: impl IntoIterator<Item = R>) -> Vec<R> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.row_key()))
        .collect()
}
