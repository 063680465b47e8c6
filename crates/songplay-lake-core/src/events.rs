//! Play-event filtering plus the users and time dimensions.
//!
//! Calendar convention for the time dimension, all in UTC:
//! - `week` is the ISO-8601 week number (weeks start on Monday; week 1
//!   holds the year's first Thursday).
//! - `weekday` counts 1 = Sunday through 7 = Saturday.
//! - `year` is the calendar year of the timestamp, not the ISO week-year.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::model::{EventRecord, TimeRow, User, distinct_rows};
use crate::pipeline::Materialize;

/// `page` value of an event that represents a completed play.
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// A play event with its derived timestamp and input partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEvent {
    /// Index of the input file the event came from.
    pub partition: usize,
    /// `timestamp_ms / 1000` as a UTC point in time; `None` when the raw
    /// value is missing or out of range.
    pub start_time: Option<DateTime<Utc>>,
    /// The raw event.
    pub record: EventRecord,
}

/// Convert epoch milliseconds to a UTC timestamp.
pub fn timestamp_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Keep only `NextSong` events, in partition then input order.
pub fn filter_plays(partitions: &[Vec<EventRecord>]) -> Vec<PlayEvent> {
    partitions
        .iter()
        .enumerate()
        .flat_map(|(partition, records)| {
            records
                .iter()
                .filter(|r| r.page.as_deref() == Some(NEXT_SONG_PAGE))
                .map(move |r| PlayEvent {
                    partition,
                    start_time: r.timestamp_ms.and_then(timestamp_from_millis),
                    record: r.clone(),
                })
        })
        .collect()
}

fn user_of(play: &PlayEvent) -> User {
    let r = &play.record;
    User {
        user_id: r.user_id.clone(),
        first_name: r.first_name.clone(),
        last_name: r.last_name.clone(),
        gender: r.gender.clone(),
        level: r.level.clone(),
    }
}

/// One row per distinct user snapshot seen in the plays.
///
/// A user whose level changed appears once per level.
pub fn project_users(plays: &[PlayEvent]) -> Vec<User> {
    distinct_rows(plays.iter().map(user_of))
}

/// One row per user id: the snapshot from that user's most recent play.
///
/// Plays without a timestamp rank below any timestamped play; among equal
/// timestamps the later play in input order wins. Rows come out in order of
/// each user's first appearance.
pub fn project_latest_users(plays: &[PlayEvent]) -> Vec<User> {
    let mut order: Vec<Option<String>> = Vec::new();
    let mut latest: HashMap<Option<String>, (Option<DateTime<Utc>>, &PlayEvent)> = HashMap::new();

    for play in plays {
        match latest.entry(play.record.user_id.clone()) {
            Entry::Occupied(mut slot) => {
                if play.start_time >= slot.get().0 {
                    slot.insert((play.start_time, play));
                }
            }
            Entry::Vacant(slot) => {
                order.push(slot.key().clone());
                slot.insert((play.start_time, play));
            }
        }
    }

    order
        .iter()
        .filter_map(|key| latest.get(key).map(|(_, play)| user_of(play)))
        .collect()
}

/// Calendar breakdown of a single timestamp.
pub fn time_row(start_time: DateTime<Utc>) -> TimeRow {
    TimeRow {
        start_time,
        hour: start_time.hour(),
        day: start_time.day(),
        week: start_time.iso_week().week(),
        month: start_time.month(),
        year: start_time.year(),
        weekday: start_time.weekday().number_from_sunday(),
    }
}

/// One time row per distinct play timestamp, in first-seen order.
pub fn project_time(plays: &[PlayEvent]) -> Vec<TimeRow> {
    let mut seen = HashSet::new();
    plays
        .iter()
        .filter_map(|p| p.start_time)
        .filter(|ts| seen.insert(*ts))
        .map(time_row)
        .collect()
}

/// Output of [`EventProjector`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventTables {
    /// The filtered play events; input to the fact assembler.
    pub plays: Vec<PlayEvent>,
    /// `users` rows.
    pub users: Vec<User>,
    /// `time` rows.
    pub time: Vec<TimeRow>,
}

/// Filters raw events to plays and derives the users and time dimensions.
#[derive(Debug, Clone)]
pub struct EventProjector {
    partitions: Vec<Vec<EventRecord>>,
}

impl EventProjector {
    /// Projector over events grouped by input partition.
    pub fn new(partitions: Vec<Vec<EventRecord>>) -> Self {
        Self { partitions }
    }
}

impl Materialize for EventProjector {
    type Output = EventTables;
    type Error = Infallible;

    fn materialize(self) -> Result<EventTables, Infallible> {
        let plays = filter_plays(&self.partitions);
        let users = project_users(&plays);
        let time = project_time(&plays);
        Ok(EventTables { plays, users, time })
    }
}
