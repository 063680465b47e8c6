//! The `songplays` fact table: plays left-joined to the song catalog.
//!
//! Keys are `(partition << 33) + offset`, where `offset` counts the rows a
//! partition has emitted so far. That keeps them unique across partitions as
//! long as no partition emits 2^33 rows, and stable across reruns over the
//! same input files.

use std::collections::{HashMap, HashSet};

use snafu::prelude::*;

use crate::error::{DuplicateSongplayIdSnafu, PipelineError};
use crate::events::PlayEvent;
use crate::model::{Song, Songplay};
use crate::pipeline::Materialize;

/// Bits reserved for the per-partition row offset in a `songplay_id`.
pub const OFFSET_BITS: u32 = 33;

/// Surrogate key for the `offset`-th row emitted by input `partition`.
pub fn songplay_id(partition: usize, offset: u64) -> i64 {
    ((partition as i64) << OFFSET_BITS).wrapping_add(offset as i64)
}

/// Joins play events against the songs table.
#[derive(Debug, Clone)]
pub struct FactAssembler {
    plays: Vec<PlayEvent>,
    songs: Vec<Song>,
}

impl FactAssembler {
    /// Assembler over filtered `plays` and the `songs` rows read back from
    /// the sink.
    pub fn new(plays: Vec<PlayEvent>, songs: Vec<Song>) -> Self {
        Self { plays, songs }
    }

    fn songs_by_title(&self) -> HashMap<&str, Vec<&Song>> {
        let mut index: HashMap<&str, Vec<&Song>> = HashMap::new();
        for song in &self.songs {
            if let Some(title) = song.title.as_deref() {
                index.entry(title).or_default().push(song);
            }
        }
        index
    }
}

impl Materialize for FactAssembler {
    type Output = Vec<Songplay>;
    type Error = PipelineError;

    /// One row per (play, matching song); one row with null song and artist
    /// ids when a play matches nothing.
    fn materialize(self) -> Result<Vec<Songplay>, PipelineError> {
        let by_title = self.songs_by_title();
        let mut offsets: HashMap<usize, u64> = HashMap::new();
        let mut assigned = HashSet::new();
        let mut out = Vec::with_capacity(self.plays.len());

        for play in &self.plays {
            let matches = play
                .record
                .song_title
                .as_deref()
                .and_then(|title| by_title.get(title));
            let songs: Vec<Option<&Song>> = match matches {
                Some(songs) => songs.iter().copied().map(Some).collect(),
                None => vec![None],
            };

            for song in songs {
                let offset = offsets.entry(play.partition).or_insert(0);
                let id = songplay_id(play.partition, *offset);
                *offset += 1;
                ensure!(
                    assigned.insert(id),
                    DuplicateSongplayIdSnafu {
                        songplay_id: id,
                        partition: play.partition,
                    }
                );

                let r = &play.record;
                out.push(Songplay {
                    songplay_id: id,
                    start_time: play.start_time,
                    user_id: r.user_id.clone(),
                    level: r.level.clone(),
                    song_id: song.and_then(|s| s.song_id.clone()),
                    artist_id: song.and_then(|s| s.artist_id.clone()),
                    session_id: r.session_id,
                    location: r.location.clone(),
                    user_agent: r.user_agent.clone(),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::filter_plays;
    use crate::model::EventRecord;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn play(title: Option<&str>, user: &str) -> EventRecord {
        EventRecord {
            user_id: Some(user.to_string()),
            level: Some("paid".to_string()),
            page: Some("NextSong".to_string()),
            timestamp_ms: Some(1_541_440_781_000),
            song_title: title.map(str::to_string),
            session_id: Some(7),
            ..EventRecord::default()
        }
    }

    fn song(id: &str, title: Option<&str>, artist: &str) -> Song {
        Song {
            song_id: Some(id.to_string()),
            title: title.map(str::to_string),
            artist_id: Some(artist.to_string()),
            year: Some(2000),
            duration: Some(200.0),
        }
    }

    #[test]
    fn duplicate_titles_fan_out_in_songs_order() -> TestResult {
        let plays = filter_plays(&[vec![play(Some("X"), "1")]]);
        let songs = vec![song("S1", Some("X"), "A1"), song("S2", Some("X"), "A2")];

        let rows = FactAssembler::new(plays, songs).materialize()?;
        let matched: Vec<_> = rows
            .iter()
            .map(|r| (r.song_id.as_deref(), r.artist_id.as_deref()))
            .collect();
        assert_eq!(matched, vec![(Some("S1"), Some("A1")), (Some("S2"), Some("A2"))]);
        assert_ne!(rows[0].songplay_id, rows[1].songplay_id);
        Ok(())
    }

    #[test]
    fn unmatched_and_untitled_plays_keep_one_row_with_null_ids() -> TestResult {
        let plays = filter_plays(&[vec![play(Some("nobody knows"), "1"), play(None, "2")]]);
        // A song without a title must not match a play without one.
        let songs = vec![song("S1", None, "A1")];

        let rows = FactAssembler::new(plays, songs).materialize()?;
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.song_id, None);
            assert_eq!(row.artist_id, None);
            assert_eq!(row.level.as_deref(), Some("paid"));
            assert_eq!(row.session_id, Some(7));
        }
        Ok(())
    }

    #[test]
    fn keys_are_unique_and_scoped_by_partition() -> TestResult {
        let partitions = vec![
            vec![play(Some("X"), "1"), play(Some("Y"), "1")],
            vec![play(Some("X"), "2")],
        ];
        let songs = vec![song("S1", Some("X"), "A1"), song("S2", Some("X"), "A2")];

        let rows = FactAssembler::new(filter_plays(&partitions), songs).materialize()?;
        let ids: Vec<i64> = rows.iter().map(|r| r.songplay_id).collect();
        assert_eq!(
            ids,
            vec![0, 1, 2, 1 << OFFSET_BITS, (1 << OFFSET_BITS) + 1]
        );

        let distinct: HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), ids.len());
        Ok(())
    }

    #[test]
    fn assembly_is_deterministic() -> TestResult {
        let partitions = vec![vec![play(Some("X"), "1")], vec![play(Some("Z"), "3")]];
        let songs = vec![song("S1", Some("X"), "A1")];

        let first =
            FactAssembler::new(filter_plays(&partitions), songs.clone()).materialize()?;
        let second = FactAssembler::new(filter_plays(&partitions), songs).materialize()?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn key_layout_reserves_offset_bits() {
        assert_eq!(songplay_id(0, 0), 0);
        assert_eq!(songplay_id(0, 5), 5);
        assert_eq!(songplay_id(3, 1), 3 * (1 << 33) + 1);
    }
}
