//! Songs and artists dimensions, projected from catalog records.

use std::convert::Infallible;

use crate::model::{Artist, CatalogRecord, Song, distinct_rows};
use crate::pipeline::Materialize;

/// Project the `songs` columns and drop exact-duplicate rows.
///
/// Two rows sharing a `song_id` but differing anywhere else are both kept.
pub fn project_songs(records: &[CatalogRecord]) -> Vec<Song> {
    distinct_rows(records.iter().map(|r| Song {
        song_id: r.song_id.clone(),
        title: r.title.clone(),
        artist_id: r.artist_id.clone(),
        year: r.year,
        duration: r.duration,
    }))
}

/// Project and rename the `artists` columns and drop exact-duplicate rows.
pub fn project_artists(records: &[CatalogRecord]) -> Vec<Artist> {
    distinct_rows(records.iter().map(|r| Artist {
        artist_id: r.artist_id.clone(),
        name: r.artist_name.clone(),
        location: r.artist_location.clone(),
        latitude: r.artist_latitude,
        longitude: r.artist_longitude,
    }))
}

/// Output of [`CatalogProjector`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTables {
    /// `songs` rows.
    pub songs: Vec<Song>,
    /// `artists` rows.
    pub artists: Vec<Artist>,
}

/// Derives the songs and artists dimensions from one catalog read.
#[derive(Debug, Clone)]
pub struct CatalogProjector {
    records: Vec<CatalogRecord>,
}

impl CatalogProjector {
    /// Projector over `records`.
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self { records }
    }
}

impl Materialize for CatalogProjector {
    type Output = CatalogTables;
    type Error = Infallible;

    fn materialize(self) -> Result<CatalogTables, Infallible> {
        Ok(CatalogTables {
            songs: project_songs(&self.records),
            artists: project_artists(&self.records),
        })
    }
}
