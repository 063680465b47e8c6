//! Error types and SNAFU context selectors for [`crate::pipeline`].
//!
//! `PipelineError` is what a run reports to its caller. Source and sink
//! failures are wrapped with the stage that hit them so the message names the
//! pattern or table involved.

use snafu::prelude::*;

use crate::sink::SinkError;
use crate::source::SourceError;

/// Result alias for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that abort a pipeline run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    /// Reading catalog or event records failed.
    #[snafu(display("Failed to read records matching {pattern}: {source}"))]
    ReadRecords {
        /// Glob pattern that was being read.
        pattern: String,
        /// Underlying source error.
        #[snafu(source)]
        source: SourceError,
    },

    /// Encoding rows into a batch or writing a table failed.
    #[snafu(display("Failed to write table {table}: {source}"))]
    WriteTable {
        /// Table being written.
        table: String,
        /// Underlying sink error.
        #[snafu(source)]
        source: SinkError,
    },

    /// Reading a previously written table back failed.
    #[snafu(display("Failed to read table {table}: {source}"))]
    ReadTable {
        /// Table being read.
        table: String,
        /// Underlying sink error.
        #[snafu(source)]
        source: SinkError,
    },

    /// Two fact rows were assigned the same surrogate key.
    #[snafu(display(
        "Duplicate songplay_id {songplay_id} assigned in partition {partition}"
    ))]
    DuplicateSongplayId {
        /// The colliding key.
        songplay_id: i64,
        /// Input partition of the second row carrying it.
        partition: usize,
    },
}
