//! Core of `songplay-lake`: turns song catalog and user activity JSON into a
//! partitioned Parquet star schema.
//!
//! - `songs` and `artists` dimensions from catalog records (`catalog`).
//! - `users` and `time` dimensions from play events (`events`).
//! - The `songplays` fact table, joining plays to songs (`facts`).
//! - A [`source::RecordSource`] reading JSON files by glob pattern, and a
//!   [`sink::TableSink`] writing Hive-partitioned Parquet tables.
//! - The [`pipeline::Pipeline`] that wires them together in order.
//!
//! All filesystem access goes through the `storage` helpers.
#![deny(missing_docs)]
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod facts;
pub mod model;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod tables;

pub use config::{ConfigError, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Materialize, Pipeline, RunSummary, run_local};
