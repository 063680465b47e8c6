//! End-to-end run: read records, project dimensions, assemble facts, write.
//!
//! Stages run strictly in order and the first error aborts the run. Each
//! table is written as soon as its own rows are ready. The fact assembler
//! reads `songs` back through the sink, so it only ever sees a completely
//! written songs table.

use arrow::array::RecordBatch;
use log::{info, warn};
use snafu::prelude::*;

use crate::catalog::{CatalogProjector, CatalogTables};
use crate::config::PipelineConfig;
use crate::error::{PipelineResult, ReadRecordsSnafu, ReadTableSnafu, WriteTableSnafu};
use crate::events::{EventProjector, EventTables, project_latest_users};
use crate::facts::FactAssembler;
use crate::model::Song;
use crate::sink::{ParquetTableSink, SinkResult, TableSink, WriteReport};
use crate::source::{
    LOG_DATA_PATTERN, LocalRecordSource, RecordCollection, RecordSource, SONG_DATA_PATTERN,
};
use crate::storage::StorageLocation;
use crate::tables::{
    ARTISTS, SONGPLAYS, SONGS, TIME, TableSpec, USERS, USERS_LATEST, artists_batch,
    songplays_batch, songs_batch, songs_from_batch, songs_schema, time_batch, users_batch,
};

/// A deferred transformation, evaluated once when its result is needed.
pub trait Materialize {
    /// What the transformation produces.
    type Output;
    /// How it can fail.
    type Error;

    /// Run the transformation, consuming it.
    fn materialize(self) -> Result<Self::Output, Self::Error>;
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// One report per table, in write order.
    pub reports: Vec<WriteReport>,
}

impl RunSummary {
    /// Report for `table`, if it was written.
    pub fn report(&self, table: &str) -> Option<&WriteReport> {
        self.reports.iter().find(|r| r.table == table)
    }
}

/// Wires a record source and a table sink together.
pub struct Pipeline<S, T> {
    source: S,
    sink: T,
    latest_users: bool,
}

impl Pipeline<LocalRecordSource, ParquetTableSink> {
    /// Pipeline over the local input and output roots of `config`.
    pub fn local(config: &PipelineConfig) -> Self {
        let source = LocalRecordSource::new(StorageLocation::local(&config.input_root))
            .with_credentials(config.credentials.clone());
        let sink = ParquetTableSink::new(StorageLocation::local(&config.output_root))
            .with_credentials(config.credentials.clone());
        Self::new(config, source, sink)
    }
}

impl<S: RecordSource, T: TableSink> Pipeline<S, T> {
    /// Pipeline reading from `source` and writing to `sink`.
    pub fn new(config: &PipelineConfig, source: S, sink: T) -> Self {
        Self {
            source,
            sink,
            latest_users: config.latest_users,
        }
    }

    /// Execute every stage.
    pub async fn run(&self) -> PipelineResult<RunSummary> {
        let mut reports = Vec::new();

        let catalog = self.read(SONG_DATA_PATTERN).await?;
        info!(
            "read {} catalog records from {} files",
            catalog.len(),
            catalog.files.len()
        );
        if catalog.is_empty() {
            warn!("{SONG_DATA_PATTERN} matched only files without records");
        }
        let Ok(CatalogTables { songs, artists }) =
            CatalogProjector::new(catalog.catalog_records()).materialize();
        reports.push(self.write(&SONGS, songs_batch(&songs)).await?);
        reports.push(self.write(&ARTISTS, artists_batch(&artists)).await?);

        let events = self.read(LOG_DATA_PATTERN).await?;
        info!(
            "read {} events from {} files",
            events.len(),
            events.files.len()
        );
        if events.is_empty() {
            warn!("{LOG_DATA_PATTERN} matched only files without records");
        }
        let Ok(EventTables { plays, users, time }) =
            EventProjector::new(events.event_partitions()).materialize();
        info!("{} play events", plays.len());
        reports.push(self.write(&USERS, users_batch(&USERS, &users)).await?);
        reports.push(self.write(&TIME, time_batch(&time)).await?);
        if self.latest_users {
            let latest = project_latest_users(&plays);
            reports.push(
                self.write(&USERS_LATEST, users_batch(&USERS_LATEST, &latest))
                    .await?,
            );
        } else {
            self.drop_stale(&USERS_LATEST).await?;
        }

        let songs = self.read_songs().await?;
        let songplays = FactAssembler::new(plays, songs).materialize()?;
        reports.push(self.write(&SONGPLAYS, songplays_batch(&songplays)).await?);

        Ok(RunSummary { reports })
    }

    async fn read(&self, pattern: &str) -> PipelineResult<RecordCollection> {
        self.source
            .read_records(pattern)
            .await
            .context(ReadRecordsSnafu { pattern })
    }

    async fn read_songs(&self) -> PipelineResult<Vec<Song>> {
        let table = SONGS.name;
        let batch = self
            .sink
            .read_table(&SONGS, songs_schema(), &[])
            .await
            .context(ReadTableSnafu { table })?;
        songs_from_batch(&batch).context(ReadTableSnafu { table })
    }

    /// Remove a table an earlier run wrote that this run does not produce.
    async fn drop_stale(&self, spec: &TableSpec) -> PipelineResult<()> {
        let table = spec.name;
        let dropped = self
            .sink
            .drop_table(spec)
            .await
            .context(WriteTableSnafu { table })?;
        if dropped {
            info!("removed stale {table}");
        }
        Ok(())
    }

    async fn write(
        &self,
        spec: &TableSpec,
        batch: SinkResult<RecordBatch>,
    ) -> PipelineResult<WriteReport> {
        let table = spec.name;
        let batch = batch.context(WriteTableSnafu { table })?;
        let report = self
            .sink
            .write_table(spec, &batch)
            .await
            .context(WriteTableSnafu { table })?;
        info!(
            "wrote {}: {} rows in {} files",
            report.table, report.rows, report.files
        );
        Ok(report)
    }
}

/// Run the local pipeline described by `config`.
pub async fn run_local(config: &PipelineConfig) -> PipelineResult<RunSummary> {
    info!(
        "running pipeline from {} to {}",
        config.input_root.display(),
        config.output_root.display()
    );
    Pipeline::local(config).run().await
}

