use songplay_lake_core::{ConfigError, PipelineError};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display(
        "Pipeline run failed: {source}. \
         Earlier tables may already have been replaced; rerun after fixing the input."
    ))]
    Run {
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },
}
