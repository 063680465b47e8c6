//! CLI for running the songplay-lake pipeline.

mod error;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::info;
use snafu::ResultExt;
use songplay_lake_core::{PipelineConfig, run_local};

use crate::error::{CliResult, ConfigSnafu, RunSnafu};

#[derive(Debug, clap::Args)]
struct ConfigArgs {
    /// TOML config file (input_root, output_root, optional [aws])
    #[arg(long, env = "SONGPLAY_LAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the input root
    #[arg(long = "input-root")]
    input_root: Option<PathBuf>,

    /// Override the output root
    #[arg(long = "output-root")]
    output_root: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read song and log data and write every table
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Also write users_latest (one row per user, latest snapshot)
        #[arg(long = "latest-users", default_value_t = false)]
        latest_users: bool,
    },

    /// Print the effective configuration with credentials redacted
    ShowConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Debug, Parser)]
#[command(name = "songplay-lake", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

async fn resolve_config(args: ConfigArgs) -> CliResult<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).await.context(ConfigSnafu)?,
        None => PipelineConfig::default(),
    };
    if let Some(input_root) = args.input_root {
        config.input_root = input_root;
    }
    if let Some(output_root) = args.output_root {
        config.output_root = output_root;
    }
    Ok(config)
}

async fn cmd_run(args: ConfigArgs, latest_users: bool) -> CliResult<()> {
    let start = Instant::now();
    let mut config = resolve_config(args).await?;
    config.latest_users |= latest_users;

    let summary = run_local(&config).await.context(RunSnafu)?;
    for report in &summary.reports {
        println!(
            "wrote {}: {} rows in {} files",
            report.table, report.rows, report.files
        );
    }
    info!("pipeline finished in {} ms", start.elapsed().as_millis());
    Ok(())
}

async fn cmd_show_config(args: ConfigArgs) -> CliResult<()> {
    let config = resolve_config(args).await?;
    print!("{config}");
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Run {
            config,
            latest_users,
        } => cmd_run(config, latest_users).await,
        Command::ShowConfig { config } => cmd_show_config(config).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
