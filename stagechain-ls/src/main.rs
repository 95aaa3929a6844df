//! `stagechain-ls`: list the files of a directory that match a pattern.
//!
//! ```text
//! stagechain-ls '*.rs'
//! stagechain-ls Cargo.toml      # same as '*.toml'
//! stagechain-ls --dir /tmp
//! ```

mod steps;

use clap::Parser;
use stagechain::observability::{init_tracing, LogFormat};
use stagechain::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use steps::{FilterFiles, ListFiles, LsContext, ParseArguments, PrintFiles};

#[derive(Parser, Debug)]
#[command(name = "stagechain-ls")]
#[command(about = "List directory entries matching a wildcard")]
#[command(version)]
struct Cli {
    /// Wildcard such as '*.rs', or a file whose extension selects the wildcard
    pattern: Option<String>,

    /// Directory to list
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Give up after this many milliseconds [default: STAGECHAIN_DEADLINE_MS, or 5000]
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn build_pipeline<W>(
    printer: PrintFiles<W>,
    config: PipelineConfig,
) -> Result<Pipeline<LsContext, String>, PipelineError>
where
    W: Write + Send + 'static,
{
    Ok(PipelineBuilder::new(ParseArguments)
        .append(ListFiles)
        .append(FilterFiles)
        .append(printer)
        .with_name("ls")
        .with_config(config)?
        .build())
}

const DEFAULT_DEADLINE: Duration = Duration::from_millis(5000);

/// The `--deadline-ms` flag wins over the environment, which wins over the default.
fn apply_deadline(config: PipelineConfig, deadline_ms: Option<u64>) -> PipelineConfig {
    match (deadline_ms, config.deadline) {
        (Some(ms), _) => config.with_deadline(Duration::from_millis(ms)),
        (None, Some(_)) => config,
        (None, None) => config.with_deadline(DEFAULT_DEADLINE),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = apply_deadline(PipelineConfig::from_env()?, cli.deadline_ms);
    let pipeline = build_pipeline(PrintFiles::stdout(), config)?;
    let ctx = Arc::new(LsContext::new(cli.pattern, cli.dir));

    let summary = pipeline.execute(&CancellationToken::new(), &ctx).await?;
    match summary.to_json() {
        Ok(json) => debug!(summary = %json, "ls finished"),
        Err(err) => debug!(error = %err, listed = summary.drained_items, "ls finished"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    if let Err(err) = init_tracing(format, &cli.log_level) {
        eprintln!("Failed to initialize logging: {err}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Pipeline execution error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
