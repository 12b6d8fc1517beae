use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use perch_common::observability::{init_logging, LogFormat, LogOptions};
use perch_config::{PerchConfig, PerchConfigLoader};

mod harness;

/// Account-rotating ingestion daemon for a social-media service.
#[derive(Parser)]
#[command(name = "perch", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "perch.yaml", env = "PERCH_CONFIG")]
    config: PathBuf,

    /// Log directory; defaults to PERCH_LOG_DIR or ~/.local/share/perch.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Emit JSON log lines instead of text.
    #[arg(long)]
    json_logs: bool,

    /// Log to the rolling file only; no stderr mirror.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = init_logging(LogOptions {
        log_dir: cli.log_dir,
        emit_stderr: !cli.quiet,
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        ..LogOptions::default()
    })?;
    tracing::info!(log_path = %log_path.display(), "perch.starting");

    let cfg: PerchConfig = PerchConfigLoader::new().with_file(&cli.config).load()?;

    harness::run(cfg).await
}
