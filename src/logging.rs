//! Tracing setup: a daily rolling log file, plus stderr when verbose.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "snapgram=info";

/// Directory holding the rolling log files
pub fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("snapgram").join("logs"))
}

/// Filter from SNAPGRAM_LOG, then RUST_LOG, then the default.
fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env("SNAPGRAM_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the program or buffered lines are lost.
pub fn init(dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "snapgram.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_target(true)
      .with_writer(std::io::stderr)
  });

  tracing_subscriber::registry()
    .with(env_filter())
    .with(stderr_layer)
    .with(
      fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(file_writer),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

  Ok(guard)
}
