mod app;
mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use snapgram::{config, logging};

#[derive(Parser, Debug)]
#[command(name = "snapgram")]
#[command(about = "Command-line client for Snapgram")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/snapgram/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(&logging::log_dir()?, args.verbose)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let app = app::App::new(config)?;
  app.run(args.command).await
}
