use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pastel::commands;
use pastel::config::Config;
use pastel::App;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the TOML config file. Defaults to ./config.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Delete pastes that have expired or run out of views.
    PurgeExpired,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // try to load .env, ignoring any errors
    _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path, true)?,
        None => Config::load(DEFAULT_CONFIG_PATH.as_ref(), false)?,
    };
    if config.test_mode {
        warn!("test mode enabled, request clocks can be overridden via header");
    }

    let app = App::new(config)
        .await
        .context("failed to initialize app")?;

    match cli.command {
        Command::Serve => commands::serve::run(app).await,
        Command::PurgeExpired => commands::purge_expired::run(app).await,
    }
}
