mod cli;
mod commands;
mod config;
mod error;
mod output;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::CliConfig;
use openask_engine::ChatEngine;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _guard = init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}

fn init_logging(verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("openask")
        .join("logs");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "openask.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env("OPENASK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true);
    let stderr_layer = verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    guard
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = match &cli.config {
        Some(path) => CliConfig::load_from_path(Some(PathBuf::from(path))),
        None => CliConfig::load(),
    };
    let config = file_config.engine_config(&cli.connection)?;
    tracing::debug!(protocol = %config.protocol, api_url = %config.api_url, "Loaded configuration");

    match cli.command {
        Commands::Ask { question } => {
            let engine = ChatEngine::new(config)?;
            commands::ask::run(engine, question, cli.format).await
        }
        Commands::Chat => {
            let engine = ChatEngine::new(config)?;
            commands::chat::run(engine).await
        }
        Commands::Session { command } => {
            commands::session::run(config, command, cli.format).await
        }
    }
}
