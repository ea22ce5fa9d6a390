//! stepwise-agent CLI: serve the gateway or answer queries on stdin.
//!
//! Logging: set `RUST_LOG=stepwise_agent=debug` (or `warn`, `info`) to
//! adjust agent logs on stderr.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use stepwise_agent::{AppConfig, run_http};
use stepwise_fallback::FallbackProcessor;
use stepwise_tracker::{StateTracker, StaticStepIndex};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("stepwise_agent=info,stepwise_tracker=info,stepwise_fallback=info")
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = AppConfig::load(&cli.config);
    let (tracker, processor) = build_core(&config)?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            run_http(tracker, processor, &bind).await
        }
        Command::Repl => run_repl(processor).await,
    }
}

fn build_core(config: &AppConfig) -> Result<(StateTracker, Arc<FallbackProcessor>)> {
    let index = match &config.task_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading task file {path}"))?;
            let index =
                StaticStepIndex::from_json_str(&raw).with_context(|| "parsing task file")?;
            tracing::info!(steps = index.len(), path = %path, "task definitions loaded");
            index
        }
        None => {
            tracing::warn!("no task_file configured; every observation will miss the index");
            StaticStepIndex::new(Vec::new())
        }
    };
    let tracker = StateTracker::new(Arc::new(index), config.tracker.clone());
    let processor = Arc::new(FallbackProcessor::new(
        config.fallback.clone(),
        tracker.clone(),
    ));
    Ok((tracker, processor))
}

async fn run_repl(processor: Arc<FallbackProcessor>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        let response = processor.process_query(query).await;
        println!(
            "[{} | confidence {:.2}] {}",
            response.query_type, response.confidence, response.response_text
        );
    }
    Ok(())
}
