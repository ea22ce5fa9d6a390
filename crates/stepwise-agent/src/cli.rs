use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stepwise-agent")]
#[command(about = "Procedural-task step tracking with transparent VLM query fallback.")]
pub(crate) struct Cli {
    /// Path to the JSON config file (default: stepwise.json).
    #[arg(long, global = true, default_value = "stepwise.json")]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP gateway (POST /ingest, POST /query). Default bind: 0.0.0.0:8008
    Serve {
        /// Listen address override (e.g. 0.0.0.0:8008).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Read queries from stdin, print unified answers. Exit on EOF or Ctrl+C.
    Repl,
}
