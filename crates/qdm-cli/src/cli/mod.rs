//! CLI for the QDM download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{run_config, run_fetch};

/// Top-level CLI for the QDM download manager.
#[derive(Debug, Parser)]
#[command(name = "qdm")]
#[command(about = "QDM: queued, resumable download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs through the agent pool.
    Fetch {
        /// Direct HTTP/HTTPS URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory the files are written into (default: current dir).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of download agents (overrides the config file).
        #[arg(long, value_name = "N")]
        agents: Option<usize>,

        /// Priority for these downloads; higher dispatches first.
        #[arg(long, default_value = "0")]
        priority: i32,

        /// Tag applied to all submitted downloads.
        #[arg(long)]
        tag: Option<String>,

        /// Truncate existing partial files instead of resuming them.
        #[arg(long)]
        no_resume: bool,
    },

    /// Show the config file path and the effective configuration.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = qdm_core::config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                urls,
                out,
                agents,
                priority,
                tag,
                no_resume,
            } => run_fetch(cfg, urls, out, agents, priority, tag, no_resume).await,
            CliCommand::Config => run_config(cfg),
        }
    }
}
