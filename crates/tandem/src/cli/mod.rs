//! Tandem cli definition and entrypoint.
mod chat;
pub mod ux;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tandem_core::config::get_config;
use tandem_core::mode::{Engine, Mode, Provider};

use crate::log::setup_logging;

/// Tandem - chat with a coding assistant and a general model in one terminal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Show verbose logs.
    #[arg(short, long)]
    verbose: bool,

    /// Config file to use instead of the default tandem.yml.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start with the plain chat model instead of the coding assistant.
    #[arg(long)]
    chat: bool,
}

impl Cli {
    fn initial_mode(&self) -> Mode {
        let provider = if self.chat {
            Provider::Chat
        } else {
            Provider::Assistant
        };
        Mode::new(provider, Engine::Mediated)
    }
}

/// Runs the main CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        setup_logging().context("Failed to set up logging")?;
    }

    let config = get_config(cli.config.clone()).context("Failed to load configuration")?;
    chat::execute(cli.initial_mode(), &config).await
}
