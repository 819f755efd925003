use std::io::stdout;

use anyhow::Result;
use tandem_core::config::Config;
use tandem_core::mode::Mode;
use tandem_core::{get_assistant_backend, get_chat_backend};

use crate::cli::chat::assistant::MediatedAdapter;
use crate::cli::chat::controller::Controller;
use crate::cli::chat::passthrough::{CommandLauncher, PassthroughBridge, TerminalRelay};
use crate::cli::chat::permission::TerminalGate;
use crate::cli::chat::plain::ChatAdapter;

mod adapter;
mod assistant;
mod commands;
mod controller;
mod passthrough;
mod permission;
mod plain;
mod repl;
mod test_utils;

/// Executes the chat command, starting an interactive REPL session.
pub async fn execute(mode: Mode, config: &Config) -> Result<()> {
    let assistant = MediatedAdapter::new(get_assistant_backend(config), config.assistant.max_turns);
    let chat = ChatAdapter::new(get_chat_backend(config), &config.chat.api_key);
    let bridge = PassthroughBridge::new(
        Box::new(CommandLauncher::new(
            &config.assistant.native_command,
            &config.assistant.native_args,
        )),
        Box::<TerminalRelay>::default(),
    );
    let controller = Controller::new(
        mode,
        assistant,
        chat,
        bridge,
        Box::<TerminalGate>::default(),
        Box::new(stdout()),
    );
    repl::run(controller).await
}
