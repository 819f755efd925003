use anyhow::Result;
use rustyline::completion::{Candidate, Completer};
use rustyline::error::ReadlineError;
use rustyline::hint::Hinter;
use rustyline::{CompletionType, Editor, Helper, Highlighter, Validator};

use crate::cli::chat::commands::Command;
use crate::cli::chat::controller::{Controller, Flow};
use crate::cli::ux::{ChatMessageType, format_prompt, present_error, style_chat_text};

/// Completion candidate for the REPL.
#[derive(Debug)]
pub struct CompletionCandidate {
    text: String,
    display_string: String,
}

impl CompletionCandidate {
    pub fn new(text: &str) -> Self {
        let display_string = style_chat_text(text, ChatMessageType::Footer).to_string();
        Self {
            text: text.to_owned(),
            display_string,
        }
    }
}

impl Candidate for CompletionCandidate {
    fn display(&self) -> &str {
        &self.display_string
    }

    fn replacement(&self) -> &str {
        &self.text
    }
}

/// Line editing helper: completes and hints the slash commands.
#[derive(Helper, Validator, Highlighter)]
pub struct Repl {
    pub command_names: Vec<String>,
}

impl Completer for Repl {
    type Candidate = CompletionCandidate;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> Result<(usize, Vec<Self::Candidate>), ReadlineError> {
        if !line.starts_with('/') {
            return Ok((0, Vec::new()));
        }
        let line = line.to_lowercase();
        let candidates = self
            .command_names
            .iter()
            .filter(|name| name.starts_with(&line))
            .map(|name| CompletionCandidate::new(name))
            .collect();
        Ok((0, candidates))
    }
}

impl Hinter for Repl {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if line.is_empty() || pos < line.len() || !line.starts_with('/') {
            return None;
        }
        self.command_names
            .iter()
            .find(|name| name.starts_with(line))
            .map(|name| name[line.len()..].into())
    }
}

/// Runs the interactive REPL until the user exits.
pub async fn run(mut controller: Controller) -> Result<()> {
    println!("Welcome to tandem! Type '/help' for commands, '/exit' to quit.");

    let config = rustyline::Config::builder()
        .history_ignore_dups(true)?
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(Repl {
        command_names: Command::names(),
    }));

    loop {
        let prompt = format_prompt(controller.mode());
        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    rl.add_history_entry(&line)?;
                }
                match controller.handle_line(&line).await {
                    Ok(Flow::Exit) => return Ok(()),
                    Ok(Flow::Continue) => {}
                    Err(err) => present_error(err),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Type /exit to quit.");
            }
            Err(ReadlineError::Eof) => {
                if let Err(err) = controller.handle_line("/exit").await {
                    present_error(err);
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
}
