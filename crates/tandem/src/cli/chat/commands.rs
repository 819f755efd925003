use tandem_core::mode::Mode;

/// REPL commands. Any other input line is a payload for the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Exit the chat session
    Exit,
    /// Clear chat history and the assistant session
    Clear,
    /// Switch between the coding assistant and plain chat
    Switch,
    /// Switch the assistant between mediated and native engines
    Mode,
    /// Show commands and the current mode
    Help,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Exit,
        Command::Clear,
        Command::Switch,
        Command::Mode,
        Command::Help,
    ];

    /// Matches a whole input line against the command words.
    ///
    /// Matching ignores case and surrounding whitespace. A line with anything
    /// after the command word is not a command.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "/exit" | "exit" | "/quit" | "quit" => Some(Command::Exit),
            "/clear" | "clear" => Some(Command::Clear),
            "/switch" | "switch" => Some(Command::Switch),
            "/mode" | "mode" => Some(Command::Mode),
            "/help" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Exit => "/exit",
            Command::Clear => "/clear",
            Command::Switch => "/switch",
            Command::Mode => "/mode",
            Command::Help => "/help",
        }
    }

    pub fn about(&self) -> &'static str {
        match self {
            Command::Exit => "Exit the chat session (also: exit, quit)",
            Command::Clear => "Clear chat history and start a fresh session",
            Command::Switch => "Switch between the coding assistant and plain chat",
            Command::Mode => "Toggle the assistant between mediated and native mode",
            Command::Help => "Show this help",
        }
    }

    /// Names offered by the line editor's completion.
    pub fn names() -> Vec<String> {
        let mut names: Vec<String> = Self::ALL.iter().map(|c| c.name().to_string()).collect();
        names.push("/quit".to_string());
        names
    }
}

pub fn format_help(mode: Mode) -> String {
    let mut help = String::from("Commands:\n");
    for command in Command::ALL {
        help.push_str(&format!("  {:<9} {}\n", command.name(), command.about()));
    }
    help.push_str("\nIn native mode, press Ctrl+B to return to this prompt.\n");
    help.push_str(&format!("Current mode: {mode}"));
    help
}
