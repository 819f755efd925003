use console::{Style, StyledObject};
use serde_json::Value;
use tandem_core::assistant::ExchangeResult;
use tandem_core::mode::Mode;

/// Longest tool argument shown before it is cut.
const MAX_ARGUMENT_CHARS: usize = 100;
/// Longest tool result preview.
const MAX_RESULT_CHARS: usize = 200;

/// Represents the type of a chat message, used for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMessageType {
    /// The prompt for user input.
    Prompt,
    /// Footer information, like metrics or status.
    Footer,
    /// Tool invocations and their results.
    Tool,
    /// Hints the user can act on.
    Notice,
    /// An error message.
    Error,
}

/// Styles a string of text according to the specified `ChatMessageType`.
pub fn style_chat_text(text: &str, style: ChatMessageType) -> StyledObject<&str> {
    let style_obj = match style {
        ChatMessageType::Prompt => Style::new().blue().bold(),
        ChatMessageType::Footer => Style::new().white().dim(),
        ChatMessageType::Tool => Style::new().cyan(),
        ChatMessageType::Notice => Style::new().yellow(),
        ChatMessageType::Error => Style::new().red().bold(),
    };
    style_obj.apply_to(text)
}

/// Cuts `text` to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Renders a tool invocation as a labelled block, one argument per line.
pub fn format_tool_use(name: &str, input: &Value) -> String {
    let mut block = format!("🔧 Tool: {name}");
    match input {
        Value::Object(args) => {
            for (key, value) in args {
                let value = match value {
                    Value::String(s) => truncate(s, MAX_ARGUMENT_CHARS),
                    other => other.to_string(),
                };
                block.push_str(&format!("\n   {key}: {value}"));
            }
        }
        Value::Null => {}
        other => block.push_str(&format!("\n   {other}")),
    }
    style_chat_text(&block, ChatMessageType::Tool).to_string()
}

/// One-line preview of a tool's output.
pub fn format_tool_result(content: &str, is_error: bool) -> String {
    let marker = if is_error { "✗" } else { "✓" };
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let line = format!("   {marker} {}", truncate(&flat, MAX_RESULT_CHARS));
    style_chat_text(&line, ChatMessageType::Footer).to_string()
}

/// Summary printed once a mediated exchange succeeds.
pub fn format_exchange_footer(result: &ExchangeResult) -> String {
    let turns = if result.turns == 1 { "turn" } else { "turns" };
    let mut footer = format!(
        "◼ Completed in {} {turns}, {:.2}s",
        result.turns,
        result.duration_ms as f64 / 1000.0
    );
    if let Some(cost) = result.cost_usd {
        footer.push_str(&format!(", ${cost:.4}"));
    }
    footer.push('.');
    style_chat_text(&footer, ChatMessageType::Footer).to_string()
}

pub fn format_cancelled() -> String {
    style_chat_text("◼ Cancelled.", ChatMessageType::Footer).to_string()
}

/// The two-line REPL prompt showing the active mode.
pub fn format_prompt(mode: Mode) -> String {
    let meta = format!("[{mode}]");
    format!(
        "\n{}\n{}",
        style_chat_text(&meta, ChatMessageType::Prompt),
        style_chat_text("> ", ChatMessageType::Prompt)
    )
}
