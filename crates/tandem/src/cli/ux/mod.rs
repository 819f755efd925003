mod presenter;
mod progress;

pub use presenter::{
    ChatMessageType, format_cancelled, format_exchange_footer, format_prompt, format_tool_result,
    format_tool_use, style_chat_text, truncate,
};
pub use progress::GenerationSpinner;

use console::style;

/// Prints a formatted error message to stderr.
pub fn present_error(error: anyhow::Error) {
    let error_text = style("ERROR:").red().bold();
    eprintln!("\n{error_text} {error:#}");
}
