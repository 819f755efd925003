use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;
use tandem_core::error::ErrorKind;
use tandem_core::session::SessionState;
use tracing::warn;

use crate::cli::chat::permission::PermissionGate;
use crate::cli::ux::{ChatMessageType, style_chat_text};

/// Everything an exchange may touch besides the adapter's own state.
pub struct ExchangeContext<'a> {
    pub state: &'a mut SessionState,
    pub gate: &'a mut dyn PermissionGate,
    pub out: &'a mut dyn Write,
}

/// A backend family the REPL can hand a payload to.
///
/// `send` streams the response to `ctx.out` and records whatever the backend
/// needs for the next turn in `ctx.state`. Backend failures are reported to
/// the user and do not fail the call; only broken output does.
#[async_trait(?Send)]
pub trait Adapter {
    async fn send(&mut self, payload: &str, ctx: &mut ExchangeContext<'_>) -> Result<()>;
}

/// Prints a failed exchange with a hint for the failures the user can fix.
pub fn report_failure(
    out: &mut dyn Write,
    error: &anyhow::Error,
    credential_var: &str,
) -> Result<ErrorKind> {
    let kind = ErrorKind::of(error);
    let message = format!("{error:#}")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    warn!(?kind, error = %message, "Exchange failed");
    writeln!(
        out,
        "{} {message}",
        style_chat_text("ERROR:", ChatMessageType::Error)
    )?;

    match kind {
        ErrorKind::Credential => {
            let hint = format!("Set your API key with: export {credential_var}=<your key>");
            writeln!(out, "{}", style_chat_text(&hint, ChatMessageType::Notice))?;
        }
        ErrorKind::Spawn => {
            writeln!(
                out,
                "{}",
                style_chat_text(&install_hint(), ChatMessageType::Notice)
            )?;
        }
        _ => {}
    }
    Ok(kind)
}

pub fn install_hint() -> String {
    "Is the claude CLI installed? Install it with: npm install -g @anthropic-ai/claude-code"
        .to_string()
}
