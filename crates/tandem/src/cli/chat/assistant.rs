//! Mediated exchanges with the coding assistant.
use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use tandem_core::assistant::{
    AssistantBackend, AssistantEvent, AssistantRequest, ContentBlock, ExchangeResult,
    PermissionReply, ResultOutcome,
};
use tandem_core::completion::CancellationToken;
use tandem_core::error::{BackendError, ErrorKind};
use tracing::debug;

use crate::cli::chat::adapter::{Adapter, ExchangeContext, report_failure};
use crate::cli::chat::permission::PermissionPolicy;
use crate::cli::ux::{
    ChatMessageType, GenerationSpinner, format_cancelled, format_exchange_footer,
    format_tool_result, format_tool_use, style_chat_text,
};

pub const CREDENTIAL_VAR: &str = "ANTHROPIC_API_KEY";
const SESSION_RESET_NOTICE: &str = "Session reset. The next message starts a fresh conversation.";

pub struct MediatedAdapter {
    backend: Box<dyn AssistantBackend>,
    max_turns: u32,
    policy: PermissionPolicy,
}

impl MediatedAdapter {
    pub fn new(backend: Box<dyn AssistantBackend>, max_turns: u32) -> Self {
        Self {
            backend,
            max_turns,
            policy: PermissionPolicy::default(),
        }
    }
}

/// Tracks whether the cursor sits at the start of a line, so blocks printed
/// after streamed text begin on their own line.
struct Printer<'a> {
    out: &'a mut dyn Write,
    at_line_start: bool,
}

impl Printer<'_> {
    fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        write!(self.out, "{text}")?;
        self.out.flush()?;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }

    fn finish_line(&mut self) -> Result<()> {
        if !self.at_line_start {
            writeln!(self.out)?;
            self.at_line_start = true;
        }
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<()> {
        self.finish_line()?;
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    fn notice(&mut self, text: &str) -> Result<()> {
        self.line(&style_chat_text(text, ChatMessageType::Notice).to_string())
    }

    fn failure(&mut self, error: &anyhow::Error) -> Result<ErrorKind> {
        self.finish_line()?;
        report_failure(self.out, error, CREDENTIAL_VAR)
    }
}

#[async_trait(?Send)]
impl Adapter for MediatedAdapter {
    async fn send(&mut self, payload: &str, ctx: &mut ExchangeContext<'_>) -> Result<()> {
        let mut spinner = GenerationSpinner::new();
        spinner.start("Thinking...");

        let cancel_token = CancellationToken::new();
        let request = AssistantRequest {
            prompt: payload.to_string(),
            resume: ctx.state.session_id().map(str::to_string),
            max_turns: self.max_turns,
            cancel_token: cancel_token.clone(),
        };
        debug!(resume = ?request.resume, "Starting mediated exchange");

        let mut printer = Printer {
            out: &mut *ctx.out,
            at_line_start: true,
        };
        let mut exchange = match self.backend.start(request).await {
            Ok(exchange) => exchange,
            Err(err) => {
                spinner.stop();
                printer.failure(&err)?;
                return Ok(());
            }
        };

        let mut interrupt = Box::pin(tokio::signal::ctrl_c());
        let mut new_session: Option<String> = None;
        let mut result: Option<ExchangeResult> = None;

        loop {
            let next = tokio::select! {
                _ = &mut interrupt => {
                    cancel_token.cancel();
                    Some(Err(BackendError::Cancelled.into()))
                }
                next = exchange.next_event() => next,
            };

            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    spinner.stop();
                    if matches!(
                        err.downcast_ref::<BackendError>(),
                        Some(BackendError::Cancelled)
                    ) {
                        printer.line(&format_cancelled())?;
                    } else {
                        let kind = printer.failure(&err)?;
                        if kind == ErrorKind::Session {
                            ctx.state.reset_session();
                            printer.notice(SESSION_RESET_NOTICE)?;
                        }
                    }
                    return Ok(());
                }
            };

            match event {
                AssistantEvent::SessionStarted(id) => {
                    if new_session.is_none() {
                        new_session = Some(id);
                    }
                }
                AssistantEvent::Connected(model) => {
                    spinner.update(format!("Connected to {model}..."));
                }
                AssistantEvent::Assistant(blocks) => {
                    spinner.stop();
                    for block in blocks {
                        match block {
                            ContentBlock::Text(text) => printer.text(&text)?,
                            ContentBlock::ToolUse { name, input } => {
                                printer.line(&format_tool_use(&name, &input))?;
                                spinner.start(format!("Running {name}..."));
                            }
                        }
                    }
                }
                AssistantEvent::ToolResult { content, is_error } => {
                    spinner.stop();
                    printer.line(&format_tool_result(&content, is_error))?;
                    spinner.start("Thinking...");
                }
                AssistantEvent::PermissionRequest {
                    request_id,
                    tool_name,
                    input,
                } => {
                    // The gate prompts on the terminal.
                    spinner.stop();
                    let allowed = self.policy.resolve(&tool_name, &input, &mut *ctx.gate)?;
                    let reply = if allowed {
                        PermissionReply::Allow { input }
                    } else {
                        let denied = format!("Denied {tool_name}");
                        let denied = style_chat_text(&denied, ChatMessageType::Footer);
                        printer.line(&denied.to_string())?;
                        PermissionReply::Deny {
                            message: format!("The user denied permission to use {tool_name}"),
                        }
                    };
                    if let Err(err) = exchange.respond(&request_id, reply).await {
                        printer.failure(&err)?;
                        return Ok(());
                    }
                    spinner.start("Working...");
                }
                AssistantEvent::Result(exchange_result) => {
                    result = Some(exchange_result);
                }
            }
        }
        spinner.stop();

        let Some(result) = result else {
            let err = anyhow::anyhow!("The assistant ended without a result");
            printer.failure(&err)?;
            return Ok(());
        };
        match &result.outcome {
            ResultOutcome::Success => {
                if let Some(id) = new_session {
                    ctx.state.set_session_id(id);
                }
                printer.line(&format_exchange_footer(&result))?;
            }
            ResultOutcome::MaxTurns => {
                let err = anyhow::anyhow!(
                    "Reached the maximum number of turns ({})",
                    self.max_turns
                );
                printer.failure(&err)?;
                ctx.state.reset_session();
                printer.notice(SESSION_RESET_NOTICE)?;
            }
            ResultOutcome::Error(message) => {
                let err = anyhow::anyhow!("{message}");
                if printer.failure(&err)? == ErrorKind::Session {
                    ctx.state.reset_session();
                    printer.notice(SESSION_RESET_NOTICE)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::chat::test_utils::{ScriptedAssistant, ScriptedGate, SharedBuffer, Step};
    use serde_json::json;
    use tandem_core::session::SessionState;

    fn result(outcome: ResultOutcome) -> Step {
        Step::Event(AssistantEvent::Result(ExchangeResult {
            outcome,
            turns: 2,
            duration_ms: 3500,
            cost_usd: None,
        }))
    }

    fn started(id: &str) -> Step {
        Step::Event(AssistantEvent::SessionStarted(id.to_string()))
    }

    fn blocks(blocks: Vec<ContentBlock>) -> Step {
        Step::Event(AssistantEvent::Assistant(blocks))
    }

    fn permission(tool_name: &str, input: serde_json::Value) -> Step {
        Step::Event(AssistantEvent::PermissionRequest {
            request_id: format!("req-{tool_name}"),
            tool_name: tool_name.to_string(),
            input,
        })
    }

    async fn run(
        adapter: &mut MediatedAdapter,
        state: &mut SessionState,
        gate: &mut ScriptedGate,
    ) -> String {
        let mut out = SharedBuffer::default();
        let mut ctx = ExchangeContext {
            state,
            gate,
            out: &mut out,
        };
        adapter.send("do it", &mut ctx).await.unwrap();
        out.contents()
    }

    fn session_with(id: &str) -> SessionState {
        let mut state = SessionState::default();
        state.set_session_id(id.to_string());
        state
    }

    #[tokio::test]
    async fn test_turn_ceiling_clears_session() {
        let backend = ScriptedAssistant::new(vec![vec![
            started("s-old"),
            blocks(vec![ContentBlock::Text("partial".into())]),
            result(ResultOutcome::MaxTurns),
        ]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 5);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), None);
        assert!(out.contains("maximum number of turns (5)"));
        assert!(out.contains("Session reset"));
    }

    #[tokio::test]
    async fn test_first_session_id_wins() {
        let backend = ScriptedAssistant::new(vec![vec![
            started("s-1"),
            started("s-2"),
            result(ResultOutcome::Success),
        ]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = SessionState::default();

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), Some("s-1"));
        assert!(out.contains("◼ Completed in 2 turns, 3.50s."));
    }

    #[tokio::test]
    async fn test_renders_text_and_tool_use() {
        let backend = ScriptedAssistant::new(vec![vec![
            blocks(vec![
                ContentBlock::Text("Let me look".into()),
                ContentBlock::ToolUse {
                    name: "Read".into(),
                    input: json!({"file_path": "src/main.rs"}),
                },
            ]),
            Step::Event(AssistantEvent::ToolResult {
                content: "fn main() {}".into(),
                is_error: false,
            }),
            blocks(vec![ContentBlock::Text("Done.\n".into())]),
            result(ResultOutcome::Success),
        ]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);

        let out = run(
            &mut adapter,
            &mut SessionState::default(),
            &mut ScriptedGate::new(&[]),
        )
        .await;

        assert!(out.contains("Let me look\n🔧 Tool: Read\n   file_path: src/main.rs\n"));
        assert!(out.contains("✓ fn main() {}"));
        assert!(out.contains("Done.\n◼ Completed"));
    }

    #[tokio::test]
    async fn test_permission_requests_go_through_gate() {
        let backend = ScriptedAssistant::new(vec![vec![
            permission("Bash", json!({"command": "cargo fmt"})),
            permission("Write", json!({"file_path": "a.rs"})),
            result(ResultOutcome::Success),
        ]]);
        let replies = backend.replies.clone();
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut gate = ScriptedGate::new(&["y", "n"]);

        let out = run(&mut adapter, &mut SessionState::default(), &mut gate).await;

        let replies = replies.lock().unwrap();
        assert_eq!(
            replies[0],
            (
                "req-Bash".to_string(),
                PermissionReply::Allow {
                    input: json!({"command": "cargo fmt"})
                }
            )
        );
        assert_eq!(replies[1].0, "req-Write");
        assert!(matches!(replies[1].1, PermissionReply::Deny { .. }));
        assert_eq!(gate.asked.len(), 2);
        assert!(out.contains("Denied Write"));
    }

    #[tokio::test]
    async fn test_standing_permission_skips_gate() {
        let backend = ScriptedAssistant::new(vec![
            vec![permission("Read", json!({})), result(ResultOutcome::Success)],
            vec![permission("Read", json!({})), result(ResultOutcome::Success)],
        ]);
        let replies = backend.replies.clone();
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut gate = ScriptedGate::new(&["always"]);
        let mut state = SessionState::default();

        run(&mut adapter, &mut state, &mut gate).await;
        state.clear();
        run(&mut adapter, &mut state, &mut gate).await;

        assert_eq!(gate.asked.len(), 1);
        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[1].1, PermissionReply::Allow { .. }));
    }

    #[tokio::test]
    async fn test_session_error_resets_session() {
        let backend = ScriptedAssistant::new(vec![vec![Step::Fail(anyhow::anyhow!(
            "No conversation found with session ID: s-old"
        ))]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), None);
        assert!(out.contains("ERROR: No conversation found"));
        assert!(out.contains("Session reset"));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_session() {
        let backend = ScriptedAssistant::new(vec![vec![
            started("s-new"),
            Step::Fail(anyhow::anyhow!("stream closed unexpectedly")),
        ]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), Some("s-old"));
        assert!(out.contains("ERROR: stream closed unexpectedly"));
        assert!(!out.contains("Session reset"));
    }

    #[tokio::test]
    async fn test_failed_result_discards_new_session() {
        let backend = ScriptedAssistant::new(vec![vec![
            started("s-new"),
            result(ResultOutcome::Error("Overloaded, try again later".into())),
        ]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), Some("s-old"));
        assert!(out.contains("ERROR: Overloaded"));
        assert!(!out.contains("Session reset"));
    }

    #[tokio::test]
    async fn test_missing_result_discards_new_session() {
        let backend = ScriptedAssistant::new(vec![vec![started("s-new")]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), Some("s-old"));
        assert!(out.contains("ended without a result"));
    }

    #[tokio::test]
    async fn test_cancelled_exchange_discards_new_session() {
        let backend = ScriptedAssistant::new(vec![vec![
            started("s-new"),
            blocks(vec![ContentBlock::Text("working on".into())]),
            Step::Fail(BackendError::Cancelled.into()),
        ]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), Some("s-old"));
        assert!(out.contains("working on\n◼ Cancelled."));
    }

    #[tokio::test]
    async fn test_result_error_with_credential_hint() {
        let backend = ScriptedAssistant::new(vec![vec![result(ResultOutcome::Error(
            "Invalid API key · Please run /login".into(),
        ))]]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);

        let out = run(
            &mut adapter,
            &mut SessionState::default(),
            &mut ScriptedGate::new(&[]),
        )
        .await;

        assert!(out.contains("ERROR: Invalid API key"));
        assert!(out.contains("export ANTHROPIC_API_KEY="));
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let backend = ScriptedAssistant::with_starts(vec![Err(BackendError::Spawn {
            command: "claude".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into())]);
        let mut adapter = MediatedAdapter::new(Box::new(backend), 50);
        let mut state = session_with("s-old");

        let out = run(&mut adapter, &mut state, &mut ScriptedGate::new(&[])).await;

        assert_eq!(state.session_id(), Some("s-old"));
        assert!(out.contains("Failed to start 'claude'"));
        assert!(out.contains("npm install"));
    }
}
