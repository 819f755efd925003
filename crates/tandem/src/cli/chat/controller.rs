//! Routes input lines to commands or to the backend selected by the mode.
use std::io::Write;

use anyhow::Result;
use tandem_core::mode::{Engine, Mode, Provider};
use tandem_core::session::SessionState;
use tracing::{debug, warn};

use crate::cli::chat::adapter::{Adapter, ExchangeContext, report_failure};
use crate::cli::chat::assistant::{CREDENTIAL_VAR, MediatedAdapter};
use crate::cli::chat::commands::{Command, format_help};
use crate::cli::chat::passthrough::{BridgeExit, PassthroughBridge};
use crate::cli::chat::permission::PermissionGate;
use crate::cli::chat::plain::ChatAdapter;
use crate::cli::ux::{ChatMessageType, style_chat_text};

const MODE_UNAVAILABLE: &str =
    "Mode switching is only available for the coding assistant. Use /switch first.";

/// What the REPL does after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Owns the session state and every backend. One line is handled at a time.
pub struct Controller {
    state: SessionState,
    assistant: MediatedAdapter,
    chat: ChatAdapter,
    bridge: PassthroughBridge,
    gate: Box<dyn PermissionGate>,
    out: Box<dyn Write>,
}

impl Controller {
    pub fn new(
        mode: Mode,
        assistant: MediatedAdapter,
        chat: ChatAdapter,
        bridge: PassthroughBridge,
        gate: Box<dyn PermissionGate>,
        out: Box<dyn Write>,
    ) -> Self {
        Self {
            state: SessionState::new(mode),
            assistant,
            chat,
            bridge,
            gate,
            out,
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        match Command::parse(line) {
            Some(command) => self.execute(command).await,
            None => {
                self.dispatch(line).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Flow> {
        debug!(?command, mode = %self.state.mode(), "Executing command");
        match command {
            Command::Exit => {
                if let Err(err) = self.bridge.shutdown().await {
                    warn!(error = %err, "Failed to stop the native child");
                }
                writeln!(self.out, "Bye!")?;
                return Ok(Flow::Exit);
            }
            Command::Clear => {
                self.state.clear();
                writeln!(self.out, "Chat history cleared.")?;
                if self.state.mode().is_native() {
                    self.enter_native(None).await?;
                }
            }
            Command::Switch => {
                self.state.switch_provider();
                writeln!(self.out, "Switched to {}.", self.state.mode())?;
            }
            Command::Mode => {
                self.bridge.shutdown().await?;
                match self.state.switch_engine() {
                    None => {
                        writeln!(
                            self.out,
                            "{}",
                            style_chat_text(MODE_UNAVAILABLE, ChatMessageType::Notice)
                        )?;
                    }
                    Some(Engine::Mediated) => {
                        writeln!(self.out, "Switched to {}.", self.state.mode())?;
                    }
                    Some(Engine::Native) => {
                        writeln!(self.out, "Switched to {}.", self.state.mode())?;
                        self.enter_native(None).await?;
                    }
                }
            }
            Command::Help => {
                writeln!(self.out, "{}", format_help(self.state.mode()))?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn dispatch(&mut self, payload: &str) -> Result<()> {
        let mode = self.state.mode();
        if mode.is_native() {
            return self.enter_native(Some(payload)).await;
        }

        let adapter: &mut dyn Adapter = match mode.provider {
            Provider::Assistant => &mut self.assistant,
            Provider::Chat => &mut self.chat,
        };
        let mut ctx = ExchangeContext {
            state: &mut self.state,
            gate: self.gate.as_mut(),
            out: self.out.as_mut(),
        };
        adapter.send(payload, &mut ctx).await
    }

    /// Hands the terminal to a fresh native child until the user comes back.
    ///
    /// When the bridge cannot run, the failure is reported and the assistant
    /// falls back to the mediated engine.
    async fn enter_native(&mut self, initial_prompt: Option<&str>) -> Result<()> {
        let failed = match self.bridge.run(initial_prompt, self.out.as_mut()).await {
            Ok(exit) => exit == BridgeExit::SpawnFailed,
            Err(err) => {
                report_failure(self.out.as_mut(), &err, CREDENTIAL_VAR)?;
                true
            }
        };
        if failed {
            self.state.set_engine(Engine::Mediated);
            writeln!(self.out, "Switched to {}.", self.state.mode())?;
        }
        Ok(())
    }
}
