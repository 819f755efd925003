//! Native passthrough: the assistant's interactive program owns the terminal
//! while raw keystrokes are relayed to it.
//!
//! The child writes straight to the terminal. Its input is a pipe fed from
//! the raw reader, which lets Ctrl+B be intercepted before the child sees it.
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cli::chat::adapter::install_hint;
use crate::cli::ux::{ChatMessageType, style_chat_text};

/// Ctrl+B, read as a chunk of its own, hands the terminal back.
pub const EXIT_BYTE: u8 = 0x02;

/// A child that has not drained its input for this long is treated as no
/// longer reading.
const FORWARD_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    Exit,
    Forward,
}

/// Only a chunk consisting of the exit byte alone exits. Longer chunks are
/// forwarded untouched even when they contain it, e.g. pasted text.
pub fn classify_chunk(chunk: &[u8]) -> RelayAction {
    if chunk == [EXIT_BYTE] {
        RelayAction::Exit
    } else {
        RelayAction::Forward
    }
}

/// Raw terminal input, delivered in chunks as the terminal hands them over.
pub trait RawRelay {
    /// Switches the terminal to raw mode and starts delivering chunks.
    fn enter(&mut self) -> Result<mpsc::Receiver<Vec<u8>>>;
    /// Stops delivering chunks and restores the terminal.
    fn exit(&mut self) -> Result<()>;
}

#[async_trait]
pub trait NativeProcess: Send {
    /// Resolves with the exit code once the process ends.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;
    /// Kills the process if it is still running.
    async fn terminate(&mut self) -> std::io::Result<()>;
}

pub type ChildInput = Box<dyn AsyncWrite + Send + Unpin>;

pub struct NativeChild {
    pub process: Box<dyn NativeProcess>,
    /// `None` once the child stops accepting input.
    pub input: Option<ChildInput>,
}

pub trait NativeLauncher {
    fn launch(&self, initial_prompt: Option<&str>) -> std::io::Result<NativeChild>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The user pressed Ctrl+B.
    Detached,
    /// The child ended on its own.
    ChildExited(Option<i32>),
    /// The child could not be started.
    SpawnFailed,
}

pub struct PassthroughBridge {
    launcher: Box<dyn NativeLauncher>,
    relay: Box<dyn RawRelay>,
    child: Option<NativeChild>,
}

impl PassthroughBridge {
    pub fn new(launcher: Box<dyn NativeLauncher>, relay: Box<dyn RawRelay>) -> Self {
        Self {
            launcher,
            relay,
            child: None,
        }
    }

    #[cfg(test)]
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Starts a fresh child, tearing down any previous one first.
    ///
    /// Returns `false` when the child could not be spawned; the failure is
    /// reported to `out`.
    pub async fn start(
        &mut self,
        initial_prompt: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<bool> {
        self.shutdown().await?;
        match self.launcher.launch(initial_prompt) {
            Ok(child) => {
                debug!("Native child started");
                self.child = Some(child);
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "Failed to start native child");
                writeln!(
                    out,
                    "{} Failed to start the assistant: {err}",
                    style_chat_text("ERROR:", ChatMessageType::Error)
                )?;
                if err.kind() == std::io::ErrorKind::NotFound {
                    writeln!(
                        out,
                        "{}",
                        style_chat_text(&install_hint(), ChatMessageType::Notice)
                    )?;
                }
                Ok(false)
            }
        }
    }

    /// Starts a child and relays the terminal to it until the user detaches
    /// or the child ends. The child never outlives this call.
    pub async fn run(
        &mut self,
        initial_prompt: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<BridgeExit> {
        if !self.start(initial_prompt, out).await? {
            return Ok(BridgeExit::SpawnFailed);
        }
        writeln!(
            out,
            "{}",
            style_chat_text(
                "Entering native mode. Press Ctrl+B to return.",
                ChatMessageType::Footer
            )
        )?;
        out.flush()?;

        let mut chunks = match self.relay.enter() {
            Ok(chunks) => chunks,
            Err(err) => {
                self.shutdown().await?;
                return Err(err);
            }
        };
        let exit = self.relay_loop(&mut chunks).await;
        // Closing the channel releases a reader blocked on a full buffer.
        drop(chunks);
        let shutdown = self.shutdown().await;
        let restore = self.relay.exit();
        let exit = exit?;
        shutdown?;
        restore?;

        debug!(?exit, "Left native mode");
        let message = match exit {
            BridgeExit::ChildExited(Some(code)) => {
                format!("Assistant exited with code {code}. Back at the tandem prompt.")
            }
            BridgeExit::ChildExited(None) => {
                "Assistant exited. Back at the tandem prompt.".to_string()
            }
            _ => "Back at the tandem prompt.".to_string(),
        };
        writeln!(out, "\r\n{}", style_chat_text(&message, ChatMessageType::Footer))?;
        Ok(exit)
    }

    async fn relay_loop(
        &mut self,
        chunks: &mut mpsc::Receiver<Vec<u8>>,
    ) -> Result<BridgeExit> {
        let Some(NativeChild { process, input }) = self.child.as_mut() else {
            return Ok(BridgeExit::Detached);
        };
        loop {
            tokio::select! {
                status = process.wait() => return Ok(BridgeExit::ChildExited(status?)),
                chunk = chunks.recv() => {
                    let Some(chunk) = chunk else {
                        return Ok(BridgeExit::Detached);
                    };
                    match classify_chunk(&chunk) {
                        RelayAction::Exit => return Ok(BridgeExit::Detached),
                        RelayAction::Forward => forward(input, &chunk).await,
                    }
                }
            }
        }
    }

    /// Kills the child, if any.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            drop(child.input.take());
            child.process.terminate().await?;
            debug!("Native child stopped");
        }
        Ok(())
    }
}

/// Writes a chunk to the child, dropping it when the child no longer reads.
async fn forward(input: &mut Option<ChildInput>, chunk: &[u8]) {
    let Some(writer) = input.as_mut() else {
        return;
    };
    let write = async {
        writer.write_all(chunk).await?;
        writer.flush().await
    };
    let written = match tokio::time::timeout(FORWARD_TIMEOUT, write).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::from(std::io::ErrorKind::TimedOut)),
    };
    if let Err(err) = written {
        debug!(error = %err, "Child input closed");
        *input = None;
    }
}

#[async_trait]
impl NativeProcess for tokio::process::Child {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        tokio::process::Child::wait(self).await.map(|status| status.code())
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        if self.try_wait()?.is_none() {
            self.kill().await?;
        }
        Ok(())
    }
}

/// Launches the configured interactive program.
pub struct CommandLauncher {
    command: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(command: &str, args: &[String]) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
        }
    }
}

impl NativeLauncher for CommandLauncher {
    fn launch(&self, initial_prompt: Option<&str>) -> std::io::Result<NativeChild> {
        let mut command = tokio::process::Command::new(&self.command);
        command.args(&self.args);
        if let Some(prompt) = initial_prompt {
            command.arg(prompt);
        }
        debug!(command = %self.command, args = ?self.args, "Launching native child");
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let input = child.stdin.take().map(|stdin| Box::new(stdin) as ChildInput);
        Ok(NativeChild {
            process: Box::new(child),
            input,
        })
    }
}

/// The controlling terminal, read byte by byte on a background thread.
#[derive(Default)]
pub struct TerminalRelay {
    #[cfg(unix)]
    reader: Option<raw_stdin::Reader>,
}

#[cfg(unix)]
impl RawRelay for TerminalRelay {
    fn enter(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        crossterm::terminal::enable_raw_mode()?;
        let (tx, rx) = mpsc::channel(64);
        self.reader = Some(raw_stdin::Reader::spawn(tx));
        Ok(rx)
    }

    fn exit(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
        crossterm::terminal::disable_raw_mode()?;
        Ok(())
    }
}

#[cfg(not(unix))]
impl RawRelay for TerminalRelay {
    fn enter(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        anyhow::bail!("Native mode needs a Unix terminal")
    }

    fn exit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
mod raw_stdin {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;

    use tokio::sync::mpsc;
    use tracing::debug;

    const POLL_INTERVAL_MS: libc::c_int = 50;

    /// Reads stdin on a thread that polls with a timeout, so stopping it never
    /// leaves a read pending that would swallow the next prompt's input.
    pub struct Reader {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<()>,
    }

    impl Reader {
        pub fn spawn(tx: mpsc::Sender<Vec<u8>>) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = stop.clone();
            let handle = std::thread::spawn(move || read_loop(tx, flag));
            Self { stop, handle }
        }

        pub fn stop(self) {
            self.stop.store(true, Ordering::SeqCst);
            if self.handle.join().is_err() {
                debug!("Raw stdin reader panicked");
            }
        }
    }

    enum Readiness {
        Ready,
        Idle,
        Closed,
    }

    fn poll_stdin() -> Readiness {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` is a valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut fds, 1, POLL_INTERVAL_MS) };
        if rc < 0 {
            return match std::io::Error::last_os_error().kind() {
                std::io::ErrorKind::Interrupted => Readiness::Idle,
                _ => Readiness::Closed,
            };
        }
        if rc == 0 {
            Readiness::Idle
        } else if fds.revents & libc::POLLIN != 0 {
            Readiness::Ready
        } else {
            Readiness::Closed
        }
    }

    fn read_loop(tx: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
        let mut buf = [0u8; 1024];
        while !stop.load(Ordering::SeqCst) {
            match poll_stdin() {
                Readiness::Idle => continue,
                Readiness::Closed => break,
                Readiness::Ready => {}
            }
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            let n =
                unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
            if tx.blocking_send(buf[..n as usize].to_vec()).is_err() {
                break;
            }
        }
        debug!("Raw stdin reader stopped");
    }
}
