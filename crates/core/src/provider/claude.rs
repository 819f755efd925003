//! The coding assistant driven as a child process speaking JSON lines.
use crate::assistant::{
    AssistantBackend, AssistantEvent, AssistantExchange, AssistantRequest, PermissionReply,
    control_response_line, parse_stream_line, user_message_line,
};
use crate::completion::CancellationToken;
use crate::config::AssistantConfig;
use crate::error::BackendError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

pub struct ClaudeProcessBackend {
    command: String,
    args: Vec<String>,
}

impl ClaudeProcessBackend {
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    fn build_args(&self, request: &AssistantRequest) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(
            [
                "--print",
                "--verbose",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
                "--permission-prompt-tool",
                "stdio",
                "--max-turns",
            ]
            .map(String::from),
        );
        args.push(request.max_turns.to_string());
        if let Some(session_id) = &request.resume {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        args
    }
}

#[async_trait]
impl AssistantBackend for ClaudeProcessBackend {
    #[instrument(skip(self, request), fields(command = %self.command, resume = ?request.resume))]
    async fn start(&self, request: AssistantRequest) -> Result<Box<dyn AssistantExchange>> {
        let args = self.build_args(&request);
        debug!(?args, "Spawning assistant");

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().context("Assistant stdin missing")?;
        let stdout = child.stdout.take().context("Assistant stdout missing")?;
        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer).await;
                buffer
            })
        });

        let mut line = user_message_line(&request.prompt);
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to send prompt to assistant")?;
        stdin.flush().await?;

        Ok(Box::new(ClaudeExchange {
            child,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
            stderr,
            pending: VecDeque::new(),
            cancel_token: request.cancel_token,
            saw_result: false,
            finished: false,
        }))
    }
}

struct ClaudeExchange {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    pending: VecDeque<AssistantEvent>,
    cancel_token: CancellationToken,
    saw_result: bool,
    finished: bool,
}

impl ClaudeExchange {
    async fn collect_stderr(&mut self) -> String {
        match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default().trim().to_string(),
            None => String::new(),
        }
    }

    /// Reaps the child once stdout is closed.
    async fn finish(&mut self) -> Option<Result<AssistantEvent>> {
        self.finished = true;
        self.stdin = None;
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(err) => return Some(Err(err.into())),
        };
        let stderr = self.collect_stderr().await;
        debug!(%status, "Assistant exited");
        if self.saw_result || status.success() {
            return None;
        }
        Some(Err(BackendError::Exited {
            status: status.to_string(),
            stderr,
        }
        .into()))
    }
}

#[async_trait]
impl AssistantExchange for ClaudeExchange {
    async fn next_event(&mut self) -> Option<Result<AssistantEvent>> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel_token.is_cancelled() {
                self.finished = true;
                let _ = self.child.kill().await;
                return Some(Err(BackendError::Cancelled.into()));
            }
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, AssistantEvent::Result(_)) {
                    // Closing stdin lets the assistant exit after its result.
                    self.saw_result = true;
                    self.stdin = None;
                }
                return Some(Ok(event));
            }

            match self.lines.next_line().await {
                Ok(Some(line)) => match parse_stream_line(&line) {
                    Ok(events) => self.pending.extend(events),
                    Err(err) => warn!(%err, %line, "Skipping unparseable assistant output"),
                },
                Ok(None) => return self.finish().await,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err.into()));
                }
            }
        }
    }

    async fn respond(&mut self, request_id: &str, reply: PermissionReply) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("Assistant input is already closed")?;
        let mut line = control_response_line(request_id, &reply);
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}
