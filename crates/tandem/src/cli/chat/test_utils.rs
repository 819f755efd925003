#![cfg(test)]

use std::collections::VecDeque;
use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tandem_core::assistant::{
    AssistantBackend, AssistantEvent, AssistantExchange, AssistantRequest, PermissionReply,
};
use tandem_core::completion::{CancellationToken, ChatBackend, ChatMessage};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::cli::chat::passthrough::{
    ChildInput, NativeChild, NativeLauncher, NativeProcess, RawRelay,
};
use crate::cli::chat::permission::{Decision, PermissionGate};

/// An in-memory `Write` whose contents stay readable after it is boxed.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// One scripted step of a mediated exchange.
pub enum Step {
    Event(AssistantEvent),
    Fail(anyhow::Error),
}

/// Assistant backend that plays back one script per exchange.
pub struct ScriptedAssistant {
    scripts: Mutex<VecDeque<Result<Vec<Step>>>>,
    pub requests: Arc<Mutex<Vec<AssistantRequest>>>,
    pub replies: Arc<Mutex<Vec<(String, PermissionReply)>>>,
}

impl ScriptedAssistant {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self::with_starts(scripts.into_iter().map(Ok).collect())
    }

    /// Scripts where `Err` makes the exchange fail to start.
    pub fn with_starts(scripts: Vec<Result<Vec<Step>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Arc::default(),
            replies: Arc::default(),
        }
    }
}

#[async_trait]
impl AssistantBackend for ScriptedAssistant {
    async fn start(&self, request: AssistantRequest) -> Result<Box<dyn AssistantExchange>> {
        self.requests.lock().unwrap().push(request);
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted exchange left")))?;
        Ok(Box::new(ScriptedExchange {
            steps: steps.into(),
            replies: self.replies.clone(),
        }))
    }
}

struct ScriptedExchange {
    steps: VecDeque<Step>,
    replies: Arc<Mutex<Vec<(String, PermissionReply)>>>,
}

#[async_trait]
impl AssistantExchange for ScriptedExchange {
    async fn next_event(&mut self) -> Option<Result<AssistantEvent>> {
        match self.steps.pop_front()? {
            Step::Event(event) => Some(Ok(event)),
            Step::Fail(err) => Some(Err(err)),
        }
    }

    async fn respond(&mut self, request_id: &str, reply: PermissionReply) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((request_id.to_string(), reply));
        Ok(())
    }
}

/// Chat backend that records what it was sent and streams canned fragments.
pub struct RecordingChat {
    responses: Mutex<VecDeque<Vec<Result<String>>>>,
    pub calls: Arc<Mutex<Vec<(Vec<ChatMessage>, String)>>>,
}

impl RecordingChat {
    pub fn new(responses: Vec<Vec<Result<String>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl ChatBackend for RecordingChat {
    fn model_name(&self) -> &str {
        "mock-chat"
    }

    async fn stream_chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        _cancel_token: CancellationToken,
    ) -> BoxStream<'_, Result<String>> {
        self.calls
            .lock()
            .unwrap()
            .push((history.to_vec(), message.to_string()));
        let fragments = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        stream::iter(fragments).boxed()
    }
}

/// Answers permission requests from a fixed list, denying once it runs out.
pub struct ScriptedGate {
    answers: VecDeque<String>,
    pub asked: Vec<(String, String)>,
}

impl ScriptedGate {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            asked: Vec::new(),
        }
    }
}

impl PermissionGate for ScriptedGate {
    fn request_permission(
        &mut self,
        action: &str,
        description: &str,
        _details: Option<&str>,
    ) -> Result<Decision> {
        self.asked
            .push((action.to_string(), description.to_string()));
        let answer = self.answers.pop_front().unwrap_or_default();
        Ok(Decision::from_answer(&answer))
    }
}

/// Ordered record of what the fake terminal and child went through.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Terminal that delivers the same chunks on every entry.
pub struct FakeRelay {
    log: EventLog,
    chunks: Vec<Vec<u8>>,
    hold_open: bool,
    fail_enter: bool,
    sender: Option<mpsc::Sender<Vec<u8>>>,
}

impl FakeRelay {
    pub fn new(log: &EventLog, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            log: log.clone(),
            chunks,
            hold_open: false,
            fail_enter: false,
            sender: None,
        }
    }

    /// Keeps the chunk channel open after the scripted chunks, as a real
    /// terminal does while the user is idle.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fails to switch to raw mode, as when stdin is not a terminal.
    pub fn failing_enter(mut self) -> Self {
        self.fail_enter = true;
        self
    }
}

impl RawRelay for FakeRelay {
    fn enter(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        if self.fail_enter {
            return Err(anyhow!("Inappropriate ioctl for device (os error 25)"));
        }
        self.log.push("enter");
        let (tx, rx) = mpsc::channel(self.chunks.len() + 1);
        for chunk in &self.chunks {
            tx.try_send(chunk.clone())?;
        }
        if self.hold_open {
            self.sender = Some(tx);
        }
        Ok(rx)
    }

    fn exit(&mut self) -> Result<()> {
        match self.sender.take() {
            Some(tx) if !tx.is_closed() => self.log.push("exit while receiving"),
            _ => self.log.push("exit"),
        }
        Ok(())
    }
}

pub struct FakeLauncher {
    log: EventLog,
    fail: bool,
    exit_code: Option<i32>,
    with_input: bool,
    stalled: bool,
    pub input: SharedBuffer,
}

impl FakeLauncher {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            fail: false,
            exit_code: None,
            with_input: true,
            stalled: false,
            input: SharedBuffer::default(),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn exiting_with(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn without_input(mut self) -> Self {
        self.with_input = false;
        self
    }

    /// Gives the child an input pipe that never drains.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }
}

impl NativeLauncher for FakeLauncher {
    fn launch(&self, initial_prompt: Option<&str>) -> std::io::Result<NativeChild> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }
        match initial_prompt {
            Some(prompt) => self.log.push(format!("launch {prompt}")),
            None => self.log.push("launch"),
        }
        let input = match (self.with_input, self.stalled) {
            (false, _) => None,
            (true, true) => Some(Box::new(StalledInput) as ChildInput),
            (true, false) => Some(Box::new(self.input.clone()) as ChildInput),
        };
        Ok(NativeChild {
            process: Box::new(FakeProcess {
                log: self.log.clone(),
                exit_code: self.exit_code,
            }),
            input,
        })
    }
}

/// Input of a child that stopped reading: no write ever completes.
struct StalledInput;

impl AsyncWrite for StalledInput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct FakeProcess {
    log: EventLog,
    exit_code: Option<i32>,
}

#[async_trait]
impl NativeProcess for FakeProcess {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        match self.exit_code {
            Some(code) => Ok(Some(code)),
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        self.log.push("terminate");
        Ok(())
    }
}
