//! Events of a coding assistant exchange and the line protocol they arrive in.
//!
//! The assistant is driven through its structured streaming output: one JSON
//! object per line on stdout, with permission answers and the prompt itself
//! written back as JSON lines on stdin.
use crate::completion::CancellationToken;
use crate::error::BackendError;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

/// Parameters of a single exchange with the assistant.
#[derive(Debug, Clone)]
pub struct AssistantRequest {
    pub prompt: String,
    /// Session to resume, or `None` to start fresh.
    pub resume: Option<String>,
    pub max_turns: u32,
    pub cancel_token: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse { name: String, input: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    Success,
    /// The exchange hit its turn ceiling.
    MaxTurns,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeResult {
    pub outcome: ResultOutcome,
    pub turns: u32,
    pub duration_ms: u64,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    SessionStarted(String),
    Connected(String),
    Assistant(Vec<ContentBlock>),
    ToolResult {
        content: String,
        is_error: bool,
    },
    /// The assistant is blocked until the user decides on a tool invocation.
    PermissionRequest {
        request_id: String,
        tool_name: String,
        input: Value,
    },
    Result(ExchangeResult),
}

/// Answer to a `PermissionRequest`.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionReply {
    Allow { input: Value },
    Deny { message: String },
}

/// Launches exchanges with the coding assistant.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn start(&self, request: AssistantRequest) -> Result<Box<dyn AssistantExchange>>;
}

/// A running exchange. Dropping it aborts the exchange.
#[async_trait]
pub trait AssistantExchange: Send {
    /// Next event, or `None` once the exchange has ended.
    async fn next_event(&mut self) -> Option<Result<AssistantEvent>>;

    async fn respond(&mut self, request_id: &str, reply: PermissionReply) -> Result<()>;
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    System {
        subtype: String,
        session_id: Option<String>,
        model: Option<String>,
    },
    Assistant {
        message: WireContentMessage,
    },
    User {
        message: WireContentMessage,
    },
    Result {
        subtype: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: u32,
        #[serde(default)]
        duration_ms: u64,
        total_cost_usd: Option<f64>,
        result: Option<String>,
    },
    ControlRequest {
        request_id: String,
        request: WireControlRequest,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
struct WireContentMessage {
    content: WireContent,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "subtype", rename_all = "snake_case")]
enum WireControlRequest {
    CanUseTool {
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Parses one stdout line into zero or more events.
pub fn parse_stream_line(line: &str) -> Result<Vec<AssistantEvent>, BackendError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let message: WireMessage =
        serde_json::from_str(line).map_err(|e| BackendError::Protocol(e.to_string()))?;

    let events = match message {
        WireMessage::System {
            subtype,
            session_id,
            model,
        } if subtype == "init" => {
            let mut events = Vec::new();
            if let Some(id) = session_id {
                events.push(AssistantEvent::SessionStarted(id));
            }
            if let Some(model) = model {
                events.push(AssistantEvent::Connected(model));
            }
            events
        }
        WireMessage::System { .. } | WireMessage::Unknown => {
            debug!(line, "Ignoring assistant message");
            Vec::new()
        }
        WireMessage::Assistant { message } => {
            let blocks: Vec<ContentBlock> = match message.content {
                WireContent::Text(text) => vec![ContentBlock::Text(text)],
                WireContent::Blocks(blocks) => blocks
                    .into_iter()
                    .filter_map(|block| match block {
                        WireBlock::Text { text } => Some(ContentBlock::Text(text)),
                        WireBlock::ToolUse { name, input } => {
                            Some(ContentBlock::ToolUse { name, input })
                        }
                        _ => None,
                    })
                    .collect(),
            };
            if blocks.is_empty() {
                Vec::new()
            } else {
                vec![AssistantEvent::Assistant(blocks)]
            }
        }
        WireMessage::User { message } => match message.content {
            WireContent::Text(_) => Vec::new(),
            WireContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    WireBlock::ToolResult { content, is_error } => {
                        Some(AssistantEvent::ToolResult {
                            content: flatten_tool_content(&content),
                            is_error,
                        })
                    }
                    _ => None,
                })
                .collect(),
        },
        WireMessage::Result {
            subtype,
            is_error,
            num_turns,
            duration_ms,
            total_cost_usd,
            result,
        } => {
            let outcome = match subtype.as_str() {
                "success" if !is_error => ResultOutcome::Success,
                "error_max_turns" => ResultOutcome::MaxTurns,
                _ => ResultOutcome::Error(result.unwrap_or(subtype)),
            };
            vec![AssistantEvent::Result(ExchangeResult {
                outcome,
                turns: num_turns,
                duration_ms,
                cost_usd: total_cost_usd,
            })]
        }
        WireMessage::ControlRequest {
            request_id,
            request,
        } => match request {
            WireControlRequest::CanUseTool { tool_name, input } => {
                vec![AssistantEvent::PermissionRequest {
                    request_id,
                    tool_name,
                    input,
                }]
            }
            WireControlRequest::Other => Vec::new(),
        },
    };
    Ok(events)
}

/// Tool results are either a plain string or a list of text blocks.
fn flatten_tool_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The first line written to the assistant's stdin.
pub fn user_message_line(prompt: &str) -> String {
    json!({
        "type": "user",
        "message": { "role": "user", "content": prompt },
        "parent_tool_use_id": null,
    })
    .to_string()
}

/// Line answering a permission request.
pub fn control_response_line(request_id: &str, reply: &PermissionReply) -> String {
    let decision = match reply {
        PermissionReply::Allow { input } => json!({ "behavior": "allow", "updatedInput": input }),
        PermissionReply::Deny { message } => json!({ "behavior": "deny", "message": message }),
    };
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": decision,
        },
    })
    .to_string()
}
