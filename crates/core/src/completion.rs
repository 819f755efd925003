use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderType {
    Assistant,
    User,
}

impl From<SenderType> for String {
    fn from(val: SenderType) -> Self {
        val.as_str().into()
    }
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match &self {
            SenderType::User => "user",
            SenderType::Assistant => "assistant",
        }
    }
}

/// A single turn of the plain chat conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub sender: SenderType,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self {
            text: text.to_string(),
            sender: SenderType::User,
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            text: text.to_string(),
            sender: SenderType::Assistant,
        }
    }
}

/// A stateless, streaming chat model.
///
/// The model remembers nothing between calls, so every call carries the
/// full prior history followed by the new user message. The returned stream
/// yields text fragments in arrival order.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn stream_chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        cancel_token: CancellationToken,
    ) -> BoxStream<'_, Result<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        let cloned_token = token.clone();
        assert!(cloned_token.is_cancelled()); // Cloned token reflects original state
    }

    #[test]
    fn test_chat_message_constructors() {
        let user = ChatMessage::user("hi");
        assert_eq!(user.sender, SenderType::User);
        assert_eq!(user.text, "hi");

        let assistant = ChatMessage::assistant("hello");
        assert_eq!(assistant.sender, SenderType::Assistant);
        assert_eq!(String::from(assistant.sender), "assistant");
    }
}
