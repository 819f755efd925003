use crate::completion::{CancellationToken, ChatBackend, ChatMessage, SenderType};
use crate::config::ChatConfig;
use crate::error::BackendError;
use anyhow::{Result, anyhow};
use async_openai::config::OpenAIConfig;
use async_openai::{
    Client as OpenAIClient,
    types::chat::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

/// Chat model behind an OpenAI compatible `/chat/completions` endpoint.
pub struct OpenAIChatBackend {
    config: ChatConfig,
}

impl OpenAIChatBackend {
    pub fn new(config: ChatConfig) -> Self {
        Self { config }
    }

    /// Builds a client for one request. The key is resolved here so that a
    /// missing variable only fails the exchange that needs it.
    fn client(&self) -> Result<OpenAIClient<OpenAIConfig>, BackendError> {
        let api_key = self.config.resolve_api_key()?;
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(self.config.base_url.trim_end_matches('/'));
        Ok(OpenAIClient::with_config(config))
    }

    fn to_openai_message(msg: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let message = match msg.sender {
            SenderType::Assistant => ChatCompletionRequestMessage::Assistant(
                async_openai::types::chat::ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.text.as_str())
                    .build()?,
            ),
            SenderType::User => ChatCompletionRequestMessage::User(
                async_openai::types::chat::ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.text.as_str())
                    .build()?,
            ),
        };
        Ok(message)
    }

    /// Replays the prior turns followed by the new user message.
    fn build_messages(
        history: &[ChatMessage],
        message: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        history
            .iter()
            .chain(std::iter::once(&ChatMessage::user(message)))
            .map(Self::to_openai_message)
            .collect()
    }
}

#[async_trait]
impl ChatBackend for OpenAIChatBackend {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn stream_chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        cancel_token: CancellationToken,
    ) -> BoxStream<'_, Result<String>> {
        let client = match self.client() {
            Ok(client) => client,
            Err(err) => return Box::pin(futures::stream::once(async move { Err(err.into()) })),
        };

        let request = Self::build_messages(history, message).and_then(|messages| {
            CreateChatCompletionRequestArgs::default()
                .model(self.config.model.clone())
                .messages(messages)
                .stream(true)
                .build()
                .map_err(|err| anyhow!("Invalid request: {err}"))
        });
        let request = match request {
            Ok(req) => req,
            Err(err) => return Box::pin(futures::stream::once(async move { Err(err) })),
        };
        debug!(base_url = %self.config.base_url, turns = history.len(), "Sending chat request");

        let outer_stream = async_stream::stream! {
            let mut stream = match client.chat().create_stream(request).await {
                Ok(stream) => stream,
                Err(err) => {
                    yield Err(anyhow!("Chat request failed: {err}"));
                    return;
                }
            };

            while let Some(next) = stream.next().await {
                // Check for cancellation *before* processing the chunk
                if cancel_token.is_cancelled() {
                    yield Err(BackendError::Cancelled.into());
                    return;
                }

                match next {
                    Ok(chunk) => {
                        let Some(choice) = chunk.choices.first() else {
                            continue;
                        };
                        if let Some(reason) = &choice.finish_reason {
                            debug!(finish_reason = ?reason, "Chat stream finished");
                        }
                        if let Some(text) = &choice.delta.content
                            && !text.is_empty()
                        {
                            yield Ok(text.clone());
                        }
                    }
                    Err(err) => {
                        yield Err(anyhow!("Chat stream error: {err}"));
                        return;
                    }
                }
            }
        };

        Box::pin(outer_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::{Value, json};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    fn mock_event_stream_body(fragments: &[&str]) -> String {
        let mut events: Vec<Value> = fragments
            .iter()
            .map(|text| {
                json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion.chunk",
                    "created": 1684,
                    "model": "gemini-2.0-flash",
                    "choices": [{"delta": {"content": text}, "index": 0, "finish_reason": null}]
                })
            })
            .collect();
        events.push(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1684,
            "model": "gemini-2.0-flash",
            "choices": [{"delta": {}, "index": 0, "finish_reason": "stop"}]
        }));

        let mut mock_body = events
            .into_iter()
            .map(|event| format!("data: {}\n\n", serde_json::to_string(&event).unwrap()))
            .collect::<String>();
        mock_body.push_str("data: [DONE]\n\n");
        mock_body
    }

    fn mock_config(server_url: &str) -> ChatConfig {
        ChatConfig {
            model: "gemini-2.0-flash".to_string(),
            base_url: server_url.to_string(),
            api_key: "MOCK_API_KEY".to_string(),
        }
    }

    async fn collect(backend: &OpenAIChatBackend, history: &[ChatMessage]) -> Vec<Result<String>> {
        backend
            .stream_chat(history, "bye", CancellationToken::new())
            .await
            .collect()
            .await
    }

    #[test]
    fn test_build_messages_replays_history() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let messages = OpenAIChatBackend::build_messages(&history, "bye").unwrap();

        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(
            messages[1],
            ChatCompletionRequestMessage::Assistant(_)
        ));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::User(_)));
    }

    #[tokio::test]
    async fn test_stream_chat_yields_fragments() {
        let server = MockServer::start().await;
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer MOCK_API_KEY"))
            .and(body_partial_json(json!({
                "model": "gemini-2.0-flash",
                "stream": true,
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "bye"}
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(mock_event_stream_body(&["see", " ya"]), "text/event-stream")
                    .insert_header("Connection", "close"),
            )
            .mount(&server)
            .await;

        let backend = OpenAIChatBackend::new(mock_config(&server.uri()));
        let fragments: Vec<String> = collect(&backend, &history)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(fragments, vec!["see".to_string(), " ya".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_chat_cancelled_before_first_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(mock_event_stream_body(&["never"]), "text/event-stream")
                    .insert_header("Connection", "close"),
            )
            .mount(&server)
            .await;

        let backend = OpenAIChatBackend::new(mock_config(&server.uri()));
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let results: Vec<Result<String>> = backend
            .stream_chat(&[], "bye", cancel_token)
            .await
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        let err = results.into_iter().next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_stream_chat_reports_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "Incorrect API key provided",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": "invalid_api_key"
                }
            })))
            .mount(&server)
            .await;

        let backend = OpenAIChatBackend::new(mock_config(&server.uri()));
        let results = collect(&backend, &[]).await;

        let err = results.into_iter().next().unwrap().unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Credential);
    }

    #[tokio::test]
    async fn test_stream_chat_missing_credential() {
        let backend = OpenAIChatBackend::new(ChatConfig {
            api_key: "env:TANDEM_TEST_SURELY_UNSET_KEY".to_string(),
            ..Default::default()
        });
        let results = collect(&backend, &[]).await;
        let err = results.into_iter().next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::MissingCredential(_))
        ));
    }
}
