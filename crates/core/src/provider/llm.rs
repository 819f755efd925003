use crate::assistant::AssistantBackend;
use crate::completion::ChatBackend;
use crate::config::Config;
use crate::provider::{claude, openai};
use tracing::instrument;

#[instrument(skip(config))]
pub fn get_assistant_backend(config: &Config) -> Box<dyn AssistantBackend> {
    Box::new(claude::ClaudeProcessBackend::new(&config.assistant))
}

#[instrument(skip(config))]
pub fn get_chat_backend(config: &Config) -> Box<dyn ChatBackend> {
    Box::new(openai::OpenAIChatBackend::new(config.chat.clone()))
}
