//! Conversation state shared by every backend: the active mode, the
//! assistant's session id and the plain chat history.
//!
//! Only the active provider's half is consulted for an exchange. The assistant
//! keeps its context server-side behind `session_id`, while the chat model is
//! memoryless and gets `history` replayed on every call.
use crate::completion::ChatMessage;
use crate::mode::{Engine, Mode, Provider};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SessionState {
    mode: Mode,
    session_id: Option<String>,
    history: Vec<ChatMessage>,
}

impl SessionState {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Flips the provider and returns the new one. The engine is kept.
    pub fn switch_provider(&mut self) -> Provider {
        self.mode.provider = self.mode.provider.toggled();
        debug!(mode = %self.mode, "Switched provider");
        self.mode.provider
    }

    /// Flips the engine, returning `None` when the chat provider is active.
    ///
    /// Entering the mediated engine drops the session id since the two
    /// engines never share one.
    pub fn switch_engine(&mut self) -> Option<Engine> {
        if self.mode.provider != Provider::Assistant {
            return None;
        }
        self.set_engine(self.mode.engine.toggled());
        Some(self.mode.engine)
    }

    pub fn set_engine(&mut self, engine: Engine) {
        self.mode.engine = engine;
        if engine == Engine::Mediated {
            self.session_id = None;
        }
        debug!(mode = %self.mode, "Switched engine");
    }

    /// Forgets both the chat history and the assistant session.
    pub fn clear(&mut self) {
        self.history.clear();
        self.session_id = None;
    }

    pub fn set_session_id(&mut self, id: String) {
        debug!(session_id = %id, "Session started");
        self.session_id = Some(id);
    }

    pub fn reset_session(&mut self) {
        if let Some(id) = self.session_id.take() {
            debug!(session_id = %id, "Session reset");
        }
    }

    /// Appends a completed chat exchange, user turn first.
    pub fn record_exchange(&mut self, message: &str, response: &str) {
        self.history.push(ChatMessage::user(message));
        self.history.push(ChatMessage::assistant(response));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_provider_alternates() {
        let mut state = SessionState::default();
        let seen: Vec<Provider> = (0..4).map(|_| state.switch_provider()).collect();
        assert_eq!(
            seen,
            vec![
                Provider::Chat,
                Provider::Assistant,
                Provider::Chat,
                Provider::Assistant
            ]
        );
    }

    #[test]
    fn test_switch_engine_alternates_for_assistant() {
        let mut state = SessionState::default();
        assert_eq!(state.switch_engine(), Some(Engine::Native));
        assert_eq!(state.switch_engine(), Some(Engine::Mediated));
        assert_eq!(state.switch_engine(), Some(Engine::Native));
    }

    #[test]
    fn test_switch_engine_ignored_for_chat() {
        let mut state = SessionState::default();
        state.switch_provider();
        assert_eq!(state.switch_engine(), None);
        assert_eq!(state.mode().engine, Engine::Mediated);
    }

    #[test]
    fn test_engine_remembered_across_provider_switch() {
        let mut state = SessionState::default();
        state.switch_engine();
        state.switch_provider();
        state.switch_provider();
        assert_eq!(state.mode(), Mode::new(Provider::Assistant, Engine::Native));
    }

    #[test]
    fn test_entering_mediated_resets_session() {
        let mut state = SessionState::default();
        state.switch_engine();
        state.set_session_id("abc".to_string());
        state.switch_engine();
        assert_eq!(state.session_id(), None);
    }

    #[test]
    fn test_clear_resets_history_and_session() {
        let mut state = SessionState::default();
        state.set_session_id("abc".to_string());
        state.record_exchange("hi", "hello");

        state.clear();

        assert!(state.history().is_empty());
        assert_eq!(state.session_id(), None);
    }

    #[test]
    fn test_record_exchange_appends_in_order() {
        let mut state = SessionState::default();
        state.record_exchange("hi", "hello");
        state.record_exchange("bye", "see ya");

        assert_eq!(
            state.history(),
            &[
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("bye"),
                ChatMessage::assistant("see ya"),
            ]
        );
    }
}
