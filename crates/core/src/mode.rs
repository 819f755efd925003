//! Which backend handles the next payload.
//!
//! The mode has two independent axes. `Provider` picks the backend family and
//! `Engine` picks how the coding assistant is driven. The engine is remembered
//! while the chat provider is active.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    /// Tool-augmented coding assistant.
    #[default]
    Assistant,
    /// Stateless conversational model.
    Chat,
}

impl Provider {
    pub fn toggled(self) -> Self {
        match self {
            Provider::Assistant => Provider::Chat,
            Provider::Chat => Provider::Assistant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Assistant => "assistant",
            Provider::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    /// Streaming exchanges through the assistant's structured output.
    #[default]
    Mediated,
    /// The assistant's own interactive program owns the terminal.
    Native,
}

impl Engine {
    pub fn toggled(self) -> Self {
        match self {
            Engine::Mediated => Engine::Native,
            Engine::Native => Engine::Mediated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Mediated => "mediated",
            Engine::Native => "native",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    pub provider: Provider,
    pub engine: Engine,
}

impl Mode {
    pub fn new(provider: Provider, engine: Engine) -> Self {
        Self { provider, engine }
    }

    /// True when payloads go to the native passthrough bridge.
    pub fn is_native(&self) -> bool {
        self.provider == Provider::Assistant && self.engine == Engine::Native
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Provider::Assistant => {
                write!(f, "{} ({})", self.provider.as_str(), self.engine.as_str())
            }
            Provider::Chat => write!(f, "{}", self.provider.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        let mode = Mode::default();
        assert_eq!(mode.provider, Provider::Assistant);
        assert_eq!(mode.engine, Engine::Mediated);
        assert!(!mode.is_native());
    }

    #[test]
    fn test_toggles_alternate() {
        assert_eq!(Provider::Assistant.toggled(), Provider::Chat);
        assert_eq!(Provider::Chat.toggled(), Provider::Assistant);
        assert_eq!(Engine::Mediated.toggled(), Engine::Native);
        assert_eq!(Engine::Native.toggled(), Engine::Mediated);
    }

    #[test]
    fn test_is_native_requires_assistant_provider() {
        assert!(Mode::new(Provider::Assistant, Engine::Native).is_native());
        assert!(!Mode::new(Provider::Chat, Engine::Native).is_native());
    }

    #[test]
    fn test_display() {
        assert_eq!(Mode::default().to_string(), "assistant (mediated)");
        assert_eq!(Mode::new(Provider::Chat, Engine::Native).to_string(), "chat");
    }
}
