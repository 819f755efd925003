//! Errors raised by the backends and how the REPL recovers from them.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
    #[error("Backend exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },
    #[error("Malformed event: {0}")]
    Protocol(String),
    #[error("Cancelled by user")]
    Cancelled,
}

/// Recovery class of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or rejected API key. Fixed by the user outside the process.
    Credential,
    /// The backend no longer knows the resumed session.
    Session,
    /// The exchange ran out of turns.
    TurnCeiling,
    /// The backend executable could not be launched.
    Spawn,
    /// Anything else that went wrong mid-stream.
    Transport,
}

impl ErrorKind {
    /// Classifies an error by its type first and its message second.
    pub fn of(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(backend) = cause.downcast_ref::<BackendError>() {
                match backend {
                    BackendError::Spawn { .. } => return ErrorKind::Spawn,
                    BackendError::MissingCredential(_) => return ErrorKind::Credential,
                    _ => {}
                }
            }
        }
        Self::classify(&format!("{error:#}"))
    }

    /// Classifies a raw error message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if mentions(&["api key", "api_key", "apikey", "authentication", "unauthorized"]) {
            ErrorKind::Credential
        } else if mentions(&["no conversation found"])
            || (mentions(&["session", "conversation", "context"])
                && mentions(&["not found", "invalid", "expired"]))
        {
            ErrorKind::Session
        } else if mentions(&["max turns", "max_turns", "maximum number of turns"]) {
            ErrorKind::TurnCeiling
        } else {
            ErrorKind::Transport
        }
    }
}
