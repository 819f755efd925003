//! Plain chat with a stateless model. The conversation so far is replayed on
//! every request.
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::io::Write;
use tandem_core::completion::{CancellationToken, ChatBackend};
use tandem_core::error::BackendError;
use tracing::debug;

use crate::cli::chat::adapter::{Adapter, ExchangeContext, report_failure};
use crate::cli::ux::{GenerationSpinner, format_cancelled};

pub struct ChatAdapter {
    backend: Box<dyn ChatBackend>,
    /// Environment variable named in the hint for credential failures.
    credential_var: String,
}

impl ChatAdapter {
    pub fn new(backend: Box<dyn ChatBackend>, api_key: &str) -> Self {
        let credential_var = api_key
            .strip_prefix("env:")
            .map(str::trim)
            .unwrap_or("GEMINI_API_KEY")
            .to_string();
        Self {
            backend,
            credential_var,
        }
    }
}

#[async_trait(?Send)]
impl Adapter for ChatAdapter {
    async fn send(&mut self, payload: &str, ctx: &mut ExchangeContext<'_>) -> Result<()> {
        let mut spinner = GenerationSpinner::new();
        spinner.start(format!("{} is thinking...", self.backend.model_name()));

        let cancel_token = CancellationToken::new();
        let mut stream = self
            .backend
            .stream_chat(ctx.state.history(), payload, cancel_token.clone())
            .await;
        let mut interrupt = Box::pin(tokio::signal::ctrl_c());
        let mut response = String::new();
        let mut failure: Option<anyhow::Error> = None;

        loop {
            let next = tokio::select! {
                _ = &mut interrupt => {
                    cancel_token.cancel();
                    Some(Err(BackendError::Cancelled.into()))
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    spinner.stop();
                    write!(ctx.out, "{fragment}")?;
                    ctx.out.flush()?;
                    response.push_str(&fragment);
                }
                Some(Err(err)) => {
                    failure = Some(err);
                    break;
                }
                None => break,
            }
        }
        drop(stream);
        spinner.stop();

        if !response.is_empty() && !response.ends_with('\n') {
            writeln!(ctx.out)?;
        }
        match failure {
            None => {
                debug!(chars = response.len(), "Chat response complete");
                ctx.state.record_exchange(payload, &response);
            }
            Some(err) if is_cancelled(&err) => {
                writeln!(ctx.out, "{}", format_cancelled())?;
            }
            Some(err) => {
                report_failure(&mut *ctx.out, &err, &self.credential_var)?;
            }
        }
        Ok(())
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<BackendError>(),
        Some(BackendError::Cancelled)
    )
}
