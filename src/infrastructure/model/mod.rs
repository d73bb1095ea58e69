pub mod anthropic;
pub mod credentials;
pub mod openai;

use crate::domain::types::{ChatMessage, TokenUsage};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const EMPTY_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub reasoning: Option<String>,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Network(err) => {
                if err.is_connect() {
                    "Could not reach the completion provider. Check network connectivity."
                        .to_string()
                } else if err.is_timeout() {
                    "The completion provider timed out. Try again shortly.".to_string()
                } else if let Some(status) = err.status() {
                    format!(
                        "The completion provider rejected the request with status {}.",
                        status.as_u16()
                    )
                } else {
                    "A network error occurred while contacting the completion provider."
                        .to_string()
                }
            }
            ProviderError::InvalidResponse(_) => {
                "The completion provider returned an unreadable response.".to_string()
            }
        }
    }
}

/// One upstream chat-completion wire format.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    /// Whether a usable credential is currently available.
    fn is_authenticated(&self) -> bool;
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Completion, ProviderError>;
}

/// Wraps a backend with the cross-cutting completion policy: process-wide
/// single-in-flight serialization, one fixed-delay retry on an empty text
/// response, and extraction of inline `<think>` reasoning blocks.
pub struct CompletionClient {
    backend: Arc<dyn ChatBackend>,
    // Held for the duration of the upstream round trip; tokio mutexes queue
    // waiters FIFO, so concurrent conversations serialize by arrival.
    gate: Mutex<()>,
}

impl CompletionClient {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            gate: Mutex::new(()),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.backend.name()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn is_authenticated(&self) -> bool {
        self.backend.is_authenticated()
    }

    pub async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Completion, ProviderError> {
        let mut completion = self.call_once(system, messages).await?;

        if completion.text.is_empty() {
            warn!(
                provider = self.backend.name(),
                "Empty completion text; retrying once"
            );
            sleep(EMPTY_RETRY_DELAY).await;
            completion = self.call_once(system, messages).await?;
        }

        if completion.text.is_empty() && completion.usage.error.is_none() {
            completion.usage.error = Some("empty response".to_string());
        }

        if completion.reasoning.is_none() {
            let (text, reasoning) = extract_think_block(&completion.text);
            completion.text = text;
            completion.reasoning = reasoning;
        }

        Ok(completion)
    }

    async fn call_once(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Completion, ProviderError> {
        let _serialized = self.gate.lock().await;
        debug!(
            provider = self.backend.name(),
            messages = messages.len(),
            "Issuing completion call"
        );
        let completion = self.backend.complete(system, messages).await?;
        info!(
            provider = self.backend.name(),
            tokens = completion.usage.total(),
            "Completion call finished"
        );
        Ok(completion)
    }
}

/// Pull the first inline `<think>...</think>` block out of `text`, returning
/// the visible text with every such block removed plus the captured
/// reasoning. Matching is case-insensitive.
fn extract_think_block(text: &str) -> (String, Option<String>) {
    let mut visible = text.to_string();
    let mut reasoning: Option<String> = None;

    loop {
        // ASCII lowercasing keeps byte offsets aligned with `visible`.
        let lower = visible.to_ascii_lowercase();
        let Some(open) = lower.find("<think>") else {
            break;
        };
        let Some(close_offset) = lower[open..].find("</think>") else {
            break;
        };
        let close = open + close_offset;
        let inner = visible[open + "<think>".len()..close].trim().to_string();
        if reasoning.is_none() && !inner.is_empty() {
            reasoning = Some(inner);
        }
        visible.replace_range(open..close + "</think>".len(), "");
    }

    (visible.trim().to_string(), reasoning)
}
