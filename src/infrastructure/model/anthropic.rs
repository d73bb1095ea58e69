use super::credentials::CredentialProvider;
use super::{ChatBackend, Completion, ProviderError};
use crate::config::ProviderConfig;
use crate::domain::types::{ChatMessage, MessageRole, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;
const TEMPERATURE: f32 = 0.7;

/// Anthropic-style messages API: the system prompt rides in a top-level
/// field and the reply arrives as an array of content blocks.
pub struct AnthropicBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl AnthropicBackend {
    pub fn from_config(config: &ProviderConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            credentials,
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.bearer().is_some()
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<Completion, ProviderError> {
        let bearer = self.credentials.bearer().ok_or_else(|| {
            ProviderError::InvalidResponse("no credential available".to_string())
        })?;

        let payload = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            system: system.to_string(),
            messages: messages
                .iter()
                .filter(|msg| msg.role != MessageRole::System)
                .map(|msg| WireMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                })
                .collect(),
        };

        info!(
            model = self.model.as_str(),
            messages = payload.messages.len(),
            "Sending request to messages API"
        );
        let response: MessagesResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Received response from messages API");

        let text = response
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let mut usage = response.usage.unwrap_or_default();
        if text.is_empty() && usage.error.is_none() {
            usage.error = response.error.map(|err| err.message);
        }

        Ok(Completion {
            text,
            reasoning: response
                .reasoning_content
                .filter(|reasoning| !reasoning.is_empty()),
            usage,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}
