use super::credentials::CredentialProvider;
use super::{ChatBackend, Completion, ProviderError};
use crate::config::ProviderConfig;
use crate::domain::types::{ChatMessage, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_TOKENS: u32 = 8192;
const TEMPERATURE: f32 = 0.7;

/// OpenAI-style chat completions API. The system prompt is folded into
/// the messages array as the leading entry.
pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl OpenAiBackend {
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
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
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

        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(WireMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
        wire.extend(messages.iter().map(|msg| WireMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }));

        let payload = CompletionsRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: wire,
        };

        info!(
            model = self.model.as_str(),
            messages = payload.messages.len(),
            "Sending request to chat completions API"
        );
        let response: CompletionsResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Received response from chat completions API");

        let choice = response.choices.into_iter().next();
        let (text, reasoning) = match choice {
            Some(choice) => (
                choice.message.content.unwrap_or_default(),
                choice
                    .message
                    .reasoning
                    .filter(|reasoning| !reasoning.is_empty()),
            ),
            None => (String::new(), None),
        };

        let mut usage = response.usage.unwrap_or_default();
        if text.is_empty() && usage.error.is_none() {
            usage.error = response.error.map(|err| err.message);
        }

        Ok(Completion {
            text,
            reasoning,
            usage,
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionsRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_reads_first_choice() {
        let raw = r#"{
            "choices": [{"message": {"content": "hi", "reasoning_content": "thought"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2}
        }"#;
        let parsed: CompletionsResponse = serde_json::from_str(raw).expect("parse");
        let choice = parsed.choices.into_iter().next().expect("choice");
        assert_eq!(choice.message.content.as_deref(), Some("hi"));
        assert_eq!(choice.message.reasoning.as_deref(), Some("thought"));
        assert_eq!(parsed.usage.expect("usage").total(), 11);
    }

    #[test]
    fn request_carries_generation_limit() {
        let payload = CompletionsRequest {
            model: "gpt-4o-mini".to_string(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: Vec::new(),
        };
        let wire = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(wire["max_tokens"], serde_json::json!(8192));
    }

    #[test]
    fn empty_choices_tolerated() {
        let raw = r#"{"error": {"message": "rate limited"}}"#;
        let parsed: CompletionsResponse = serde_json::from_str(raw).expect("parse");
        assert!(parsed.choices.is_empty());
        assert_eq!(parsed.error.expect("error").message, "rate limited");
    }
}
