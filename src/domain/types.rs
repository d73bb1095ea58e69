use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Aggregated token accounting for one or more completion calls.
///
/// Providers disagree on field names (`prompt_tokens` vs `input_tokens`), so
/// deserialization accepts both spellings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TokenUsage {
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: u64,
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: u64,
    /// Diagnostic tag attached when the provider returned no usable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn absorb(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        if self.error.is_none() {
            self.error = other.error.clone();
        }
    }
}

/// Uniform shape every tool handler returns so the orchestration loop can
/// serialize results back into conversation text without per-tool casing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub payload: JsonMap<String, Value>,
}

impl ToolResult {
    pub fn success(payload: JsonMap<String, Value>) -> Self {
        Self {
            success: true,
            error: None,
            payload,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            payload: JsonMap::new(),
        }
    }

    /// Wrap an arbitrary JSON payload produced by a tool. Objects carrying an
    /// `error` string are treated as failures; non-object values are nested
    /// under a `result` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let error = map
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(message) = error {
                    map.remove("error");
                    Self {
                        success: false,
                        error: Some(message),
                        payload: map,
                    }
                } else {
                    Self::success(map)
                }
            }
            other => {
                let mut map = JsonMap::new();
                map.insert("result".to_string(), other);
                Self::success(map)
            }
        }
    }

    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
