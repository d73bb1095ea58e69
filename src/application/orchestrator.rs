use crate::application::history::ConversationStore;
use crate::application::parser::{self, ToolCall};
use crate::application::registry::ToolRegistry;
use crate::domain::types::{MessageRole, TokenUsage, ToolResult};
use crate::infrastructure::model::{CompletionClient, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const EMPTY_RESPONSE_PLACEHOLDER: &str = "Empty response from model.";
const SYNTHESIZED_RESULT_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no credential configured for the completion provider")]
    NotAuthenticated,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl EngineError {
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotAuthenticated => {
                "The completion provider is not configured; set an API key first.".to_string()
            }
            EngineError::Provider(err) => err.user_message(),
        }
    }
}

/// What one conversational turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub response: String,
    pub reasoning: Option<String>,
    pub tokens: TokenUsage,
}

/// The phases a turn moves through after the opening completion. Each
/// round of tool execution passes through Dispatch and Followup before
/// landing back in Evaluate.
enum TurnState {
    Evaluate { text: String },
    Dispatch { call: ToolCall, text: String },
    Followup { tool: String, result: ToolResult },
    Done { text: String },
}

/// Drives a conversational turn: completion, tool-call extraction, tool
/// dispatch, follow-up completions, and final cleanup.
pub struct Engine {
    client: Arc<CompletionClient>,
    registry: Arc<ToolRegistry>,
    store: Arc<ConversationStore>,
}

impl Engine {
    pub fn new(
        client: Arc<CompletionClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            client,
            registry,
            store,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    pub async fn run(
        &self,
        message: &str,
        conversation_id: &str,
        system_prompt: &str,
        max_rounds: usize,
    ) -> Result<TurnOutcome, EngineError> {
        self.store
            .append(conversation_id, MessageRole::User, message)
            .await;

        if !self.client.is_authenticated() {
            self.store.pop_last(conversation_id).await;
            return Err(EngineError::NotAuthenticated);
        }

        let history = self.store.history(conversation_id).await;
        let first = match self.client.complete(system_prompt, &history).await {
            Ok(completion) => completion,
            Err(err) => {
                // Keep history consistent so the caller can retry the
                // same message.
                self.store.pop_last(conversation_id).await;
                return Err(err.into());
            }
        };

        let mut tokens = first.usage.clone();
        let mut reasoning = first.reasoning.clone();
        let mut rounds = 0usize;
        let mut state = TurnState::Evaluate { text: first.text };

        let final_text = loop {
            state = match state {
                TurnState::Evaluate { text } => {
                    if rounds >= max_rounds {
                        TurnState::Done { text }
                    } else {
                        match parser::extract(&text) {
                            Some(call) => TurnState::Dispatch { call, text },
                            None => TurnState::Done { text },
                        }
                    }
                }
                TurnState::Dispatch { call, text } => {
                    rounds += 1;
                    info!(
                        tool = %call.name,
                        round = rounds,
                        conversation = conversation_id,
                        "Dispatching tool call"
                    );
                    let result = match serde_json::from_str(&call.raw_params) {
                        Ok(params) => self.registry.dispatch(&call.name, params).await,
                        Err(err) => {
                            ToolResult::failure(format!("invalid tool parameters: {err}"))
                        }
                    };

                    self.store
                        .append(conversation_id, MessageRole::Assistant, &text)
                        .await;
                    self.store
                        .append(
                            conversation_id,
                            MessageRole::User,
                            format!("[TOOL_RESULT:{}]\n{}", call.name, result.render()),
                        )
                        .await;

                    TurnState::Followup {
                        tool: call.name,
                        result,
                    }
                }
                TurnState::Followup { tool, result } => {
                    let history = self.store.history(conversation_id).await;
                    match self.client.complete(system_prompt, &history).await {
                        Ok(completion) => {
                            tokens.absorb(&completion.usage);
                            if completion.reasoning.is_some() {
                                reasoning = completion.reasoning;
                            }
                            TurnState::Evaluate {
                                text: completion.text,
                            }
                        }
                        Err(err) => {
                            // A tool already ran; degrade to its result
                            // instead of failing the turn.
                            warn!(%err, tool = %tool, "Follow-up completion failed");
                            TurnState::Done {
                                text: format!(
                                    "Tool {tool} result: {}",
                                    truncate(&result.render(), SYNTHESIZED_RESULT_LIMIT)
                                ),
                            }
                        }
                    }
                }
                TurnState::Done { text } => break text,
            };
        };

        let mut response = parser::strip_markers(&final_text);
        if response.is_empty() {
            response = EMPTY_RESPONSE_PLACEHOLDER.to_string();
        }

        self.store
            .append(conversation_id, MessageRole::Assistant, &response)
            .await;

        info!(
            conversation = conversation_id,
            rounds,
            tokens = tokens.total(),
            "Turn complete"
        );
        Ok(TurnOutcome {
            response,
            reasoning,
            tokens,
        })
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::{HandlerError, ToolHandler};
    use crate::domain::types::ChatMessage;
    use crate::infrastructure::model::{ChatBackend, Completion};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<String, ProviderError>>>,
        authenticated: bool,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                authenticated: true,
            }
        }

        fn unauthenticated() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                authenticated: false,
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn complete(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
        ) -> Result<Completion, ProviderError> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(String::new()));
            next.map(|text| Completion {
                text,
                reasoning: None,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    error: None,
                },
            })
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
            let msg = params
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(ToolResult::from_value(json!({ "msg": msg })))
        }
    }

    fn engine(
        backend: ScriptedBackend,
        configure: impl FnOnce(&mut ToolRegistry),
    ) -> (Engine, Arc<ConversationStore>) {
        let mut registry = ToolRegistry::new();
        configure(&mut registry);
        let store = Arc::new(ConversationStore::new(20, 256));
        let engine = Engine::new(
            Arc::new(CompletionClient::new(Arc::new(backend))),
            Arc::new(registry),
            Arc::clone(&store),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn executes_tool_round_then_returns_followup_text() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"[TOOL_CALL:echo:{"msg":"hi"}]"#.to_string()),
            Ok("done".to_string()),
        ]);
        let (engine, store) = engine(backend, |registry| {
            registry.register("echo", Arc::new(EchoTool));
        });

        let outcome = engine.run("hello", "c1", "sys", 10).await.expect("turn ok");
        assert_eq!(outcome.response, "done");
        assert_eq!(outcome.tokens.total(), 30);

        let history = store.history("c1").await;
        assert_eq!(history.len(), 4);
        assert!(history[2].content.starts_with("[TOOL_RESULT:echo]"));
        assert!(history[2].content.contains("\"msg\": \"hi\""));
        assert_eq!(history[3].content, "done");
    }

    #[tokio::test]
    async fn exhausted_round_budget_strips_unexecuted_marker() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"[TOOL_CALL:echo:{"msg":"one"}]"#.to_string()),
            Ok(r#"after [TOOL_CALL:echo:{"msg":"two"}] text"#.to_string()),
        ]);
        let (engine, _store) = engine(backend, |registry| {
            registry.register("echo", Arc::new(EchoTool));
        });

        let outcome = engine.run("go", "c1", "sys", 1).await.expect("turn ok");
        assert_eq!(outcome.response, "after  text");
    }

    #[tokio::test]
    async fn zero_round_budget_never_dispatches() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"pre [TOOL_CALL:echo:{"msg":"hi"}] post"#.to_string()
        )]);
        let (engine, store) = engine(backend, |registry| {
            registry.register("echo", Arc::new(EchoTool));
        });

        let outcome = engine.run("go", "c1", "sys", 0).await.expect("turn ok");
        assert_eq!(outcome.response, "pre  post");
        // User message plus final assistant text only.
        assert_eq!(store.history("c1").await.len(), 2);
    }

    #[tokio::test]
    async fn malformed_params_are_fed_back_as_tool_error() {
        let backend = ScriptedBackend::new(vec![
            Ok("[TOOL_CALL:echo:{\"msg\": }]".to_string()),
            Ok("recovered".to_string()),
        ]);
        let (engine, store) = engine(backend, |registry| {
            registry.register("echo", Arc::new(EchoTool));
        });

        let outcome = engine.run("go", "c1", "sys", 10).await.expect("turn ok");
        assert_eq!(outcome.response, "recovered");
        let history = store.history("c1").await;
        assert!(history[2].content.contains("invalid tool parameters"));
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"[TOOL_CALL:missing:{}]"#.to_string()),
            Ok("moved on".to_string()),
        ]);
        let (engine, store) = engine(backend, |_| {});

        let outcome = engine.run("go", "c1", "sys", 10).await.expect("turn ok");
        assert_eq!(outcome.response, "moved on");
        let history = store.history("c1").await;
        assert!(history[2].content.contains("unknown tool: missing"));
    }

    #[tokio::test]
    async fn missing_credential_rolls_back_user_message() {
        let (engine, store) = engine(ScriptedBackend::unauthenticated(), |_| {});

        let err = engine
            .run("hello", "c1", "sys", 10)
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngineError::NotAuthenticated));
        assert!(store.history("c1").await.is_empty());
    }

    #[tokio::test]
    async fn first_call_provider_error_rolls_back_user_message() {
        let backend = ScriptedBackend::new(vec![Err(ProviderError::InvalidResponse(
            "boom".to_string(),
        ))]);
        let (engine, store) = engine(backend, |_| {});

        let err = engine
            .run("hello", "c1", "sys", 10)
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngineError::Provider(_)));
        assert!(store.history("c1").await.is_empty());
    }

    #[tokio::test]
    async fn followup_failure_degrades_to_tool_result() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"[TOOL_CALL:echo:{"msg":"hi"}]"#.to_string()),
            Err(ProviderError::InvalidResponse("down".to_string())),
        ]);
        let (engine, _store) = engine(backend, |registry| {
            registry.register("echo", Arc::new(EchoTool));
        });

        let outcome = engine.run("go", "c1", "sys", 10).await.expect("turn ok");
        assert!(outcome.response.starts_with("Tool echo result:"));
        assert!(outcome.response.contains("\"msg\""));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_final_text_becomes_placeholder() {
        let backend = ScriptedBackend::new(vec![Ok(String::new()), Ok(String::new())]);
        let (engine, _store) = engine(backend, |_| {});

        let outcome = engine.run("go", "c1", "sys", 10).await.expect("turn ok");
        assert_eq!(outcome.response, EMPTY_RESPONSE_PLACEHOLDER);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(200);
        let cut = truncate(&text, 301);
        assert!(cut.len() <= 301);
        assert!(text.starts_with(cut));
    }
}
