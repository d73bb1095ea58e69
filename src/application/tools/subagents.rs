use crate::application::history::ConversationStore;
use crate::application::orchestrator::Engine;
use crate::application::registry::{HandlerError, ToolHandler};
use crate::application::tools::skills::SystemPrompt;
use crate::domain::types::ToolResult;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value, json};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

const MAX_TASKS: usize = 5;
const DEFAULT_ROUNDS: usize = 5;
const ROUND_CEILING: usize = 10;
const TASK_ECHO_LIMIT: usize = 200;

/// Runs a batch of one-shot tasks through the same engine, prompt, and tools
/// as the main conversation. Each task gets a fresh conversation id that is
/// cleared once the task finishes, so subagents never pollute caller history.
///
/// The engine slot is filled after construction because the engine itself
/// owns the registry this tool is registered in.
pub struct SubagentsTool {
    engine: Arc<OnceLock<Arc<Engine>>>,
    prompt: Arc<SystemPrompt>,
    store: Arc<ConversationStore>,
}

impl SubagentsTool {
    pub fn new(
        engine: Arc<OnceLock<Arc<Engine>>>,
        prompt: Arc<SystemPrompt>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            engine,
            prompt,
            store,
        }
    }
}

#[async_trait]
impl ToolHandler for SubagentsTool {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
        let Some(engine) = self.engine.get() else {
            return Ok(ToolResult::failure("agent engine is not ready yet"));
        };

        let tasks = match params.get("tasks") {
            Some(Value::Array(tasks)) if !tasks.is_empty() => tasks.clone(),
            _ => {
                return Ok(ToolResult::failure(
                    "tasks (non-empty array) required; each item is a string or { id?, task }",
                ));
            }
        };
        if tasks.len() > MAX_TASKS {
            return Ok(ToolResult::failure(format!(
                "max {MAX_TASKS} tasks per run_subagents"
            )));
        }
        let max_rounds = params
            .get("maxRounds")
            .and_then(Value::as_u64)
            .map(|rounds| rounds as usize)
            .unwrap_or(DEFAULT_ROUNDS)
            .min(ROUND_CEILING);

        let batch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let system_prompt = self.prompt.current();
        let mut results = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            let id = task
                .get("id")
                .map(|id| match id {
                    Value::String(id) => id.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| (index + 1).to_string());
            let text = match task {
                Value::String(text) => Some(text.as_str()),
                Value::Object(fields) => fields
                    .get("task")
                    .or_else(|| fields.get("message"))
                    .and_then(Value::as_str),
                _ => None,
            };
            let Some(text) = text.filter(|text| !text.is_empty()) else {
                results.push(json!({
                    "id": id,
                    "task": "",
                    "response": "",
                    "error": "missing task text",
                }));
                continue;
            };

            let conversation_id = format!("subagent-{batch}-{id}");
            match engine
                .run(text, &conversation_id, &system_prompt, max_rounds)
                .await
            {
                Ok(outcome) => results.push(json!({
                    "id": id,
                    "task": truncate(text, TASK_ECHO_LIMIT),
                    "response": outcome.response,
                    "tokens": outcome.tokens,
                })),
                Err(err) => results.push(json!({
                    "id": id,
                    "task": truncate(text, TASK_ECHO_LIMIT),
                    "response": "",
                    "error": err.user_message(),
                })),
            }
            self.store.clear(&conversation_id).await;
        }

        info!(count = results.len(), "Subagent batch completed");
        let mut payload = JsonMap::new();
        payload.insert("results".to_string(), Value::Array(results));
        Ok(ToolResult::success(payload))
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
    use crate::application::registry::ToolRegistry;
    use crate::application::tools::skills::SkillLibrary;
    use crate::domain::types::{ChatMessage, TokenUsage};
    use crate::infrastructure::model::{ChatBackend, Completion, CompletionClient, ProviderError};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedBackend {
        responses: Mutex<VecDeque<String>>,
        history_lens: Mutex<Vec<usize>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
                history_lens: Mutex::new(Vec::new()),
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
            true
        }

        async fn complete(
            &self,
            _system: &str,
            messages: &[ChatMessage],
        ) -> Result<Completion, ProviderError> {
            self.history_lens.lock().unwrap().push(messages.len());
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(Completion {
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

    fn tool_with_engine(backend: Arc<ScriptedBackend>) -> (SubagentsTool, Arc<ConversationStore>) {
        let dir = tempdir().expect("tempdir");
        let prompt = Arc::new(SystemPrompt::new("base", SkillLibrary::new(dir.path())));
        let store = Arc::new(ConversationStore::new(20, 256));
        let slot = Arc::new(OnceLock::new());
        let tool = SubagentsTool::new(Arc::clone(&slot), prompt, Arc::clone(&store));
        let engine = Arc::new(Engine::new(
            Arc::new(CompletionClient::new(backend)),
            Arc::new(ToolRegistry::new()),
            Arc::clone(&store),
        ));
        slot.set(engine).ok().expect("slot empty");
        (tool, store)
    }

    #[tokio::test]
    async fn runs_tasks_sequentially_and_aggregates_results() {
        let backend = Arc::new(ScriptedBackend::new(vec!["alpha done", "beta done"]));
        let (tool, _store) = tool_with_engine(backend);

        let result = tool
            .call(json!({"tasks": ["first task", {"id": "beta", "task": "second task"}]}))
            .await
            .expect("handler ok");
        assert!(result.success);
        let results = result.payload["results"].as_array().expect("results array");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["id"], json!("1"));
        assert_eq!(results[0]["task"], json!("first task"));
        assert_eq!(results[0]["response"], json!("alpha done"));
        assert_eq!(results[0]["tokens"]["prompt_tokens"], json!(10));
        assert_eq!(results[1]["id"], json!("beta"));
        assert_eq!(results[1]["response"], json!("beta done"));
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_batches() {
        let (tool, _store) = tool_with_engine(Arc::new(ScriptedBackend::new(vec![])));

        let empty = tool.call(json!({"tasks": []})).await.expect("handler ok");
        assert!(!empty.success);
        assert!(empty.error.as_deref().unwrap().contains("non-empty array"));

        let missing = tool.call(json!({})).await.expect("handler ok");
        assert!(!missing.success);

        let too_many = tool
            .call(json!({"tasks": ["a", "b", "c", "d", "e", "f"]}))
            .await
            .expect("handler ok");
        assert!(!too_many.success);
        assert!(too_many.error.as_deref().unwrap().contains("max 5"));
    }

    #[tokio::test]
    async fn task_without_text_is_reported_and_the_batch_continues() {
        let backend = Arc::new(ScriptedBackend::new(vec!["only valid task ran"]));
        let (tool, _store) = tool_with_engine(backend);

        let result = tool
            .call(json!({"tasks": [{"id": "bad"}, "real work"]}))
            .await
            .expect("handler ok");
        assert!(result.success);
        let results = result.payload["results"].as_array().expect("results array");
        assert_eq!(results[0]["error"], json!("missing task text"));
        assert_eq!(results[0]["response"], json!(""));
        assert_eq!(results[1]["response"], json!("only valid task ran"));
    }

    #[tokio::test]
    async fn subagent_conversations_are_cleared_after_each_task() {
        let backend = Arc::new(ScriptedBackend::new(vec!["first", "second"]));
        let (tool, _store) = tool_with_engine(Arc::clone(&backend));

        // Both tasks share an explicit id, so they map to the same
        // conversation id within the batch. Without the per-task clear the
        // second completion would see the first task's accumulated history.
        let result = tool
            .call(json!({"tasks": [
                {"id": "shared", "task": "task one"},
                {"id": "shared", "task": "task two"},
            ]}))
            .await
            .expect("handler ok");
        assert!(result.success);
        assert_eq!(*backend.history_lens.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn unfilled_engine_slot_fails_cleanly() {
        let dir = tempdir().expect("tempdir");
        let prompt = Arc::new(SystemPrompt::new("base", SkillLibrary::new(dir.path())));
        let store = Arc::new(ConversationStore::new(20, 256));
        let tool = SubagentsTool::new(Arc::new(OnceLock::new()), prompt, store);

        let result = tool.call(json!({"tasks": ["work"]})).await.expect("handler ok");
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("not ready"));
    }
}
