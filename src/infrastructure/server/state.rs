use crate::application::history::ConversationStore;
use crate::application::orchestrator::Engine;
use crate::application::tools::skills::SystemPrompt;
use crate::infrastructure::bridge::ProcessBridge;
use std::sync::Arc;

pub struct ServerState {
    pub engine: Arc<Engine>,
    pub store: Arc<ConversationStore>,
    pub prompt: Arc<SystemPrompt>,
    pub bridge: Option<ProcessBridge>,
    pub provider: String,
    pub model: String,
    pub max_rounds: usize,
}
