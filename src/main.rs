use clap::{Parser, ValueEnum};
use pincer::application::history::ConversationStore;
use pincer::application::orchestrator::Engine;
use pincer::application::registry::ToolRegistry;
use pincer::application::tools::bridge::BridgeTool;
use pincer::application::tools::shell::ShellTool;
use pincer::application::tools::skills::{
    AddSkillFromUrlTool, AddSkillTool, ListSkillsTool, ReloadSkillsTool, SkillLibrary,
    SystemPrompt,
};
use pincer::application::tools::subagents::SubagentsTool;
use pincer::config::{AppConfig, ProviderKind};
use pincer::infrastructure::bridge::ProcessBridge;
use pincer::infrastructure::model::credentials::{CredentialProvider, FileCredential};
use pincer::infrastructure::model::{
    ChatBackend, CompletionClient, anthropic::AnthropicBackend, openai::OpenAiBackend,
};
use pincer::infrastructure::server::{self, ServerState};
use serde_json::json;
use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "pincer",
    version,
    about = "LLM automation agent with inline tool-call orchestration"
)]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long, value_enum, default_value_t = RunMode::Serve)]
    mode: RunMode,
    /// Overrides the listen address from the configuration file.
    #[arg(long)]
    addr: Option<SocketAddr>,
    #[arg(long)]
    conversation: Option<String>,
    prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Serve,
    Chat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    if dotenvy::dotenv().is_ok() {
        debug!("Loaded environment from .env file");
    }
    info!("Starting pincer");

    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, "CLI arguments parsed");
    let config_path = cli.config.as_deref().map(Path::new);
    let config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    } else {
        info!("Loaded configuration using default path or defaults");
    }

    let credentials: Arc<dyn CredentialProvider> = Arc::new(FileCredential::new(
        config.provider.key_file.clone(),
        config.provider.key_env.clone(),
    ));
    let backend: Arc<dyn ChatBackend> = match config.provider.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicBackend::from_config(
            &config.provider,
            Arc::clone(&credentials),
        )),
        ProviderKind::OpenAi => Arc::new(OpenAiBackend::from_config(
            &config.provider,
            Arc::clone(&credentials),
        )),
    };
    let client = Arc::new(CompletionClient::new(backend));
    info!(
        provider = client.provider_name(),
        model = client.model(),
        authenticated = client.is_authenticated(),
        "Completion provider configured"
    );

    let bridge = match &config.bridge {
        Some(settings) => {
            let bridge = ProcessBridge::new(settings.clone());
            if bridge.start().await {
                info!(command = settings.command.as_str(), "Bridge started");
            } else {
                warn!(
                    command = settings.command.as_str(),
                    "Bridge failed to start; bridge tools are unavailable"
                );
            }
            Some(bridge)
        }
        None => None,
    };

    let library = SkillLibrary::new(config.agent.skills_dir.clone());
    let prompt = Arc::new(SystemPrompt::new(
        config.agent.system_prompt.clone(),
        library.clone(),
    ));
    let skill_count = prompt.reload().await;
    if skill_count > 0 {
        info!(count = skill_count, "Loaded skills into system prompt");
    }

    let store = Arc::new(ConversationStore::new(
        config.agent.history_window,
        config.agent.max_conversations,
    ));
    // Filled once the engine exists; the subagent tool has to sit in the
    // registry the engine is built from.
    let engine_slot = Arc::new(std::sync::OnceLock::new());

    let mut registry = ToolRegistry::new();
    registry.register("shell", Arc::new(ShellTool));
    registry.register(
        "add_skill",
        Arc::new(AddSkillTool {
            library: library.clone(),
        }),
    );
    registry.register(
        "add_skill_from_url",
        Arc::new(AddSkillFromUrlTool {
            library: library.clone(),
            http: reqwest::Client::new(),
        }),
    );
    registry.register(
        "list_skills",
        Arc::new(ListSkillsTool {
            library: library.clone(),
        }),
    );
    registry.register(
        "reload_skills",
        Arc::new(ReloadSkillsTool {
            prompt: Arc::clone(&prompt),
        }),
    );
    registry.register(
        "run_subagents",
        Arc::new(SubagentsTool::new(
            Arc::clone(&engine_slot),
            Arc::clone(&prompt),
            Arc::clone(&store),
        )),
    );
    if let (Some(bridge), Some(settings)) = (&bridge, &config.bridge) {
        registry.register_prefix(settings.prefix.clone(), Arc::new(BridgeTool::new(bridge.clone())));
    }

    let engine = Arc::new(Engine::new(
        Arc::clone(&client),
        Arc::new(registry),
        Arc::clone(&store),
    ));
    let _ = engine_slot.set(Arc::clone(&engine));

    match cli.mode {
        RunMode::Serve => {
            let addr = cli
                .addr
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.port)));
            let state = Arc::new(ServerState {
                engine,
                store,
                prompt,
                bridge,
                provider: client.provider_name().to_string(),
                model: client.model().to_string(),
                max_rounds: config.agent.max_rounds,
            });
            info!(%addr, "Starting REST server");
            server::serve(state, addr).await?;
        }
        RunMode::Chat => {
            let message = cli.prompt.join(" ");
            if message.trim().is_empty() {
                return Err("prompt required in chat mode".into());
            }
            let conversation_id = cli
                .conversation
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let outcome = engine
                .run(
                    &message,
                    &conversation_id,
                    &prompt.current(),
                    config.agent.max_rounds,
                )
                .await
                .map_err(|err| err.user_message())?;
            let output = json!({
                "conversation_id": conversation_id,
                "response": outcome.response,
                "reasoning": outcome.reasoning,
                "tokens": outcome.tokens,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    info!("Agent execution finished");
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
