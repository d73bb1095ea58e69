use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "config/pincer.toml";

const DEFAULT_PORT: u16 = 3100;
const DEFAULT_HISTORY_WINDOW: usize = 20;
const DEFAULT_MAX_ROUNDS: usize = 10;
const DEFAULT_MAX_CONVERSATIONS: usize = 256;
const DEFAULT_SKILLS_DIR: &str = "skills";
const DEFAULT_BRIDGE_PREFIX: &str = "vault_";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an autonomous automation agent running on this host.

To call a tool use exactly: [TOOL_CALL:toolName:jsonObject]
- toolName = the actual tool (e.g. shell, list_skills). NOT the word "name".
- jsonObject = a JSON object; use {} for no params. Examples: [TOOL_CALL:list_skills:{}] or [TOOL_CALL:shell:{"command":"uptime"}]
- For shell: [TOOL_CALL:shell:{"command":"your command"}] (optional: "timeout" in milliseconds). Use shell to run OS commands, read files, check services, etc.
- To add new knowledge: add_skill (create from content) or add_skill_from_url (fetch a .md from a URL). Then reload_skills so it applies. Use list_skills to see what skills you have.
- To split work into one-shot sub-tasks (research, parallel checks): run_subagents with a tasks array. Each task runs with your same skills and tools; you get back aggregated results. Use only when splitting clearly helps.
"#;

/// Which wire format the upstream completion provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    fn default_endpoint(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "https://api.anthropic.com/v1/messages",
            ProviderKind::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::OpenAi => "gpt-4o-mini",
        }
    }

    fn default_key_env(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub endpoint: String,
    pub key_file: Option<PathBuf>,
    pub key_env: String,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Tool names carrying this prefix route to the bridge when no exact
    /// handler is registered.
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub history_window: usize,
    pub max_rounds: usize,
    pub max_conversations: usize,
    pub skills_dir: PathBuf,
    pub system_prompt: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub provider: ProviderConfig,
    pub bridge: Option<BridgeSettings>,
    pub agent: AgentSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    port: Option<u16>,
    provider: Option<RawProvider>,
    bridge: Option<RawBridge>,
    agent: Option<RawAgent>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProvider {
    kind: Option<ProviderKind>,
    model: Option<String>,
    endpoint: Option<String>,
    key_file: Option<PathBuf>,
    key_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBridge {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAgent {
    history_window: Option<usize>,
    max_rounds: Option<usize>,
    max_conversations: Option<usize>,
    skills_dir: Option<PathBuf>,
    system_prompt: Option<String>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(explicit) = path {
            return read_config(explicit);
        }

        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        RawConfig::default().promote()
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading agent configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parsed.promote())
}

impl RawConfig {
    fn promote(self) -> AppConfig {
        let raw_provider = self.provider.unwrap_or_default();
        let kind = raw_provider.kind.unwrap_or(ProviderKind::Anthropic);
        let provider = ProviderConfig {
            kind,
            model: raw_provider
                .model
                .unwrap_or_else(|| kind.default_model().to_string()),
            endpoint: raw_provider
                .endpoint
                .unwrap_or_else(|| kind.default_endpoint().to_string()),
            key_file: raw_provider.key_file,
            key_env: raw_provider
                .key_env
                .unwrap_or_else(|| kind.default_key_env().to_string()),
        };

        let bridge = self.bridge.map(|raw| BridgeSettings {
            command: raw.command,
            args: raw.args,
            env: raw.env,
            prefix: raw
                .prefix
                .unwrap_or_else(|| DEFAULT_BRIDGE_PREFIX.to_string()),
        });

        let raw_agent = self.agent.unwrap_or_default();
        let agent = AgentSettings {
            history_window: raw_agent.history_window.unwrap_or(DEFAULT_HISTORY_WINDOW),
            max_rounds: raw_agent.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            max_conversations: raw_agent
                .max_conversations
                .unwrap_or(DEFAULT_MAX_CONVERSATIONS),
            skills_dir: raw_agent
                .skills_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SKILLS_DIR)),
            system_prompt: raw_agent
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        AppConfig {
            port: self.port.unwrap_or(DEFAULT_PORT),
            provider,
            bridge,
            agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pincer.toml");
        fs::write(&path, "").expect("write empty config");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
        assert_eq!(config.provider.key_env, "ANTHROPIC_API_KEY");
        assert!(config.bridge.is_none());
        assert_eq!(config.agent.history_window, DEFAULT_HISTORY_WINDOW);
        assert_eq!(config.agent.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(config.agent.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn reads_provider_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pincer.toml");
        fs::write(
            &path,
            r#"
port = 8099

[provider]
kind = "openai"
model = "gpt-4o"
key_env = "MY_KEY"
"#,
        )
        .expect("write config");

        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.port, 8099);
        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.key_env, "MY_KEY");
        assert_eq!(
            config.provider.endpoint,
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn reads_bridge_section_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pincer.toml");
        fs::write(
            &path,
            r#"
[bridge]
command = "node"
args = ["dist/index.js"]

[bridge.env]
SIMULATION_MODE = "1"
"#,
        )
        .expect("write config");

        let config = AppConfig::load(Some(&path)).expect("load");
        let bridge = config.bridge.expect("bridge configured");
        assert_eq!(bridge.command, "node");
        assert_eq!(bridge.args, vec!["dist/index.js"]);
        assert_eq!(bridge.env.get("SIMULATION_MODE").map(String::as_str), Some("1"));
        assert_eq!(bridge.prefix, DEFAULT_BRIDGE_PREFIX);
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pincer.toml");
        fs::write(&path, "port = \"not a number").expect("write config");

        let error = AppConfig::load(Some(&path)).expect_err("parse fails");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }
}
