use crate::application::registry::{HandlerError, ToolHandler};
use crate::domain::types::ToolResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

const SKILL_SEPARATOR: &str = "\n\n---\n\n";
const MAX_IMPORT_BYTES: usize = 150 * 1024;
const IMPORT_TIMEOUT: Duration = Duration::from_secs(15);

/// Markdown prompt modules stored as `.md` files in one directory.
/// Their concatenation extends the base system prompt.
#[derive(Clone)]
pub struct SkillLibrary {
    dir: PathBuf,
}

impl SkillLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn skill_files(&self) -> Vec<PathBuf> {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return Vec::new();
        };
        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
        files.sort();
        files
    }

    /// Concatenated content of every skill file, in filename order. A
    /// missing or empty directory yields an empty string.
    pub async fn render(&self) -> String {
        let mut parts = Vec::new();
        for path in self.skill_files().await {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                parts.push(content);
            }
        }
        parts.join(SKILL_SEPARATOR)
    }

    pub async fn count(&self) -> usize {
        self.skill_files().await.len()
    }

    async fn write_skill(&self, filename: &str, content: &str) -> Result<PathBuf, String> {
        let base = validate_skill_name(filename)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| err.to_string())?;
        let path = self.dir.join(base);
        tokio::fs::write(&path, content)
            .await
            .map_err(|err| err.to_string())?;
        Ok(path)
    }
}

/// Filenames must be bare `.md` basenames so a skill cannot escape the
/// library directory.
fn validate_skill_name(filename: &str) -> Result<&str, String> {
    let base = Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if base != filename || !base.ends_with(".md") || base == ".md" {
        return Err("filename must be a .md basename (e.g. my-skill.md)".to_string());
    }
    Ok(base)
}

/// The live system prompt: base instructions plus whatever the skill
/// library currently holds. Reloads apply to subsequent turns only.
pub struct SystemPrompt {
    base: String,
    library: SkillLibrary,
    rendered: RwLock<String>,
}

impl SystemPrompt {
    /// Starts with the bare base prompt; call `reload` to fold skills in.
    pub fn new(base: impl Into<String>, library: SkillLibrary) -> Self {
        let base = base.into();
        Self {
            rendered: RwLock::new(base.clone()),
            base,
            library,
        }
    }

    pub fn current(&self) -> String {
        self.rendered
            .read()
            .map(|rendered| rendered.clone())
            .unwrap_or_else(|_| self.base.clone())
    }

    /// Re-read the skill directory and swap the rendered prompt.
    /// Returns the number of skill files found.
    pub async fn reload(&self) -> usize {
        let skills = self.library.render().await;
        let next = if skills.is_empty() {
            self.base.clone()
        } else {
            format!("{}\n\n{}", self.base, skills)
        };
        // Write lock is taken after the directory scan so it is never held
        // across an await point.
        if let Ok(mut rendered) = self.rendered.write() {
            *rendered = next;
        }
        self.library.count().await
    }

    pub fn library(&self) -> &SkillLibrary {
        &self.library
    }
}

pub struct AddSkillTool {
    pub library: SkillLibrary,
}

#[derive(Debug, Deserialize)]
struct AddSkillParams {
    filename: String,
    content: String,
}

#[async_trait]
impl ToolHandler for AddSkillTool {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
        let params: AddSkillParams = serde_json::from_value(params)
            .map_err(|err| format!("invalid add_skill parameters: {err}"))?;
        match self.library.write_skill(&params.filename, &params.content).await {
            Ok(path) => {
                info!(filename = params.filename.as_str(), "Skill written");
                let mut payload = JsonMap::new();
                payload.insert("filename".to_string(), json!(params.filename));
                payload.insert("path".to_string(), json!(path.display().to_string()));
                payload.insert(
                    "message".to_string(),
                    json!("Skill saved; call reload_skills to apply it."),
                );
                Ok(ToolResult::success(payload))
            }
            Err(message) => Ok(ToolResult::failure(message)),
        }
    }
}

pub struct AddSkillFromUrlTool {
    pub library: SkillLibrary,
    pub http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AddSkillFromUrlParams {
    url: String,
    #[serde(default)]
    filename: Option<String>,
}

#[async_trait]
impl ToolHandler for AddSkillFromUrlTool {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
        let params: AddSkillFromUrlParams = serde_json::from_value(params)
            .map_err(|err| format!("invalid add_skill_from_url parameters: {err}"))?;

        let response = match self
            .http
            .get(&params.url)
            .timeout(IMPORT_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Ok(ToolResult::failure(format!("fetch failed: {err}"))),
        };
        if !response.status().is_success() {
            return Ok(ToolResult::failure(format!("HTTP {}", response.status())));
        }
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return Ok(ToolResult::failure(format!("fetch failed: {err}"))),
        };
        if text.len() > MAX_IMPORT_BYTES {
            return Ok(ToolResult::failure("content too large (max 150KB)"));
        }

        let filename = match params.filename {
            Some(name) => name,
            None => filename_from_url(&params.url),
        };
        let filename = if filename.ends_with(".md") {
            filename
        } else {
            format!("{filename}.md")
        };

        match self.library.write_skill(&filename, &text).await {
            Ok(_) => {
                info!(url = params.url.as_str(), filename = filename.as_str(), "Skill imported");
                let mut payload = JsonMap::new();
                payload.insert("filename".to_string(), json!(filename));
                payload.insert("from".to_string(), json!(params.url));
                Ok(ToolResult::success(payload))
            }
            Err(message) => Ok(ToolResult::failure(message)),
        }
    }
}

fn filename_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("imported.md")
        .to_string()
}

pub struct ListSkillsTool {
    pub library: SkillLibrary,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListSkillsParams {
    #[serde(default)]
    include_content: bool,
    #[serde(default)]
    preview_lines: usize,
}

#[async_trait]
impl ToolHandler for ListSkillsTool {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
        let params: ListSkillsParams = serde_json::from_value(params).unwrap_or_default();

        let mut skills = Vec::new();
        for path in self.library.skill_files().await {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            let size = tokio::fs::metadata(&path).await.map(|meta| meta.len()).ok();
            let mut entry = JsonMap::new();
            entry.insert("filename".to_string(), json!(filename));
            entry.insert("size".to_string(), json!(size));
            if params.include_content {
                let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                entry.insert("content".to_string(), json!(content));
            } else if params.preview_lines > 0 {
                let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                let preview: Vec<&str> = content.lines().take(params.preview_lines).collect();
                entry.insert("preview".to_string(), json!(preview.join("\n")));
            }
            skills.push(Value::Object(entry));
        }

        let mut payload = JsonMap::new();
        payload.insert("count".to_string(), json!(skills.len()));
        payload.insert("skills".to_string(), Value::Array(skills));
        Ok(ToolResult::success(payload))
    }
}

pub struct ReloadSkillsTool {
    pub prompt: Arc<SystemPrompt>,
}

#[async_trait]
impl ToolHandler for ReloadSkillsTool {
    async fn call(&self, _params: Value) -> Result<ToolResult, HandlerError> {
        let count = self.prompt.reload().await;
        info!(count, "Skills reloaded");
        let mut payload = JsonMap::new();
        payload.insert("skillCount".to_string(), json!(count));
        payload.insert(
            "message".to_string(),
            json!("Skills reloaded; next messages use the updated prompt."),
        );
        Ok(ToolResult::success(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn library(dir: &tempfile::TempDir) -> SkillLibrary {
        SkillLibrary::new(dir.path())
    }

    #[tokio::test]
    async fn render_concatenates_sorted_skills() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.md"), "second").expect("write");
        std::fs::write(dir.path().join("a.md"), "first").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let rendered = library(&dir).render().await;
        assert_eq!(rendered, "first\n\n---\n\nsecond");
    }

    #[tokio::test]
    async fn missing_directory_renders_empty() {
        let dir = tempdir().expect("tempdir");
        let lib = SkillLibrary::new(dir.path().join("absent"));
        assert_eq!(lib.render().await, "");
        assert_eq!(lib.count().await, 0);
    }

    #[tokio::test]
    async fn system_prompt_reload_extends_base() {
        let dir = tempdir().expect("tempdir");
        let prompt = SystemPrompt::new("base instructions", library(&dir));
        assert_eq!(prompt.current(), "base instructions");

        std::fs::write(dir.path().join("trade.md"), "trading notes").expect("write");
        assert_eq!(prompt.reload().await, 1);
        assert_eq!(prompt.current(), "base instructions\n\ntrading notes");
    }

    #[test]
    fn skill_names_must_be_md_basenames() {
        assert!(validate_skill_name("notes.md").is_ok());
        assert!(validate_skill_name("../escape.md").is_err());
        assert!(validate_skill_name("dir/notes.md").is_err());
        assert!(validate_skill_name("notes.txt").is_err());
        assert!(validate_skill_name(".md").is_err());
    }

    #[tokio::test]
    async fn add_skill_writes_file() {
        let dir = tempdir().expect("tempdir");
        let tool = AddSkillTool {
            library: library(&dir),
        };
        let result = tool
            .call(json!({"filename": "new.md", "content": "body"}))
            .await
            .expect("handler ok");
        assert!(result.success);
        let written = std::fs::read_to_string(dir.path().join("new.md")).expect("read");
        assert_eq!(written, "body");
    }

    #[tokio::test]
    async fn add_skill_rejects_traversal() {
        let dir = tempdir().expect("tempdir");
        let tool = AddSkillTool {
            library: library(&dir),
        };
        let result = tool
            .call(json!({"filename": "../evil.md", "content": "body"}))
            .await
            .expect("handler ok");
        assert!(!result.success);
    }

    #[tokio::test]
    async fn list_skills_supports_previews() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.md"), "line1\nline2\nline3").expect("write");
        let tool = ListSkillsTool {
            library: library(&dir),
        };
        let result = tool
            .call(json!({"previewLines": 2}))
            .await
            .expect("handler ok");
        assert!(result.success);
        assert_eq!(result.payload["count"], json!(1));
        assert_eq!(result.payload["skills"][0]["preview"], json!("line1\nline2"));
    }

    #[test]
    fn url_filenames_fall_back_to_default() {
        assert_eq!(filename_from_url("https://example.com/guide.md"), "guide.md");
        assert_eq!(filename_from_url("https://example.com/"), "imported.md");
        assert_eq!(
            filename_from_url("https://example.com/skill.md?raw=1"),
            "skill.md"
        );
    }
}
