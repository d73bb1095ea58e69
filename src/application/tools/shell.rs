use crate::application::registry::{HandlerError, ToolHandler};
use crate::domain::types::ToolResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 60_000;
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Runs a command line through `sh -c` with a bounded timeout and
/// bounded output capture.
pub struct ShellTool;

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl ToolHandler for ShellTool {
    async fn call(&self, params: Value) -> Result<ToolResult, HandlerError> {
        let params: ShellParams = serde_json::from_value(params)
            .map_err(|err| format!("invalid shell parameters: {err}"))?;
        let command = params.command.trim();
        if command.is_empty() {
            return Ok(ToolResult::failure("command must not be empty"));
        }

        let timeout_ms = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);

        info!(command, timeout_ms, "Running shell command");
        let child = Command::new("sh").arg("-c").arg(command).output();
        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), child).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(ToolResult::failure(format!(
                    "command timed out after {timeout_ms}ms"
                )));
            }
        };

        let stdout = capture(&output.stdout);
        let stderr = capture(&output.stderr);
        let code = output.status.code();
        let signal = exit_signal(&output.status);

        let mut payload = serde_json::Map::new();
        payload.insert("stdout".to_string(), json!(stdout));
        payload.insert("stderr".to_string(), json!(stderr));
        payload.insert("code".to_string(), json!(code));
        payload.insert("signal".to_string(), json!(signal));

        if output.status.success() {
            Ok(ToolResult::success(payload))
        } else {
            let mut result = ToolResult::failure(format!(
                "command exited with status {}",
                code.map_or_else(|| "signal".to_string(), |code| code.to_string())
            ));
            result.payload = payload;
            Ok(result)
        }
    }
}

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[output truncated]", &text[..cut])
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
