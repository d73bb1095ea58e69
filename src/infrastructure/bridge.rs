use crate::config::BridgeSettings;
use serde_json::{Map as JsonMap, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const RESPAWN_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn bridge process: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
    #[error("bridge process is not running")]
    NotRunning,
    #[error("bridge not connected")]
    NotConnected,
    #[error("bridge transport failure: {message}")]
    Transport { message: String },
    #[error("failed to encode bridge message")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("bridge returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("bridge process terminated")]
    Terminated,
    #[error("bridge request was cancelled")]
    Cancelled,
}

/// Persistent JSON-RPC child process speaking newline-delimited messages
/// over stdio. One instance outlives any number of child restarts.
#[derive(Clone)]
pub struct ProcessBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    settings: BridgeSettings,
    state: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<Result<Value, BridgeError>>>>,
    id_counter: AtomicU64,
    ready: AtomicBool,
}

impl ProcessBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                settings,
                state: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                pending: AsyncMutex::new(HashMap::new()),
                id_counter: AtomicU64::new(1),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the child and run the handshake. Returns whether the bridge
    /// came up; failures are logged, never propagated, so a missing
    /// backend cannot take the host down with it.
    pub async fn start(&self) -> bool {
        self.inner.start().await
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Invoke a named tool on the child and decode its content blocks.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, BridgeError> {
        if !self.is_ready() {
            return Err(BridgeError::NotConnected);
        }
        let result = self.inner.call_tool(tool, arguments).await?;
        Ok(decode_tool_content(result))
    }

    /// Ask the child for its tool catalogue. An unready bridge yields an
    /// empty list rather than an error.
    pub async fn list_tools(&self) -> Vec<BridgeToolInfo> {
        if !self.is_ready() {
            return Vec::new();
        }
        match self.inner.send_request("tools/list", json!({})).await {
            Ok(result) => parse_tool_list(result),
            Err(err) => {
                warn!(%err, "Failed to list bridge tools");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct BridgeToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BridgeInner {
    // Boxed so the respawn task can await start() without tying the compiler
    // into the start -> reader_loop -> on_exit -> start opaque-future cycle.
    fn start(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.start_inner())
    }

    async fn start_inner(self: &Arc<Self>) -> bool {
        {
            let state = self.state.lock().await;
            if state.is_some() {
                return self.ready.load(Ordering::SeqCst);
            }
        }

        let mut command = Command::new(&self.settings.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !self.settings.args.is_empty() {
            command.args(&self.settings.args);
        }
        for (key, value) in &self.settings.env {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!(
                    command = self.settings.command.as_str(),
                    %source,
                    "Failed to spawn bridge process"
                );
                return false;
            }
        };

        let Some(stdin) = child.stdin.take() else {
            warn!("Failed to capture bridge stdin");
            return false;
        };
        let Some(stdout) = child.stdout.take() else {
            warn!("Failed to capture bridge stdout");
            return false;
        };
        let stderr = child.stderr.take();

        {
            let mut writer = self.writer.lock().await;
            *writer = Some(BufWriter::new(stdin));
        }
        {
            let mut state = self.state.lock().await;
            *state = Some(child);
        }

        let reader_self = Arc::clone(self);
        tokio::spawn(async move {
            reader_self.reader_loop(stdout).await;
        });
        if let Some(stderr) = stderr {
            tokio::spawn(drain_stderr(stderr));
        }

        match self.handshake().await {
            Ok(()) => {
                self.ready.store(true, Ordering::SeqCst);
                info!(
                    command = self.settings.command.as_str(),
                    "Bridge process connected"
                );
                true
            }
            Err(err) => {
                warn!(%err, "Bridge handshake failed");
                self.shutdown_child().await;
                false
            }
        }
    }

    async fn handshake(self: &Arc<Self>) -> Result<(), BridgeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {}
        });
        self.send_request("initialize", params).await?;
        self.send_notification("notifications/initialized", json!({}))
            .await
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, BridgeError> {
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        self.send_request("tools/call", params).await
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(item) = lines.next_line().await {
            match item {
                Some(raw) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(value) => self.handle_message(value).await,
                        Err(_) => {
                            debug!(line = trimmed, "Discarding non-JSON line from bridge");
                        }
                    }
                }
                None => break,
            }
        }

        self.on_exit().await;
    }

    async fn handle_message(&self, value: Value) {
        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            if let Some(method) = value.get("method").and_then(Value::as_str) {
                debug!(method, "Received notification from bridge");
            }
            return;
        };

        let responder = {
            let mut pending = self.pending.lock().await;
            pending.remove(&id)
        };
        let Some(sender) = responder else {
            debug!(response_id = id, "Received response for unknown request");
            return;
        };

        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let _ = sender.send(Err(BridgeError::Rpc { code, message }));
        } else {
            let result = value.get("result").cloned().unwrap_or(Value::Null);
            let _ = sender.send(Ok(result));
        }
    }

    /// Child stdout closed: mark unready, reject every waiter, and arm a
    /// single delayed respawn.
    async fn on_exit(self: &Arc<Self>) {
        warn!("Bridge process exited");
        self.ready.store(false, Ordering::SeqCst);
        self.shutdown_child().await;
        self.fail_all_pending().await;

        let respawn_self = Arc::clone(self);
        tokio::spawn(async move {
            sleep(RESPAWN_DELAY).await;
            info!("Restarting bridge process");
            respawn_self.start().await;
        });
    }

    async fn shutdown_child(&self) {
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }
        let mut state = self.state.lock().await;
        if let Some(mut child) = state.take() {
            if let Err(err) = child.kill().await {
                debug!(%err, "Failed to kill bridge process (may have already exited)");
            }
            let _ = child.wait().await;
        }
    }

    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(BridgeError::Terminated));
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        if let Err(err) = self.write_message(&payload).await {
            let mut pending = self.pending.lock().await;
            pending.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Cancelled),
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), BridgeError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), BridgeError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| BridgeError::InvalidJson { source })?;

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(BridgeError::NotRunning)?;
        stream
            .write_all(encoded.as_bytes())
            .await
            .map_err(transport)?;
        stream.write_all(b"\n").await.map_err(transport)?;
        stream.flush().await.map_err(transport)?;
        Ok(())
    }
}

fn transport(source: std::io::Error) -> BridgeError {
    BridgeError::Transport {
        message: source.to_string(),
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            debug!(line = trimmed, "bridge stderr");
        }
    }
}

/// Tool responses carry an array of content blocks. Join the text blocks
/// and parse the result as JSON when it happens to be JSON, otherwise
/// wrap the plain text.
fn decode_tool_content(result: Value) -> Value {
    let Some(blocks) = result.get("content").and_then(Value::as_array) else {
        return result;
    };
    let text = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) => parsed,
        Err(_) => {
            let mut map = JsonMap::new();
            map.insert("result".to_string(), Value::String(text));
            Value::Object(map)
        }
    }
}

fn parse_tool_list(result: Value) -> Vec<BridgeToolInfo> {
    result
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name").and_then(Value::as_str)?;
                    Some(BridgeToolInfo {
                        name: name.to_string(),
                        description: tool
                            .get("description")
                            .and_then(Value::as_str)
                            .map(|text| text.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
