//! JSON-RPC over a child process's stdio.
//!
//! Line-delimited JSON in both directions. A reader task owns stdout and
//! routes responses through the pending map, so concurrent requests can share
//! one process. stderr is drained into debug logs; the tail is kept so a
//! failed handshake can quote it.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use super::pending::PendingRequests;
use super::{encode_line, next_request_id};
use crate::config::BackendConfig;
use crate::errors::GatewayError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful exit after stdin is closed, before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How much trailing stderr to keep for error messages.
const STDERR_TAIL_BYTES: usize = 2000;

type SharedStdin = Arc<tokio::sync::Mutex<Option<ChildStdin>>>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// A spawned backend process.
pub struct StdioTransport {
    server_name: String,
    writer: SharedStdin,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: Arc<PendingRequests>,
    stderr_tail: Arc<Mutex<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdio.
    pub async fn connect(config: &BackendConfig) -> Result<Self, GatewayError> {
        let name = config.name.as_str();
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| GatewayError::config(format!("backend '{name}': command is required")))?;

        let mut cmd = Command::new(command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::connection(name, format!("failed to spawn '{command}': {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::connection(name, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::connection(name, "failed to capture stdout"))?;
        let stderr = child.stderr.take();

        tracing::info!(server = name, command, pid = child.id(), "spawned backend process");

        let writer: SharedStdin = Arc::new(tokio::sync::Mutex::new(Some(stdin)));
        let pending = PendingRequests::new(name);
        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let mut tasks = Vec::with_capacity(2);

        // Reader: stdout -> pending map, answering server requests inline.
        {
            let pending = Arc::clone(&pending);
            let writer = Arc::clone(&writer);
            let server = name.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if let Some(reply) = pending.handle_frame(&line) {
                                if let Err(e) = write_line(&server, &writer, &reply).await {
                                    tracing::warn!(server = %server, error = %e, "failed to answer server request");
                                }
                            }
                        }
                        Ok(None) => {
                            pending.fail_all("server stdout closed (process may have exited)");
                            break;
                        }
                        Err(e) => {
                            pending.fail_all(&format!("failed to read from stdout: {e}"));
                            break;
                        }
                    }
                }
            }));
        }

        if let Some(stderr) = stderr {
            let tail = Arc::clone(&stderr_tail);
            let server = name.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, stderr = %line, "backend stderr");
                    let mut buf = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    buf.push_str(&line);
                    buf.push('\n');
                    trim_front(&mut buf, STDERR_TAIL_BYTES);
                }
            }));
        }

        Ok(Self {
            server_name: name.to_string(),
            writer,
            child: tokio::sync::Mutex::new(Some(child)),
            pending,
            stderr_tail,
            tasks: Mutex::new(tasks),
        })
    }

    /// Send a JSON-RPC request and wait for the matching response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let id = next_request_id();
        let slot = self.pending.register(id)?;
        let req = JsonRpcRequest::new(id, method, params);
        write_line(&self.server_name, &self.writer, &req).await?;
        slot.wait().await
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        let notification = JsonRpcNotification::new(method, params);
        write_line(&self.server_name, &self.writer, &notification).await
    }

    /// Close stdin, wait for the process to exit, and kill it if it does not
    /// exit in time.
    pub async fn disconnect(&self) {
        // Dropping stdin signals EOF; well-behaved servers exit on it.
        self.writer.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server_name, %status, "backend process exited");
                }
                _ => {
                    tracing::warn!(
                        server = %self.server_name,
                        "backend did not exit within {}s, killing",
                        SHUTDOWN_TIMEOUT.as_secs()
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server = %self.server_name, error = %e, "failed to kill backend process");
                    }
                }
            }
        }

        self.pending.fail_all("transport disconnected");
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    /// The last few KB the process wrote to stderr.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn write_line<T: serde::Serialize>(
    server: &str,
    writer: &SharedStdin,
    message: &T,
) -> Result<(), GatewayError> {
    let line = encode_line(server, message)?;
    let mut guard = writer.lock().await;
    let stdin = guard
        .as_mut()
        .ok_or_else(|| GatewayError::connection(server, "transport is closed"))?;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| GatewayError::connection(server, format!("failed to write to stdin: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| GatewayError::connection(server, format!("failed to flush stdin: {e}")))
}

/// Drop leading bytes so `buf` is at most `max` bytes, cutting on a char
/// boundary.
fn trim_front(buf: &mut String, max: usize) {
    if buf.len() <= max {
        return;
    }
    let mut cut = buf.len() - max;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
