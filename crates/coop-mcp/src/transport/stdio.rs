//! Subprocess binding: newline-delimited JSON-RPC over the child's stdin/stdout.

use super::{StdioConfig, Transport, TransportKind};
use crate::jsonrpc::{
    Incoming, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    METHOD_NOT_FOUND,
};
use crate::protocol::methods;
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

type Reply = CoopResult<JsonRpcResponse>;
type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>>;
type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// How long a child may take to exit on its own after stdin is closed.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// A tool server running as a child process.
///
/// The child is spawned with kill-on-drop, so it never outlives this value.
/// `close()` and every timeout kill and reap it explicitly.
pub struct StdioTransport {
    label: String,
    stdin: SharedStdin,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    pid: Option<u32>,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn the child and start the stdout reader and stderr forwarder.
    pub fn spawn(config: &StdioConfig) -> CoopResult<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !config.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&config.env);
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CoopError::TransportUnavailable(format!(
                "Failed to spawn tool server '{}': {e}",
                config.command
            ))
        })?;

        let label = std::iter::once(config.command.as_str())
            .chain(config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let pid = child.id();

        let stdin = child.stdin.take().ok_or_else(|| {
            CoopError::TransportUnavailable("tool server stdin not available".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CoopError::TransportUnavailable("tool server stdout not available".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            CoopError::TransportUnavailable("tool server stderr not available".into())
        })?;

        let pending: PendingMap = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let stdin: SharedStdin = Arc::new(Mutex::new(Some(stdin)));

        tokio::spawn(forward_stderr(label.clone(), stderr));
        tokio::spawn(read_frames(
            label.clone(),
            stdout,
            pending.clone(),
            stdin.clone(),
            closed.clone(),
        ));

        info!(server = %label, pid = ?pid, "Tool server spawned");

        Ok(Self {
            label,
            stdin,
            child: Mutex::new(Some(child)),
            pending,
            closed,
            pid,
            timeout: config.timeout,
        })
    }

    /// OS process id of the child, while it was spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stop the child. With `graceful`, closing stdin gets a short grace
    /// period before the kill.
    async fn shutdown(&self, graceful: bool) {
        self.closed.store(true, Ordering::SeqCst);
        drop(self.stdin.lock().await.take());

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            let exited = graceful
                && matches!(
                    tokio::time::timeout(CLOSE_GRACE, child.wait()).await,
                    Ok(Ok(_))
                );
            if !exited {
                // kill() also waits, so the child is reaped here.
                if let Err(e) = child.kill().await {
                    debug!(server = %self.label, error = %e, "Tool server already gone");
                }
            }
            debug!(server = %self.label, "Tool server stopped");
        }

        self.pending.lock().await.clear();
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }

    async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> CoopResult<JsonRpcResponse> {
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            // The reader flags `closed` before clearing the map, so checking
            // under the lock means no sender is stranded.
            if self.is_closed() {
                return Err(CoopError::TransportUnavailable(format!(
                    "tool server '{}' is not running",
                    self.label
                )));
            }
            map.insert(id.clone(), tx);
        }

        if let Err(e) = write_line(&self.stdin, &request, &self.label).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(CoopError::TransportUnavailable(format!(
                "tool server '{}' exited before answering '{}'",
                self.label, request.method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(
                    server = %self.label,
                    method = %request.method,
                    timeout_secs = timeout.as_secs_f64(),
                    "Tool server timed out, killing it"
                );
                self.shutdown(false).await;
                Err(CoopError::timeout(
                    format!("{} on '{}'", request.method, self.label),
                    timeout,
                ))
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> CoopResult<()> {
        if self.is_closed() {
            return Err(CoopError::TransportUnavailable(format!(
                "tool server '{}' is not running",
                self.label
            )));
        }
        write_line(&self.stdin, &notification, &self.label).await
    }

    async fn close(&self) -> CoopResult<()> {
        self.shutdown(true).await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn write_line<T: Serialize>(stdin: &SharedStdin, frame: &T, label: &str) -> CoopResult<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');

    let mut guard = stdin.lock().await;
    let pipe = guard.as_mut().ok_or_else(|| {
        CoopError::TransportUnavailable(format!("tool server '{label}' stdin is closed"))
    })?;
    let written = async {
        pipe.write_all(line.as_bytes()).await?;
        pipe.flush().await
    }
    .await;
    written.map_err(|e| {
        CoopError::TransportUnavailable(format!("Failed to write to tool server '{label}': {e}"))
    })
}

async fn read_frames(
    label: String,
    stdout: ChildStdout,
    pending: PendingMap,
    stdin: SharedStdin,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(server = %label, "Tool server stdout closed");
                break;
            }
            Err(e) => {
                warn!(server = %label, error = %e, "Error reading tool server stdout");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match Incoming::parse(trimmed) {
            Ok(Incoming::Response(resp)) => match resp.id.clone() {
                Some(id) => deliver(&pending, &id, Ok(resp)).await,
                None => warn!(server = %label, error = ?resp.error, "Unattributed error from tool server"),
            },
            Ok(Incoming::Request(req)) => {
                let reply = if req.method == methods::PING {
                    JsonRpcResponse::success(req.id, serde_json::json!({}))
                } else {
                    JsonRpcResponse::failure(
                        Some(req.id),
                        JsonRpcError::new(
                            METHOD_NOT_FOUND,
                            format!("Method not supported by client: {}", req.method),
                        ),
                    )
                };
                if let Err(e) = write_line(&stdin, &reply, &label).await {
                    debug!(server = %label, error = %e, "Could not answer server request");
                }
            }
            Ok(Incoming::Notification(n)) => {
                debug!(server = %label, method = %n.method, "Notification from tool server");
            }
            Err(e) => {
                // A broken frame that still names one of our ids fails that call.
                let id = serde_json::from_str::<serde_json::Value>(trimmed)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .and_then(|v| serde_json::from_value::<RequestId>(v).ok());
                match id {
                    Some(id) => deliver(&pending, &id, Err(e)).await,
                    None => {
                        warn!(server = %label, line = %trimmed, "Ignoring non-JSON-RPC line on stdout");
                    }
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiting caller.
    pending.lock().await.clear();
}

async fn deliver(pending: &PendingMap, id: &RequestId, reply: Reply) {
    let sender = pending.lock().await.remove(id);
    match sender {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => debug!(id = %id, "Reply for an unknown or abandoned request"),
    }
}

async fn forward_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %label, line = %line, "tool server stderr");
    }
}
