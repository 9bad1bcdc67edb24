//! Stdio transport implementation (subprocess)

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, trace, warn};

use super::Transport;
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId,
};
use crate::{Error, Result};

/// Timeouts applied by a [`StdioTransport`]
#[derive(Debug, Clone, Copy)]
pub struct TransportTimeouts {
    /// Bound on spawn plus `initialize` handshake
    pub connect: Duration,
    /// Bound on every later request
    pub request: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(60),
            request: Duration::from_secs(60),
        }
    }
}

/// Stdio transport for subprocess MCP servers.
///
/// One JSON document per line in each direction. Responses are correlated to
/// requests by id; when stdout closes every pending request fails at once.
pub struct StdioTransport {
    /// Owning sub-server, for logs and errors
    server_id: String,
    /// Program followed by its arguments
    argv: Vec<String>,
    timeouts: TransportTimeouts,
    /// Child process
    child: Mutex<Option<Child>>,
    /// Pending requests waiting for response
    pending: dashmap::DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Process running and stdout open
    alive: AtomicBool,
    /// Handshake completed
    connected: AtomicBool,
    /// Writer handle
    writer: Mutex<Option<ChildStdin>>,
}

impl StdioTransport {
    /// Create a new stdio transport; nothing is spawned until [`start`](Self::start)
    #[must_use]
    pub fn new(server_id: &str, argv: Vec<String>, timeouts: TransportTimeouts) -> Arc<Self> {
        Arc::new(Self {
            server_id: server_id.to_string(),
            argv,
            timeouts,
            child: Mutex::new(None),
            pending: dashmap::DashMap::new(),
            request_id: AtomicU64::new(1),
            alive: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            writer: Mutex::new(None),
        })
    }

    /// Spawn the subprocess and perform the MCP handshake.
    ///
    /// Spawn failures, an immediate exit, and handshake errors or timeouts all
    /// surface as [`Error::Connection`].
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(Error::Config("Empty command".to_string()));
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.connection_error(format!("Failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.connection_error("Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.connection_error("Failed to get stdout"))?;
        let stderr = child.stderr.take();

        *self.writer.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.alive.store(true, Ordering::Release);

        // Reader task
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                transport.handle_line(&line).await;
            }
            transport.alive.store(false, Ordering::Release);
            transport.connected.store(false, Ordering::Release);
            // Dropping the senders wakes every waiter with a closed channel.
            transport.pending.clear();
            debug!(server = %transport.server_id, "Stdio reader task ended");
        });

        if let Some(stderr) = stderr {
            let server_id = self.server_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server_id, "stderr: {line}");
                }
            });
        }

        match tokio::time::timeout(self.timeouts.connect, self.initialize()).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.close().await;
                Err(self.connection_error(format!(
                    "Handshake timed out after {}s",
                    self.timeouts.connect.as_secs()
                )))
            }
        }
    }

    /// Initialize the MCP connection
    async fn initialize(&self) -> Result<()> {
        let response = self
            .send_request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
                self.timeouts.connect,
            )
            .await?;

        if let Some(error) = response.error {
            return Err(self.connection_error(format!("Initialize rejected: {}", error.message)));
        }

        self.notify("notifications/initialized", None).await?;

        self.connected.store(true, Ordering::Release);
        debug!(server = %self.server_id, "Stdio transport initialized");

        Ok(())
    }

    /// Dispatch one stdout line
    async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            // Some servers print banners to stdout
            debug!(server = %self.server_id, "Ignoring non-JSON stdout line: {line}");
            return;
        };

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            self.handle_server_message(method, &value).await;
            return;
        }

        match serde_json::from_value::<JsonRpcResponse>(value) {
            Ok(response) => {
                if let Some(ref id) = response.id {
                    if let Some((_, sender)) = self.pending.remove(&id.to_string()) {
                        let _ = sender.send(response);
                    } else {
                        trace!(server = %self.server_id, id = %id, "Response for unknown request");
                    }
                }
            }
            Err(e) => {
                warn!(server = %self.server_id, error = %e, "Malformed response");
            }
        }
    }

    /// Requests and notifications initiated by the sub-server
    async fn handle_server_message(&self, method: &str, value: &Value) {
        let Some(id) = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
        else {
            trace!(server = %self.server_id, method, "Sub-server notification");
            return;
        };

        let response = if method == "ping" {
            JsonRpcResponse::success(id, serde_json::json!({}))
        } else {
            JsonRpcResponse::error(
                Some(id),
                crate::error::rpc_codes::METHOD_NOT_FOUND,
                format!("Method not supported by gateway: {method}"),
            )
        };
        match serde_json::to_string(&response) {
            Ok(message) => {
                if let Err(e) = self.write_message(&message).await {
                    debug!(server = %self.server_id, error = %e, "Failed to answer sub-server request");
                }
            }
            Err(e) => warn!(server = %self.server_id, error = %e, "Failed to encode reply"),
        }
    }

    /// Write a message to stdin
    async fn write_message(&self, message: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(ref mut stdin) = *writer else {
            return Err(self.connection_error("Not connected"));
        };
        let write = async {
            stdin.write_all(message.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write
            .await
            .map_err(|e| self.connection_error(format!("Write failed: {e}")))
    }

    /// Send a request and wait up to `timeout` for its response
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id();
        let key = id.to_string();
        let request = JsonRpcRequest::new(id, method, params);

        // Register before checking liveness: the reader marks the process dead
        // and then clears `pending`, so a request is either cleared or refused.
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);
        if !self.alive.load(Ordering::Acquire) {
            self.pending.remove(&key);
            return Err(self.connection_error("Sub-server process is not running"));
        }

        let message = serde_json::to_string(&request)?;
        if let Err(e) = self.write_message(&message).await {
            self.pending.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.connection_error(format!(
                "Sub-server exited before answering {method}"
            ))),
            Err(_) => {
                self.pending.remove(&key);
                Err(Error::BackendTimeout(format!(
                    "{}: {method} timed out after {}s",
                    self.server_id,
                    timeout.as_secs()
                )))
            }
        }
    }

    fn connection_error(&self, message: impl Into<String>) -> Error {
        Error::connection(&self.server_id, message)
    }

    /// Get next request ID
    fn next_id(&self) -> RequestId {
        #[allow(clippy::cast_possible_wrap)]
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        self.send_request(method, params, self.timeouts.request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let message = serde_json::to_string(&notification)?;
        self.write_message(&message).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.alive.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);

        // Closing stdin lets a well-behaved server exit on its own
        *self.writer.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.kill().await;
                }
            }
        }
        self.alive.store(false, Ordering::Release);
        self.pending.clear();

        Ok(())
    }
}
