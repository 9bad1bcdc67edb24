//! `ProxyClient`: the gateway side of one sub-server container.
//!
//! Construction spawns nothing. The first operation spawns the launch argv
//! and performs the MCP handshake; concurrent first calls wait on the same
//! handshake. If the container later exits, the next operation starts a
//! fresh one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Provider;
use crate::container::{LaunchSpec, remove_container};
use crate::error::rpc_codes;
use crate::protocol::{Prompt, PromptsListResult, Resource, ResourcesListResult};
use crate::transport::{StdioTransport, Transport, TransportTimeouts};
use crate::{Error, Result};

/// Upper bound on followed `nextCursor` pages per listing
const MAX_PAGES: usize = 64;

/// Container that must be force-removed after its transport closes
#[derive(Debug, Clone)]
struct ContainerRef {
    runtime: String,
    name: String,
}

/// Protocol client owning one sub-server process
pub struct ProxyClient {
    server_id: String,
    argv: Vec<String>,
    /// Loggable form of `argv`
    command_line: String,
    container: Option<ContainerRef>,
    timeouts: TransportTimeouts,
    transport: Mutex<Option<Arc<StdioTransport>>>,
}

impl ProxyClient {
    /// Client for a container launch spec
    #[must_use]
    pub fn new(spec: LaunchSpec, timeouts: TransportTimeouts) -> Self {
        Self {
            server_id: spec.server_id.clone(),
            argv: spec.argv(),
            command_line: spec.to_command_line(),
            container: Some(ContainerRef {
                runtime: spec.runtime,
                name: spec.container_name,
            }),
            timeouts,
            transport: Mutex::new(None),
        }
    }

    /// Client for a plain local process (no container cleanup)
    #[must_use]
    pub fn from_command(server_id: &str, argv: Vec<String>, timeouts: TransportTimeouts) -> Self {
        Self {
            server_id: server_id.to_string(),
            command_line: argv.join(" "),
            argv,
            container: None,
            timeouts,
            transport: Mutex::new(None),
        }
    }

    /// Whether a handshaken process is currently attached
    pub async fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| t.is_connected())
    }

    /// Return the live transport, spawning and handshaking if needed
    async fn connected(&self) -> Result<Arc<StdioTransport>> {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.as_ref() {
            if transport.is_connected() {
                return Ok(Arc::clone(transport));
            }
        }

        if let Some(stale) = slot.take() {
            debug!(server = %self.server_id, "Previous sub-server process is gone, restarting");
            let _ = stale.close().await;
            self.cleanup_container().await;
        }

        info!(server = %self.server_id, command = %self.command_line, "Starting sub-server");
        let transport = StdioTransport::new(&self.server_id, self.argv.clone(), self.timeouts);
        if let Err(e) = transport.start().await {
            warn!(server = %self.server_id, error = %e, "Sub-server failed to start");
            let _ = transport.close().await;
            self.cleanup_container().await;
            return Err(e);
        }

        *slot = Some(Arc::clone(&transport));
        Ok(transport)
    }

    async fn cleanup_container(&self) {
        if let Some(ref container) = self.container {
            remove_container(&container.runtime, &container.name).await;
        }
    }

    /// Send one request; JSON-RPC errors from the sub-server become [`Error::JsonRpc`]
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let transport = self.connected().await?;
        let response = transport.request(method, params).await?;
        if let Some(error) = response.error {
            return Err(Error::JsonRpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Follow `nextCursor` and collect every page's `field` array
    async fn list_all(&self, method: &str, field: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut result = self.request(method, params).await?;

            match result.get_mut(field).map(Value::take) {
                Some(Value::Array(page)) => items.extend(page),
                _ => {
                    return Err(Error::Protocol(format!(
                        "{}: {method} result has no {field} array",
                        self.server_id
                    )));
                }
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        warn!(server = %self.server_id, method, "Stopped following pagination");
        Ok(items)
    }

    /// Optional listings: a sub-server without the capability lists nothing
    async fn list_optional(&self, method: &str, field: &str) -> Result<Vec<Value>> {
        match self.list_all(method, field).await {
            Err(Error::JsonRpc { code, .. }) if code == rpc_codes::METHOD_NOT_FOUND => {
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Provider for ProxyClient {
    fn name(&self) -> &str {
        &self.server_id
    }

    async fn list_tools(&self) -> Result<Vec<Value>> {
        self.list_all("tools/list", "tools").await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let resources = self.list_optional("resources/list", "resources").await?;
        let result: ResourcesListResult =
            serde_json::from_value(json!({ "resources": resources }))?;
        Ok(result.resources)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let prompts = self.list_optional("prompts/list", "prompts").await?;
        let result: PromptsListResult = serde_json::from_value(json!({ "prompts": prompts }))?;
        Ok(result.prompts)
    }

    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request("prompts/get", Some(params)).await
    }

    async fn shutdown(&self) -> Result<()> {
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            info!(server = %self.server_id, "Stopping sub-server");
            transport.close().await?;
            self.cleanup_container().await;
        }
        Ok(())
    }
}
