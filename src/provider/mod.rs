//! Provider abstraction: one mounted tool source per sub-server.
//!
//! The gateway router only ever talks to `Arc<dyn Provider>`. In production
//! that is a [`ProxyClient`] owning one container; tests substitute
//! in-process fakes through the [`Launcher`] seam.
//!
//! ```text
//! SubServerConfig ──▶ Launcher ──▶ Arc<dyn Provider> ──▶ MountRegistry
//!                     (DockerLauncher: translate + ProxyClient)
//! ```

mod launcher;
mod proxy_client;

pub use launcher::DockerLauncher;
pub use proxy_client::ProxyClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{Prompt, Resource};
use crate::store::SubServerConfig;
use crate::{Error, Result};

/// A source of MCP tools, resources and prompts.
///
/// Implementations must be `Send + Sync + 'static` so they can be stored in
/// `Arc<dyn Provider>` and shared across request tasks.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Stable name; the mount prefix for sub-servers.
    fn name(&self) -> &str;

    /// Raw tool descriptors as reported by the source.
    ///
    /// Descriptors are returned unvalidated; discovery decides which are
    /// usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached.
    async fn list_tools(&self) -> Result<Vec<Value>>;

    /// Invoke a tool by its unprefixed name; returns the raw call result.
    ///
    /// # Errors
    ///
    /// Returns the source's JSON-RPC error, or a connection error.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    /// List resources (default: none).
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }

    /// Read one resource; returns the raw read result.
    async fn read_resource(&self, uri: &str) -> Result<Value> {
        Err(Error::BackendNotFound(format!("{}: no resource {uri}", self.name())))
    }

    /// List prompts (default: none).
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(Vec::new())
    }

    /// Render one prompt by its unprefixed name; returns the raw result.
    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let _ = arguments;
        Err(Error::BackendNotFound(format!("{}: no prompt {name}", self.name())))
    }

    /// Release whatever the provider owns (container, pipes).
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Turns a stored configuration into a provider ready to mount.
///
/// Launching is cheap and does not spawn anything: the returned provider
/// connects on first use.
pub trait Launcher: Send + Sync + 'static {
    /// Build the provider for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration cannot be launched
    /// (for example an unparseable start command).
    fn launch(&self, config: &SubServerConfig) -> Result<Arc<dyn Provider>>;
}
