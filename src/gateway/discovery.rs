//! Tool discovery and persistence for freshly mounted sub-servers.
//!
//! Neither step ever fails the mount that triggered it: discovery degrades
//! to an empty catalog and persistence errors are logged and dropped.

use std::collections::HashSet;

use gateway_core::ToolInfo;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::Tool;
use crate::provider::Provider;
use crate::store::Store;

/// One usable tool reported by a sub-server
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    /// Name/description pair, as persisted
    pub info: ToolInfo,
    /// Full descriptor, as listed to clients (unprefixed)
    pub descriptor: Tool,
}

/// Queries sub-servers for their catalogs and records them
#[derive(Clone)]
pub struct ToolDiscovery {
    store: Store,
}

impl ToolDiscovery {
    /// Create a discovery pipeline writing to `store`
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Ask `provider` for its tools. Never fails; problems yield fewer tools.
    ///
    /// Descriptors without a usable name are skipped, as are repeated names
    /// after the first.
    pub async fn discover(&self, server_id: &str, provider: &dyn Provider) -> Vec<DiscoveredTool> {
        let descriptors = match provider.list_tools().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!(server = %server_id, error = %e, "Tool discovery failed");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let Some(info) = ToolInfo::from_descriptor(&descriptor) else {
                warn!(server = %server_id, descriptor = %descriptor, "Skipping malformed tool descriptor");
                continue;
            };
            if !seen.insert(info.name.clone()) {
                warn!(server = %server_id, tool = %info.name, "Skipping duplicate tool name");
                continue;
            }
            let descriptor = to_tool(&info, descriptor);
            tools.push(DiscoveredTool { info, descriptor });
        }

        debug!(server = %server_id, count = tools.len(), "Tools discovered");
        tools
    }

    /// Replace the stored tool set for `server_id`.
    ///
    /// Returns the number of rows written, or `None` if storage failed.
    pub async fn persist(&self, server_id: &str, tools: &[ToolInfo]) -> Option<usize> {
        match self.store.replace_tools(server_id, tools).await {
            Ok(count) => {
                info!(server = %server_id, count, "Tool records replaced");
                Some(count)
            }
            Err(e) => {
                warn!(server = %server_id, error = %e, "Failed to persist discovered tools");
                None
            }
        }
    }

    /// Discover then persist; returns the catalog to mount
    pub async fn run(&self, server_id: &str, provider: &dyn Provider) -> Vec<Tool> {
        let discovered = self.discover(server_id, provider).await;
        let infos: Vec<ToolInfo> = discovered.iter().map(|t| t.info.clone()).collect();
        self.persist(server_id, &infos).await;
        discovered.into_iter().map(|t| t.descriptor).collect()
    }
}

/// Typed descriptor; falls back to name/description when other fields are malformed
fn to_tool(info: &ToolInfo, descriptor: Value) -> Tool {
    serde_json::from_value::<Tool>(descriptor).unwrap_or_else(|e| {
        debug!(tool = %info.name, error = %e, "Tool descriptor partially malformed, keeping name only");
        Tool {
            name: info.name.clone(),
            title: None,
            description: (!info.description.is_empty()).then(|| info.description.clone()),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: None,
        }
    })
}
