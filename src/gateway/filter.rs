//! `ToolFilter`: removes administrator-disabled tools from listings.
//!
//! Only `tools/list` responses are touched; every other message passes
//! through unchanged. Matching is purely on the prefixed name, computed
//! with the same rule the router uses to expose tools.
//!
//! Storage failures fail open: the listing goes out unfiltered with a
//! warning.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::Result;
use crate::protocol::JsonRpcResponse;
use crate::store::Store;

/// Listing middleware backed by the tool records table
#[derive(Clone)]
pub struct ToolFilter {
    store: Store,
}

impl ToolFilter {
    /// Create a filter reading disabled records from `store`
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Prefixed names of every disabled tool
    pub async fn disabled_names(&self) -> Result<HashSet<String>> {
        Ok(self
            .store
            .disabled_tools()
            .await?
            .iter()
            .map(|record| record.prefixed_name())
            .collect())
    }

    /// Whether `prefixed` is disabled. Storage errors count as enabled.
    pub async fn is_disabled(&self, prefixed: &str) -> bool {
        match self.disabled_names().await {
            Ok(disabled) => disabled.contains(prefixed),
            Err(e) => {
                warn!(error = %e, "Cannot load disabled tools, allowing call");
                false
            }
        }
    }

    /// Apply the filter to an outbound response for `method`
    pub async fn apply(&self, method: &str, mut response: JsonRpcResponse) -> JsonRpcResponse {
        if method != "tools/list" {
            return response;
        }
        let has_tools = response
            .result
            .as_ref()
            .is_some_and(|result| result.get("tools").is_some_and(Value::is_array));
        if !has_tools {
            return response;
        }

        let disabled = match self.disabled_names().await {
            Ok(disabled) => disabled,
            Err(e) => {
                warn!(error = %e, "Cannot load disabled tools, listing unfiltered");
                return response;
            }
        };
        if disabled.is_empty() {
            return response;
        }

        let Some(Value::Array(tools)) = response
            .result
            .as_mut()
            .and_then(|result| result.get_mut("tools"))
        else {
            return response;
        };
        let before = tools.len();
        tools.retain(|tool| {
            tool.get("name")
                .and_then(Value::as_str)
                .is_none_or(|name| !disabled.contains(name))
        });
        debug!(before, after = tools.len(), "Filtered disabled tools from listing");

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use crate::store::{NewSubServer, RuntimeKind};
    use gateway_core::ToolInfo;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store_with_tools(names: &[&str]) -> (Store, String) {
        let store = Store::in_memory().await.unwrap();
        let server = store
            .insert_server(NewSubServer {
                name: "calc".to_string(),
                source_reference: String::new(),
                description: String::new(),
                runtime_kind: RuntimeKind::Node,
                install_command: String::new(),
                start_command: "npx calc".to_string(),
                environment: Vec::new(),
                is_active: true,
            })
            .await
            .unwrap();
        let tools: Vec<_> = names.iter().map(|n| ToolInfo::new(*n, "")).collect();
        store.replace_tools(&server.id, &tools).await.unwrap();
        (store, server.id)
    }

    async fn disable(store: &Store, server_id: &str, name: &str) {
        let record = store
            .tools_for_server(server_id)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.tool_name == name)
            .unwrap();
        store.set_tool_enabled(record.id, false).await.unwrap();
    }

    fn listing(names: &[String]) -> JsonRpcResponse {
        let tools: Vec<_> = names.iter().map(|n| json!({"name": n})).collect();
        JsonRpcResponse::success(RequestId::Number(1), json!({"tools": tools}))
    }

    fn names(response: &JsonRpcResponse) -> Vec<String> {
        response.result.as_ref().unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn disabled_tool_is_removed_and_order_kept() {
        let (store, id) = store_with_tools(&["add", "multiply", "divide"]).await;
        disable(&store, &id, "multiply").await;
        let filter = ToolFilter::new(store);

        let all = vec![
            format!("{id}_add"),
            format!("{id}_multiply"),
            format!("{id}_divide"),
        ];
        let filtered = filter.apply("tools/list", listing(&all)).await;
        assert_eq!(names(&filtered), vec![format!("{id}_add"), format!("{id}_divide")]);
    }

    #[tokio::test]
    async fn nothing_disabled_is_passthrough() {
        let (store, id) = store_with_tools(&["add"]).await;
        let filter = ToolFilter::new(store);
        let all = vec![format!("{id}_add")];
        assert_eq!(names(&filter.apply("tools/list", listing(&all)).await), all);
    }

    #[tokio::test]
    async fn other_methods_are_untouched() {
        let (store, id) = store_with_tools(&["add"]).await;
        disable(&store, &id, "add").await;
        let filter = ToolFilter::new(store);

        let all = vec![format!("{id}_add")];
        let response = filter.apply("prompts/list", listing(&all)).await;
        assert_eq!(names(&response), all);
    }

    #[tokio::test]
    async fn unprefixed_name_does_not_match() {
        let (store, id) = store_with_tools(&["add"]).await;
        disable(&store, &id, "add").await;
        let filter = ToolFilter::new(store);

        let all = vec!["add".to_string(), "other_add".to_string()];
        assert_eq!(names(&filter.apply("tools/list", listing(&all)).await), all);
        assert!(filter.is_disabled(&format!("{id}_add")).await);
        assert!(!filter.is_disabled("add").await);
    }

    #[tokio::test]
    async fn error_responses_pass_through() {
        let (store, _) = store_with_tools(&[]).await;
        let filter = ToolFilter::new(store);
        let response = JsonRpcResponse::error(Some(RequestId::Number(1)), -32603, "boom");
        let out = filter.apply("tools/list", response).await;
        assert!(out.error.is_some());
    }

    #[tokio::test]
    async fn storage_failure_lists_unfiltered() {
        let (store, id) = store_with_tools(&["add"]).await;
        disable(&store, &id, "add").await;
        store.pool().close().await;
        let filter = ToolFilter::new(store);

        let all = vec![format!("{id}_add")];
        assert_eq!(names(&filter.apply("tools/list", listing(&all)).await), all);
        assert!(!filter.is_disabled(&all[0]).await);
    }
}
