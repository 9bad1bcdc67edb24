//! `GatewayRouter`: the aggregate namespace over every mounted sub-server.
//!
//! Readers (listing, dispatch) go through [`GatewayRouter::handle`]. Only the
//! mount registry writes, through `register`/`unregister`/`set_catalog`.
//!
//! Every prefix has its own gate. Dispatch to a mount holds that mount's gate
//! shared; registering or unregistering the prefix holds it exclusively. A
//! mutation therefore waits for in-flight requests on the same prefix and
//! never stalls traffic to other mounts.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use gateway_core::prefixed_name;
use serde_json::{Value, json};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use super::cache::{CacheStatsSnapshot, ListingCache};
use super::filter::ToolFilter;
use super::tables::{MountTable, Route, RoutingTables};
use crate::config::GatewayConfig;
use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeResult, JsonRpcError, JsonRpcResponse, Prompt, PromptsCapability,
    PromptsGetParams, PromptsListResult, RequestId, Resource, ResourcesCapability,
    ResourcesListResult, ResourcesReadParams, ServerCapabilities, Tool, ToolsCallParams,
    ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::provider::Provider;
use crate::store::Store;
use crate::{Error, Result};

/// Aggregate router over all mounts
pub struct GatewayRouter {
    tables: RoutingTables,
    cache: ListingCache,
    filter: ToolFilter,
    block_disabled_calls: bool,
    /// Per-prefix gates: shared by dispatch, exclusive for mount changes
    gates: DashMap<String, Arc<RwLock<()>>>,
}

impl GatewayRouter {
    /// Create an empty router
    #[must_use]
    pub fn new(store: Store, config: &GatewayConfig) -> Self {
        Self {
            tables: RoutingTables::default(),
            cache: ListingCache::new(config.listing_cache_ttl),
            filter: ToolFilter::new(store),
            block_disabled_calls: config.block_disabled_calls,
            gates: DashMap::new(),
        }
    }

    // ── write side (mount registry only) ────────────────────────────────

    /// Add `prefix` to every table with an empty catalog
    pub(crate) async fn register(&self, prefix: &str, provider: &Arc<dyn Provider>) {
        let gate = self.mount_gate(prefix);
        let _exclusive = gate.write().await;
        self.tables.register(prefix, provider);
        self.cache.clear();
        debug!(prefix = %prefix, "Mount registered");
    }

    /// Remove `prefix` from every table; returns the tables that held it
    pub(crate) async fn unregister(&self, prefix: &str) -> Vec<&'static str> {
        let gate = self.mount_gate(prefix);
        let _exclusive = gate.write().await;
        let removed = self.tables.unregister(prefix);
        self.cache.clear();
        if self.tables.references(prefix) {
            warn!(prefix = %prefix, "Mount still referenced after unregister");
        }
        debug!(prefix = %prefix, tables = ?removed, "Mount unregistered");
        removed
    }

    /// Install the discovered catalog for a mounted prefix
    pub(crate) fn set_catalog(&self, prefix: &str, catalog: Vec<Tool>) -> bool {
        let installed = self.tables.tools.set_catalog(prefix, catalog);
        self.cache.clear();
        installed
    }

    /// Gate for `prefix`; entries outlive unmounts so a re-mount reuses them
    fn mount_gate(&self, prefix: &str) -> Arc<RwLock<()>> {
        Arc::clone(self.gates.entry(prefix.to_string()).or_default().value())
    }

    /// Resolve a route and hold its mount's gate shared.
    ///
    /// The route is resolved again once the gate is held, so an unregister of
    /// that prefix lands entirely before or entirely after the request.
    async fn gated(
        &self,
        resolve: impl Fn() -> Option<Route>,
    ) -> Option<(OwnedRwLockReadGuard<()>, Route)> {
        let mut route = resolve()?;
        loop {
            let guard = self.mount_gate(&route.prefix).read_owned().await;
            let current = resolve()?;
            if current.prefix == route.prefix {
                return Some((guard, current));
            }
            route = current;
        }
    }

    // ── read side ───────────────────────────────────────────────────────

    /// Whether any table references `prefix`
    #[must_use]
    pub fn is_mounted(&self, prefix: &str) -> bool {
        self.tables.references(prefix)
    }

    /// Mounted prefixes in mount order
    #[must_use]
    pub fn mounted(&self) -> Vec<String> {
        self.tables.tools.prefixes()
    }

    /// Catalog size for a mounted prefix
    #[must_use]
    pub fn tool_count(&self, prefix: &str) -> Option<usize> {
        self.tables.tools.catalog_len(prefix)
    }

    /// Listing cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Answer one JSON-RPC request; `tools/list` output passes through the tool filter
    pub async fn handle(&self, id: RequestId, method: &str, params: Option<Value>) -> JsonRpcResponse {
        let result = match method {
            "initialize" => Ok(Self::initialize_result(params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(params).await,
            "resources/list" => self.list_resources().await,
            "resources/read" => self.read_resource(params).await,
            "prompts/list" => self.list_prompts().await,
            "prompts/get" => self.get_prompt(params).await,
            other => Err(Error::json_rpc(
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        let response = match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => error_response(id, e),
        };
        self.filter.apply(method, response).await
    }

    fn initialize_result(params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let result = InitializeResult {
            protocol_version: negotiate_version(requested).to_string(),
            capabilities: ServerCapabilities {
                logging: None,
                prompts: Some(PromptsCapability { list_changed: false }),
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: false,
                }),
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: Info {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("MCP Container Gateway".to_string()),
            },
            instructions: Some(
                "Tools are named {server_id}_{tool_name}; each prefix is one containerized sub-server."
                    .to_string(),
            ),
        };
        serde_json::to_value(result).unwrap_or_else(|_| json!({}))
    }

    /// Served from discovery catalogs, not live sub-server calls
    fn list_tools(&self) -> Result<Value> {
        if let Some(cached) = self.cache.get("tools/list") {
            return Ok(cached);
        }
        let generation = self.cache.generation();
        let listing = serde_json::to_value(ToolsListResult {
            tools: self.tables.tools.listing(),
            next_cursor: None,
        })?;
        self.cache.set("tools/list", listing.clone(), generation);
        Ok(listing)
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: ToolsCallParams = parse_params(params)?;

        if self.block_disabled_calls && self.filter.is_disabled(&params.name).await {
            info!(tool = %params.name, "Rejected call to disabled tool");
            return Err(Error::json_rpc(
                rpc_codes::METHOD_NOT_FOUND,
                format!("Tool is disabled: {}", params.name),
            ));
        }

        let (_shared, route) = self
            .gated(|| self.tables.tools.resolve(&params.name))
            .await
            .ok_or_else(|| {
                Error::json_rpc(
                    rpc_codes::INVALID_PARAMS,
                    format!("Unknown tool: {}", params.name),
                )
            })?;

        debug!(prefix = %route.prefix, tool = %route.name, "Dispatching tool call");
        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };
        route.provider.call_tool(&route.name, arguments).await
    }

    async fn list_resources(&self) -> Result<Value> {
        if let Some(cached) = self.cache.get("resources/list") {
            return Ok(cached);
        }
        let generation = self.cache.generation();
        let resources = self.refresh_resources().await;
        let listing = serde_json::to_value(ResourcesListResult {
            resources,
            next_cursor: None,
        })?;
        self.cache.set("resources/list", listing.clone(), generation);
        Ok(listing)
    }

    /// Fan out `resources/list` and record URI membership per mount
    async fn refresh_resources(&self) -> Vec<Resource> {
        let providers = self.tables.resources.providers();
        let listings = join_all(providers.iter().map(|(prefix, provider)| async move {
            let gate = self.mount_gate(prefix);
            let _shared = gate.read().await;
            if !self.tables.resources.contains(prefix) {
                return (prefix, None);
            }
            (prefix, Some(provider.list_resources().await))
        }))
        .await;

        let mut merged = Vec::new();
        for (prefix, listing) in listings {
            let Some(listing) = listing else { continue };
            match listing {
                Ok(resources) => {
                    let uris: HashSet<String> = resources.iter().map(|r| r.uri.clone()).collect();
                    self.tables.resources.record_uris(prefix, uris);
                    merged.extend(resources);
                }
                Err(e) => warn!(prefix = %prefix, error = %e, "Resource listing failed"),
            }
        }
        merged
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value> {
        let params: ResourcesReadParams = parse_params(params)?;

        if self.tables.resources.route(&params.uri).is_none() {
            self.refresh_resources().await;
        }
        let by_uri = || {
            self.tables
                .resources
                .route(&params.uri)
                .map(|(prefix, provider)| Route {
                    prefix,
                    provider,
                    name: params.uri.clone(),
                })
        };
        let (_shared, route) = self.gated(by_uri).await.ok_or_else(|| {
            Error::json_rpc(
                rpc_codes::INVALID_PARAMS,
                format!("Unknown resource: {}", params.uri),
            )
        })?;

        debug!(prefix = %route.prefix, uri = %params.uri, "Dispatching resource read");
        route.provider.read_resource(&params.uri).await
    }

    async fn list_prompts(&self) -> Result<Value> {
        if let Some(cached) = self.cache.get("prompts/list") {
            return Ok(cached);
        }
        let generation = self.cache.generation();
        let providers = self.tables.prompts.providers();
        let listings = join_all(providers.iter().map(|(prefix, provider)| async move {
            let gate = self.mount_gate(prefix);
            let _shared = gate.read().await;
            if !self.tables.prompts.contains(prefix) {
                return (prefix, None);
            }
            (prefix, Some(provider.list_prompts().await))
        }))
        .await;

        let mut prompts: Vec<Prompt> = Vec::new();
        for (prefix, listing) in listings {
            let Some(listing) = listing else { continue };
            match listing {
                Ok(found) => prompts.extend(found.into_iter().map(|prompt| Prompt {
                    name: prefixed_name(prefix, &prompt.name),
                    ..prompt
                })),
                Err(e) => warn!(prefix = %prefix, error = %e, "Prompt listing failed"),
            }
        }

        let listing = serde_json::to_value(PromptsListResult {
            prompts,
            next_cursor: None,
        })?;
        self.cache.set("prompts/list", listing.clone(), generation);
        Ok(listing)
    }

    async fn get_prompt(&self, params: Option<Value>) -> Result<Value> {
        let params: PromptsGetParams = parse_params(params)?;
        let (_shared, route) = self
            .gated(|| self.tables.prompts.resolve(&params.name))
            .await
            .ok_or_else(|| {
                Error::json_rpc(
                    rpc_codes::INVALID_PARAMS,
                    format!("Unknown prompt: {}", params.name),
                )
            })?;
        let arguments = params
            .arguments
            .map(serde_json::to_value)
            .transpose()?;
        route.provider.get_prompt(&route.name, arguments).await
    }
}

/// Deserialize request params, mapping failures to `-32602`
fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params
        .ok_or_else(|| Error::json_rpc(rpc_codes::INVALID_PARAMS, "Missing params"))?;
    serde_json::from_value(params)
        .map_err(|e| Error::json_rpc(rpc_codes::INVALID_PARAMS, format!("Invalid params: {e}")))
}

/// JSON-RPC error response for a dispatch failure
pub(crate) fn error_response(id: RequestId, error: Error) -> JsonRpcResponse {
    match error {
        Error::JsonRpc {
            code,
            message,
            data,
        } => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data,
            }),
        },
        other => JsonRpcResponse::error(Some(id), other.to_rpc_code(), other.to_string()),
    }
}
