//! Mount-aware routing tables
//!
//! Each table independently records which prefixes are mounted. Removing a
//! mount means removing it from every table; [`RoutingTables`] enumerates
//! them so callers never keep their own list.

use std::collections::HashSet;
use std::sync::Arc;

use gateway_core::{prefixed_name, strip_server_prefix};
use parking_lot::RwLock;

use crate::protocol::Tool;
use crate::provider::Provider;

/// A table that can hold a reference to a mounted provider
pub trait MountTable: Send + Sync {
    /// Name for logs
    fn table_name(&self) -> &'static str;

    /// Add (or replace) the entry for `prefix`
    fn register(&self, prefix: &str, provider: &Arc<dyn Provider>);

    /// Remove the entry for `prefix`; returns whether one existed
    fn unregister(&self, prefix: &str) -> bool;

    /// Whether `prefix` has an entry
    fn contains(&self, prefix: &str) -> bool;
}

/// Longest mounted prefix `p` such that `name` is `{p}_{rest}`.
///
/// Ids may themselves contain the separator, so the longest match wins.
fn resolve_longest<'a, 'n>(
    prefixes: impl Iterator<Item = &'a str>,
    name: &'n str,
) -> Option<(&'a str, &'n str)> {
    prefixes
        .filter_map(|prefix| strip_server_prefix(prefix, name).map(|rest| (prefix, rest)))
        .max_by_key(|(prefix, _)| prefix.len())
}

/// A prefixed name resolved to its mount
#[derive(Clone)]
pub struct Route {
    /// Mount prefix that matched
    pub prefix: String,
    /// Provider mounted under `prefix`
    pub provider: Arc<dyn Provider>,
    /// Name with the prefix stripped
    pub name: String,
}

// ── tools ───────────────────────────────────────────────────────────────────

struct ToolEntry {
    prefix: String,
    provider: Arc<dyn Provider>,
    /// Discovered descriptors, unprefixed, in discovery order
    catalog: Vec<Tool>,
}

/// Prefix → provider plus its discovered tool catalog, in mount order
#[derive(Default)]
pub struct ToolTable {
    entries: RwLock<Vec<ToolEntry>>,
}

impl ToolTable {
    /// Replace the catalog of a mounted prefix; `false` if not mounted
    pub fn set_catalog(&self, prefix: &str, catalog: Vec<Tool>) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.prefix == prefix) {
            Some(entry) => {
                entry.catalog = catalog;
                true
            }
            None => false,
        }
    }

    /// Number of catalogued tools for a prefix
    pub fn catalog_len(&self, prefix: &str) -> Option<usize> {
        self.entries
            .read()
            .iter()
            .find(|e| e.prefix == prefix)
            .map(|e| e.catalog.len())
    }

    /// Every catalogued tool under its prefixed name
    pub fn listing(&self) -> Vec<Tool> {
        self.entries
            .read()
            .iter()
            .flat_map(|entry| {
                entry.catalog.iter().map(|tool| Tool {
                    name: prefixed_name(&entry.prefix, &tool.name),
                    ..tool.clone()
                })
            })
            .collect()
    }

    /// Resolve a prefixed tool name to its mount and unprefixed name
    pub fn resolve(&self, name: &str) -> Option<Route> {
        let entries = self.entries.read();
        let (prefix, rest) = resolve_longest(entries.iter().map(|e| e.prefix.as_str()), name)?;
        entries.iter().find(|e| e.prefix == prefix).map(|e| Route {
            prefix: e.prefix.clone(),
            provider: Arc::clone(&e.provider),
            name: rest.to_string(),
        })
    }

    /// Mounted prefixes in mount order
    pub fn prefixes(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.prefix.clone()).collect()
    }
}

impl MountTable for ToolTable {
    fn table_name(&self) -> &'static str {
        "tools"
    }

    fn register(&self, prefix: &str, provider: &Arc<dyn Provider>) {
        let mut entries = self.entries.write();
        let entry = ToolEntry {
            prefix: prefix.to_string(),
            provider: Arc::clone(provider),
            catalog: Vec::new(),
        };
        match entries.iter_mut().find(|e| e.prefix == prefix) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    fn unregister(&self, prefix: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.prefix != prefix);
        entries.len() != before
    }

    fn contains(&self, prefix: &str) -> bool {
        self.entries.read().iter().any(|e| e.prefix == prefix)
    }
}

// ── resources ───────────────────────────────────────────────────────────────

struct ResourceEntry {
    prefix: String,
    provider: Arc<dyn Provider>,
    /// URIs seen in this provider's last listing
    uris: HashSet<String>,
}

/// Prefix → provider plus the resource URIs it last reported
#[derive(Default)]
pub struct ResourceTable {
    entries: RwLock<Vec<ResourceEntry>>,
}

impl ResourceTable {
    /// Snapshot of mounted providers
    pub fn providers(&self) -> Vec<(String, Arc<dyn Provider>)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.prefix.clone(), Arc::clone(&e.provider)))
            .collect()
    }

    /// Remember which URIs a prefix serves; ignored if it was unmounted meanwhile
    pub fn record_uris(&self, prefix: &str, uris: HashSet<String>) {
        if let Some(entry) = self.entries.write().iter_mut().find(|e| e.prefix == prefix) {
            entry.uris = uris;
        }
    }

    /// Provider that listed `uri`
    pub fn route(&self, uri: &str) -> Option<(String, Arc<dyn Provider>)> {
        self.entries
            .read()
            .iter()
            .find(|e| e.uris.contains(uri))
            .map(|e| (e.prefix.clone(), Arc::clone(&e.provider)))
    }
}

impl MountTable for ResourceTable {
    fn table_name(&self) -> &'static str {
        "resources"
    }

    fn register(&self, prefix: &str, provider: &Arc<dyn Provider>) {
        let mut entries = self.entries.write();
        let entry = ResourceEntry {
            prefix: prefix.to_string(),
            provider: Arc::clone(provider),
            uris: HashSet::new(),
        };
        match entries.iter_mut().find(|e| e.prefix == prefix) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    fn unregister(&self, prefix: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.prefix != prefix);
        entries.len() != before
    }

    fn contains(&self, prefix: &str) -> bool {
        self.entries.read().iter().any(|e| e.prefix == prefix)
    }
}

// ── prompts ─────────────────────────────────────────────────────────────────

/// Prefix → provider for prompt listing and lookup
#[derive(Default)]
pub struct PromptTable {
    entries: RwLock<Vec<(String, Arc<dyn Provider>)>>,
}

impl PromptTable {
    /// Snapshot of mounted providers
    pub fn providers(&self) -> Vec<(String, Arc<dyn Provider>)> {
        self.entries.read().clone()
    }

    /// Resolve a prefixed prompt name to its mount and unprefixed name
    pub fn resolve(&self, name: &str) -> Option<Route> {
        let entries = self.entries.read();
        let (prefix, rest) = resolve_longest(entries.iter().map(|(p, _)| p.as_str()), name)?;
        entries
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(p, provider)| Route {
                prefix: p.clone(),
                provider: Arc::clone(provider),
                name: rest.to_string(),
            })
    }
}

impl MountTable for PromptTable {
    fn table_name(&self) -> &'static str {
        "prompts"
    }

    fn register(&self, prefix: &str, provider: &Arc<dyn Provider>) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(p, _)| p == prefix) {
            Some(existing) => existing.1 = Arc::clone(provider),
            None => entries.push((prefix.to_string(), Arc::clone(provider))),
        }
    }

    fn unregister(&self, prefix: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(p, _)| p != prefix);
        entries.len() != before
    }

    fn contains(&self, prefix: &str) -> bool {
        self.entries.read().iter().any(|(p, _)| p == prefix)
    }
}

// ── all tables ──────────────────────────────────────────────────────────────

/// Every table that can reference a mount
#[derive(Default)]
pub struct RoutingTables {
    /// Tool listing and call routing
    pub tools: ToolTable,
    /// Resource listing and read routing
    pub resources: ResourceTable,
    /// Prompt listing and lookup
    pub prompts: PromptTable,
}

impl RoutingTables {
    /// All mount-aware tables; adding a table means adding it here
    pub fn all(&self) -> [&dyn MountTable; 3] {
        [&self.tools, &self.resources, &self.prompts]
    }

    /// Register `prefix` in every table
    pub fn register(&self, prefix: &str, provider: &Arc<dyn Provider>) {
        for table in self.all() {
            table.register(prefix, provider);
        }
    }

    /// Remove `prefix` from every table; returns the names of tables that held it
    pub fn unregister(&self, prefix: &str) -> Vec<&'static str> {
        self.all()
            .into_iter()
            .filter(|table| table.unregister(prefix))
            .map(|table| table.table_name())
            .collect()
    }

    /// Whether any table still references `prefix`
    pub fn references(&self, prefix: &str) -> bool {
        self.all().iter().any(|table| table.contains(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    struct Named(&'static str);

    #[async_trait]
    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn list_tools(&self) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn provider(name: &'static str) -> Arc<dyn Provider> {
        Arc::new(Named(name))
    }

    fn tool(name: &str) -> Tool {
        serde_json::from_value(json!({"name": name, "description": name})).unwrap()
    }

    #[test]
    fn listing_prefixes_in_catalog_order() {
        let tables = RoutingTables::default();
        tables.register("abc12345", &provider("abc12345"));
        tables
            .tools
            .set_catalog("abc12345", vec![tool("multiply"), tool("add")]);

        let names: Vec<_> = tables.tools.listing().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["abc12345_multiply", "abc12345_add"]);
    }

    #[test]
    fn resolve_strips_prefix() {
        let tables = RoutingTables::default();
        tables.register("abc12345", &provider("abc12345"));

        let route = tables.tools.resolve("abc12345_read_file").unwrap();
        assert_eq!(route.prefix, "abc12345");
        assert_eq!(route.provider.name(), "abc12345");
        assert_eq!(route.name, "read_file");
        assert!(tables.tools.resolve("zzz_read_file").is_none());
        assert!(tables.tools.resolve("abc12345_").is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let tables = RoutingTables::default();
        tables.register("a", &provider("a"));
        tables.register("a_b", &provider("a_b"));

        let route = tables.tools.resolve("a_b_tool").unwrap();
        assert_eq!(route.provider.name(), "a_b");
        assert_eq!(route.name, "tool");

        let route = tables.tools.resolve("a_c").unwrap();
        assert_eq!(route.prefix, "a");
        assert_eq!(route.name, "c");
    }

    #[test]
    fn unregister_clears_every_table() {
        let tables = RoutingTables::default();
        tables.register("abc12345", &provider("abc12345"));
        assert!(tables.references("abc12345"));

        let removed = tables.unregister("abc12345");
        assert_eq!(removed, vec!["tools", "resources", "prompts"]);
        assert!(!tables.references("abc12345"));
        assert!(tables.unregister("abc12345").is_empty());
    }

    #[test]
    fn catalog_for_unknown_prefix_is_rejected() {
        let tables = RoutingTables::default();
        assert!(!tables.tools.set_catalog("nope", vec![tool("x")]));
        assert!(tables.tools.catalog_len("nope").is_none());
    }

    #[test]
    fn resources_route_by_recorded_uri() {
        let tables = RoutingTables::default();
        tables.register("abc12345", &provider("abc12345"));
        tables
            .resources
            .record_uris("abc12345", HashSet::from(["file:///a".to_string()]));

        let (prefix, _) = tables.resources.route("file:///a").unwrap();
        assert_eq!(prefix, "abc12345");
        assert!(tables.resources.route("file:///b").is_none());
    }

    #[test]
    fn re_register_resets_catalog() {
        let tables = RoutingTables::default();
        tables.register("abc12345", &provider("abc12345"));
        tables.tools.set_catalog("abc12345", vec![tool("add")]);
        tables.register("abc12345", &provider("abc12345"));
        assert_eq!(tables.tools.catalog_len("abc12345"), Some(0));
        assert_eq!(tables.tools.prefixes(), vec!["abc12345"]);
    }
}
