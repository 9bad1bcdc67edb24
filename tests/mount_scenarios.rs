//! Mount lifecycle scenarios through the public library API:
//! registry, discovery persistence and the tool filter together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use gateway_core::strip_server_prefix;

use common::{Catalogs, FakeLauncher, Holds, insert_built_server};
use mcp_container_gateway::config::GatewayConfig;
use mcp_container_gateway::gateway::{GatewayRouter, MountRegistry, MountState, ToolDiscovery};
use mcp_container_gateway::protocol::RequestId;
use mcp_container_gateway::store::Store;

struct World {
    store: Store,
    catalogs: Catalogs,
    holds: Holds,
    registry: Arc<MountRegistry>,
}

async fn world(block_disabled_calls: bool) -> World {
    let store = Store::in_memory().await.unwrap();
    let catalogs = Catalogs::default();
    let router = Arc::new(GatewayRouter::new(
        store.clone(),
        &GatewayConfig {
            listing_cache_ttl: Duration::from_secs(30),
            block_disabled_calls,
        },
    ));
    let launcher = FakeLauncher::new(catalogs.clone());
    let holds = launcher.holds.clone();
    let registry = Arc::new(MountRegistry::new(
        router,
        Arc::new(launcher),
        ToolDiscovery::new(store.clone()),
    ));
    World {
        store,
        catalogs,
        holds,
        registry,
    }
}

async fn tool_names(registry: &MountRegistry) -> Vec<String> {
    let response = registry
        .router()
        .handle(RequestId::Number(1), "tools/list", None)
        .await;
    response.result.unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

async fn disable(store: &Store, server_id: &str, tool: &str) {
    let record = store
        .tools_for_server(server_id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.tool_name == tool)
        .unwrap();
    assert!(store.set_tool_enabled(record.id, false).await.unwrap());
}

#[tokio::test]
async fn disabled_tool_disappears_from_listing() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);

    w.registry.add(&config).await.unwrap();
    assert_eq!(
        tool_names(&w.registry).await,
        vec!["abc12345_add", "abc12345_multiply"]
    );

    disable(&w.store, "abc12345", "multiply").await;
    assert_eq!(tool_names(&w.registry).await, vec!["abc12345_add"]);
}

#[tokio::test]
async fn disabled_tool_stays_callable_by_default() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);
    w.registry.add(&config).await.unwrap();
    disable(&w.store, "abc12345", "multiply").await;

    let response = w
        .registry
        .router()
        .handle(
            RequestId::Number(2),
            "tools/call",
            Some(json!({"name": "abc12345_multiply", "arguments": {"a": 2, "b": 3}})),
        )
        .await;
    let text = response.result.unwrap()["content"][0]["text"].clone();
    assert_eq!(text, json!(r#"abc12345:multiply:{"a":2,"b":3}"#));
}

#[tokio::test]
async fn blocking_policy_rejects_disabled_calls() {
    let w = world(true).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);
    w.registry.add(&config).await.unwrap();
    disable(&w.store, "abc12345", "multiply").await;

    let blocked = w
        .registry
        .router()
        .handle(
            RequestId::Number(3),
            "tools/call",
            Some(json!({"name": "abc12345_multiply"})),
        )
        .await;
    assert_eq!(blocked.error.unwrap().code, -32601);

    let allowed = w
        .registry
        .router()
        .handle(
            RequestId::Number(4),
            "tools/call",
            Some(json!({"name": "abc12345_add"})),
        )
        .await;
    assert!(allowed.result.is_some());
}

#[tokio::test]
async fn discovery_failure_keeps_mount_with_no_tools() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;

    let status = w.registry.add(&config).await.unwrap();
    assert_eq!(status.state, MountState::Ready);
    assert_eq!(status.tools, 0);
    assert!(w.registry.router().is_mounted("abc12345"));
    assert!(tool_names(&w.registry).await.is_empty());
    assert!(w.store.tools_for_server("abc12345").await.unwrap().is_empty());

    // Still invocable by exact name
    let response = w
        .registry
        .router()
        .handle(
            RequestId::Number(5),
            "tools/call",
            Some(json!({"name": "abc12345_add"})),
        )
        .await;
    assert_eq!(
        response.result.unwrap()["content"][0]["text"],
        json!("abc12345:add:{}")
    );
}

#[tokio::test]
async fn rediscovery_replaces_rows_and_reenables() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);
    w.registry.add(&config).await.unwrap();
    disable(&w.store, "abc12345", "multiply").await;

    w.catalogs.set("abc12345", &["multiply", "divide"]);
    w.registry.add(&config).await.unwrap();

    let rows = w.store.tools_for_server("abc12345").await.unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.tool_name.as_str()).collect();
    assert_eq!(names, vec!["multiply", "divide"]);
    assert!(rows.iter().all(|r| r.is_enabled));
    assert_eq!(
        tool_names(&w.registry).await,
        vec!["abc12345_multiply", "abc12345_divide"]
    );
}

#[tokio::test]
async fn stored_name_is_suffix_of_listed_name() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);
    w.registry.add(&config).await.unwrap();

    let listed = tool_names(&w.registry).await;
    let stored = w.store.tools_for_server("abc12345").await.unwrap();
    for (prefixed, record) in listed.iter().zip(&stored) {
        assert_eq!(strip_server_prefix("abc12345", prefixed), Some(record.tool_name.as_str()));
    }
}

#[tokio::test]
async fn remove_is_idempotent() {
    let w = world(false).await;
    assert!(!w.registry.remove("abc12345").await);

    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add"]);
    w.registry.add(&config).await.unwrap();

    assert!(w.registry.remove("abc12345").await);
    assert!(!w.registry.remove("abc12345").await);
    assert!(tool_names(&w.registry).await.is_empty());
    assert!(!w.registry.router().is_mounted("abc12345"));
}

#[tokio::test]
async fn add_remove_add_equals_single_add() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);

    w.registry.add(&config).await.unwrap();
    let single = tool_names(&w.registry).await;
    let single_rows = w.store.tools_for_server("abc12345").await.unwrap().len();

    w.registry.remove("abc12345").await;
    w.registry.add(&config).await.unwrap();

    assert_eq!(tool_names(&w.registry).await, single);
    assert_eq!(w.store.tools_for_server("abc12345").await.unwrap().len(), single_rows);
    assert_eq!(w.registry.router().mounted(), vec!["abc12345".to_string()]);
}

#[tokio::test]
async fn mounts_are_independent() {
    let w = world(false).await;
    let calc = insert_built_server(&w.store, "abc12345", "calc").await;
    let text = insert_built_server(&w.store, "def67890", "text").await;
    w.catalogs.set("abc12345", &["add"]);
    w.catalogs.set("def67890", &["upper"]);

    w.registry.add(&calc).await.unwrap();
    w.registry.add(&text).await.unwrap();
    w.registry.remove("abc12345").await;

    assert_eq!(tool_names(&w.registry).await, vec!["def67890_upper"]);
    assert_eq!(w.store.tools_for_server("abc12345").await.unwrap().len(), 1);
}

#[tokio::test]
async fn launch_failure_is_fatal_to_that_mount_only() {
    let w = world(false).await;
    let mut broken = insert_built_server(&w.store, "abc12345", "calc").await;
    broken.start_command = String::new();
    let healthy = insert_built_server(&w.store, "def67890", "text").await;
    w.catalogs.set("def67890", &["upper"]);

    assert!(w.registry.add(&broken).await.is_err());
    w.registry.add(&healthy).await.unwrap();

    assert_eq!(w.registry.state("abc12345"), Some(MountState::Failed));
    assert_eq!(tool_names(&w.registry).await, vec!["def67890_upper"]);
}

#[tokio::test]
async fn listing_during_discovery_sees_mount_with_no_tools() {
    let w = world(false).await;
    let text = insert_built_server(&w.store, "def67890", "text").await;
    w.catalogs.set("def67890", &["upper"]);
    w.registry.add(&text).await.unwrap();

    let calc = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add", "multiply"]);
    let hold = w.holds.discovery("abc12345");
    let adding = tokio::spawn({
        let registry = Arc::clone(&w.registry);
        async move { registry.add(&calc).await }
    });
    hold.entered().await;

    assert!(w.registry.router().is_mounted("abc12345"));
    assert_eq!(w.registry.state("abc12345"), Some(MountState::Discovering));
    assert_eq!(tool_names(&w.registry).await, vec!["def67890_upper"]);

    hold.release();
    let status = adding.await.unwrap().unwrap();
    assert_eq!(status.tools, 2);
    assert_eq!(
        tool_names(&w.registry).await,
        vec!["def67890_upper", "abc12345_add", "abc12345_multiply"]
    );
}

#[tokio::test]
async fn remove_waits_for_in_flight_call_on_same_prefix() {
    let w = world(false).await;
    let config = insert_built_server(&w.store, "abc12345", "calc").await;
    w.catalogs.set("abc12345", &["add"]);
    w.registry.add(&config).await.unwrap();

    let hold = w.holds.call("abc12345");
    let call = tokio::spawn({
        let router = Arc::clone(w.registry.router());
        async move {
            router
                .handle(
                    RequestId::Number(6),
                    "tools/call",
                    Some(json!({"name": "abc12345_add"})),
                )
                .await
        }
    });
    hold.entered().await;

    let removing = tokio::spawn({
        let registry = Arc::clone(&w.registry);
        async move { registry.remove("abc12345").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!removing.is_finished());
    assert!(w.registry.router().is_mounted("abc12345"));

    hold.release();
    let response = call.await.unwrap();
    assert_eq!(
        response.result.unwrap()["content"][0]["text"],
        json!("abc12345:add:{}")
    );
    assert!(removing.await.unwrap());
    assert!(!w.registry.router().is_mounted("abc12345"));
}

#[tokio::test]
async fn slow_call_does_not_block_mounting_elsewhere() {
    let w = world(false).await;
    let calc = insert_built_server(&w.store, "abc12345", "calc").await;
    let text = insert_built_server(&w.store, "def67890", "text").await;
    w.catalogs.set("abc12345", &["add"]);
    w.catalogs.set("def67890", &["upper"]);
    w.registry.add(&calc).await.unwrap();

    let hold = w.holds.call("abc12345");
    let call = tokio::spawn({
        let router = Arc::clone(w.registry.router());
        async move {
            router
                .handle(
                    RequestId::Number(8),
                    "tools/call",
                    Some(json!({"name": "abc12345_add"})),
                )
                .await
        }
    });
    hold.entered().await;

    tokio::time::timeout(Duration::from_millis(500), w.registry.add(&text))
        .await
        .expect("mounting another prefix waited on a parked call")
        .unwrap();
    let names = tokio::time::timeout(Duration::from_millis(500), tool_names(&w.registry))
        .await
        .expect("listing waited on a parked call");
    assert_eq!(names, vec!["abc12345_add", "def67890_upper"]);

    hold.release();
    assert!(call.await.unwrap().result.is_some());
}
