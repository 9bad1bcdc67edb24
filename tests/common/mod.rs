//! Shared fakes for integration tests: in-process providers instead of containers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;

use mcp_container_gateway::provider::{Launcher, Provider};
use mcp_container_gateway::store::{Store, SubServerConfig};
use mcp_container_gateway::{Error, Result};

/// Tool catalogs by server id; a missing entry makes discovery fail
#[derive(Clone, Default)]
pub struct Catalogs(Arc<Mutex<HashMap<String, Vec<String>>>>);

impl Catalogs {
    pub fn set(&self, server_id: &str, tools: &[&str]) {
        self.0.lock().insert(
            server_id.to_string(),
            tools.iter().map(ToString::to_string).collect(),
        );
    }

    pub fn clear(&self, server_id: &str) {
        self.0.lock().remove(server_id);
    }

    fn get(&self, server_id: &str) -> Option<Vec<String>> {
        self.0.lock().get(server_id).cloned()
    }
}

/// Parks one provider call until the test releases it
#[derive(Default)]
pub struct Hold {
    entered: Notify,
    release: Notify,
}

impl Hold {
    /// Wait until the held call has started
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call continue
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// One-shot holds by server id, for `list_tools` and `call_tool`
#[derive(Clone, Default)]
pub struct Holds {
    discovery: Arc<Mutex<HashMap<String, Arc<Hold>>>>,
    calls: Arc<Mutex<HashMap<String, Arc<Hold>>>>,
}

impl Holds {
    /// Park the next tool listing of `server_id`
    pub fn discovery(&self, server_id: &str) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        self.discovery
            .lock()
            .insert(server_id.to_string(), Arc::clone(&hold));
        hold
    }

    /// Park the next tool call on `server_id`
    pub fn call(&self, server_id: &str) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        self.calls.lock().insert(server_id.to_string(), Arc::clone(&hold));
        hold
    }
}

/// Stands in for one sub-server container
pub struct FakeServer {
    id: String,
    catalogs: Catalogs,
    holds: Holds,
}

#[async_trait]
impl Provider for FakeServer {
    fn name(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<Value>> {
        let hold = self.holds.discovery.lock().remove(&self.id);
        if let Some(hold) = hold {
            hold.pass().await;
        }
        let tools = self
            .catalogs
            .get(&self.id)
            .ok_or_else(|| Error::Connection {
                server: self.id.clone(),
                message: "container exited immediately".to_string(),
            })?;
        Ok(tools
            .iter()
            .map(|t| json!({"name": t, "description": format!("{t} numbers"), "inputSchema": {"type": "object"}}))
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let hold = self.holds.calls.lock().remove(&self.id);
        if let Some(hold) = hold {
            hold.pass().await;
        }
        Ok(json!({
            "content": [{"type": "text", "text": format!("{}:{name}:{arguments}", self.id)}]
        }))
    }
}

/// Launcher handing out [`FakeServer`]s
pub struct FakeLauncher {
    pub catalogs: Catalogs,
    pub holds: Holds,
}

impl FakeLauncher {
    pub fn new(catalogs: Catalogs) -> Self {
        Self {
            catalogs,
            holds: Holds::default(),
        }
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, config: &SubServerConfig) -> Result<Arc<dyn Provider>> {
        if config.start_command.trim().is_empty() {
            return Err(Error::Config("Start command is empty".to_string()));
        }
        Ok(Arc::new(FakeServer {
            id: config.id.clone(),
            catalogs: self.catalogs.clone(),
            holds: self.holds.clone(),
        }))
    }
}

/// Insert a configuration under a fixed id, already built
pub async fn insert_built_server(store: &Store, id: &str, name: &str) -> SubServerConfig {
    sqlx::query(
        "INSERT INTO sub_servers (id, name, runtime_kind, start_command, build_status, image_tag, created_at) \
         VALUES (?, ?, 'node', 'npx -y calc-server', 'built', ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(format!("mcp-subserver-{id}:latest"))
    .bind(Utc::now())
    .execute(store.pool())
    .await
    .unwrap();
    store.get_server(id).await.unwrap().unwrap()
}
