//! Mount registry: the only writer of the gateway router's routing tables.
//!
//! Each mount walks `unmounted → mounting → mounted → discovering → ready`.
//! A launch failure ends in `failed` with nothing registered. Discovery
//! never fails a mount; a sub-server that cannot report tools stays mounted
//! with an empty catalog.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::discovery::ToolDiscovery;
use super::namespace::GatewayRouter;
use crate::Result;
use crate::provider::{Launcher, Provider};
use crate::store::SubServerConfig;

/// Lifecycle state of one mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    /// Launch spec being translated
    Mounting,
    /// Registered in every routing table, catalog not yet known
    Mounted,
    /// Catalog being queried and persisted
    Discovering,
    /// Serving with its discovered catalog
    Ready,
    /// Launch failed; nothing registered
    Failed,
}

/// Snapshot of one mount for health and admin output
#[derive(Debug, Clone, Serialize)]
pub struct MountStatus {
    /// Mount prefix (the sub-server id)
    pub prefix: String,
    /// Sub-server description
    pub description: String,
    /// Lifecycle state
    pub state: MountState,
    /// Tools in the discovered catalog
    pub tools: usize,
    /// Launch error, for failed mounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Mount {
    provider: Arc<dyn Provider>,
    description: String,
    state: MountState,
    tools: usize,
}

/// Tracks live mounts and serializes every change to them
pub struct MountRegistry {
    router: Arc<GatewayRouter>,
    launcher: Arc<dyn Launcher>,
    discovery: ToolDiscovery,
    /// One add/remove in flight at a time
    ops: Mutex<()>,
    mounts: DashMap<String, Mount>,
    failures: DashMap<String, MountStatus>,
}

impl MountRegistry {
    /// Create an empty registry writing to `router`
    #[must_use]
    pub fn new(
        router: Arc<GatewayRouter>,
        launcher: Arc<dyn Launcher>,
        discovery: ToolDiscovery,
    ) -> Self {
        Self {
            router,
            launcher,
            discovery,
            ops: Mutex::new(()),
            mounts: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// The router this registry writes to
    #[must_use]
    pub fn router(&self) -> &Arc<GatewayRouter> {
        &self.router
    }

    /// Mount `config` under its id, replacing any existing mount for it.
    ///
    /// Routing is fully registered before discovery starts, so a listing
    /// that races with discovery sees the mount with zero tools.
    ///
    /// # Errors
    ///
    /// Returns the launcher's error (a configuration error for an
    /// unparseable start command). Nothing stays registered in that case.
    pub async fn add(&self, config: &SubServerConfig) -> Result<MountStatus> {
        let _ops = self.ops.lock().await;
        let prefix = config.id.clone();

        if self.mounts.contains_key(&prefix) {
            info!(prefix = %prefix, "Replacing existing mount");
            self.remove_locked(&prefix).await;
        }
        self.failures.remove(&prefix);

        debug!(prefix = %prefix, state = ?MountState::Mounting, "Mounting sub-server");
        let provider = match self.launcher.launch(config) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Mount failed");
                self.failures.insert(
                    prefix.clone(),
                    MountStatus {
                        prefix: prefix.clone(),
                        description: config.description.clone(),
                        state: MountState::Failed,
                        tools: 0,
                        error: Some(e.to_string()),
                    },
                );
                return Err(e);
            }
        };

        self.router.register(&prefix, &provider).await;
        self.mounts.insert(
            prefix.clone(),
            Mount {
                provider: Arc::clone(&provider),
                description: config.description.clone(),
                state: MountState::Mounted,
                tools: 0,
            },
        );
        self.set_state(&prefix, MountState::Discovering);

        let catalog = self.discovery.run(&prefix, provider.as_ref()).await;
        let tools = catalog.len();
        self.router.set_catalog(&prefix, catalog);
        if let Some(mut mount) = self.mounts.get_mut(&prefix) {
            mount.state = MountState::Ready;
            mount.tools = tools;
        }

        info!(prefix = %prefix, name = %config.name, tools, "Sub-server mounted");
        Ok(MountStatus {
            prefix,
            description: config.description.clone(),
            state: MountState::Ready,
            tools,
            error: None,
        })
    }

    /// Unmount `prefix`. Returns `false` (and changes nothing) when it is not mounted.
    pub async fn remove(&self, prefix: &str) -> bool {
        let _ops = self.ops.lock().await;
        self.failures.remove(prefix);
        self.remove_locked(prefix).await
    }

    async fn remove_locked(&self, prefix: &str) -> bool {
        let Some((_, mount)) = self.mounts.remove(prefix) else {
            debug!(prefix = %prefix, "Remove requested for unmounted prefix");
            return false;
        };

        let tables = self.router.unregister(prefix).await;
        if let Err(e) = mount.provider.shutdown().await {
            warn!(prefix = %prefix, error = %e, "Failed to stop sub-server");
        }
        info!(prefix = %prefix, tables = ?tables, "Sub-server unmounted");
        true
    }

    /// Unmount everything (process shutdown)
    pub async fn shutdown_all(&self) {
        let _ops = self.ops.lock().await;
        let prefixes: Vec<String> = self.mounts.iter().map(|m| m.key().clone()).collect();
        for prefix in prefixes {
            self.remove_locked(&prefix).await;
        }
    }

    /// Whether `prefix` is currently mounted
    #[must_use]
    pub fn is_mounted(&self, prefix: &str) -> bool {
        self.mounts.contains_key(prefix)
    }

    /// Current state of `prefix`, including failed mounts
    #[must_use]
    pub fn state(&self, prefix: &str) -> Option<MountState> {
        self.mounts
            .get(prefix)
            .map(|m| m.state)
            .or_else(|| self.failures.get(prefix).map(|f| f.state))
    }

    /// Status of every live and failed mount, sorted by prefix
    #[must_use]
    pub fn statuses(&self) -> Vec<MountStatus> {
        let mut statuses: Vec<MountStatus> = self
            .mounts
            .iter()
            .map(|m| MountStatus {
                prefix: m.key().clone(),
                description: m.description.clone(),
                state: m.state,
                tools: m.tools,
                error: None,
            })
            .chain(self.failures.iter().map(|f| f.value().clone()))
            .collect();
        statuses.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        statuses
    }

    /// Number of live mounts
    #[must_use]
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Whether nothing is mounted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    fn set_state(&self, prefix: &str, state: MountState) {
        if let Some(mut mount) = self.mounts.get_mut(prefix) {
            debug!(prefix = %prefix, from = ?mount.state, to = ?state, "Mount state change");
            mount.state = state;
        }
    }
}
