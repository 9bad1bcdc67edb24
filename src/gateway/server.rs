//! Gateway server

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use super::discovery::ToolDiscovery;
use super::namespace::GatewayRouter;
use super::registry::{MountRegistry, MountStatus};
use super::router::{AppState, create_router};
use super::session::SessionStore;
use crate::config::Config;
use crate::container::{ImageBuilder, build_and_record};
use crate::provider::{DockerLauncher, Launcher};
use crate::store::{BuildStatus, Store, SubServerConfig};
use crate::{Error, Result};

/// MCP container gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared handler state
    state: Arc<AppState>,
}

impl Gateway {
    /// Open storage and wire the docker launcher
    pub async fn new(config: Config) -> Result<Self> {
        let store = Store::open(Path::new(&config.database.path)).await?;
        let launcher = Arc::new(DockerLauncher::new(config.container.clone()));
        Ok(Self::with_parts(config, store, launcher))
    }

    /// Assemble a gateway from an existing store and launcher
    #[must_use]
    pub fn with_parts(config: Config, store: Store, launcher: Arc<dyn Launcher>) -> Self {
        let router = Arc::new(GatewayRouter::new(store.clone(), &config.gateway));
        let registry = Arc::new(MountRegistry::new(
            router,
            launcher,
            ToolDiscovery::new(store.clone()),
        ));
        let state = Arc::new(AppState {
            store,
            builder: ImageBuilder::new(config.container.clone()),
            registry,
            sessions: SessionStore::new(),
            max_body_size: config.server.max_body_size,
        });
        Self { config, state }
    }

    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The axum application
    #[must_use]
    pub fn app(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Rebuild and mount every active configuration, one at a time.
    ///
    /// Images are always rebuilt: a recorded `built` status says nothing about
    /// whether the image still exists on this runtime. Builds are idempotent
    /// by tag. Failures are logged per server and never stop the others.
    /// Returns the number of servers mounted.
    pub async fn bootstrap(&self) -> Result<usize> {
        let servers = self.state.store.list_active_servers().await?;
        info!(count = servers.len(), "Mounting active sub-servers");

        let mut mounted = 0;
        for config in &servers {
            match provision(
                &self.state.store,
                &self.state.builder,
                &self.state.registry,
                config,
                true,
            )
            .await
            {
                Ok(status) => {
                    mounted += 1;
                    info!(server = %config.id, tools = status.tools, "Bootstrap mount ready");
                }
                Err(e) => warn!(server = %config.id, name = %config.name, error = %e, "Bootstrap mount failed"),
            }
        }
        Ok(mounted)
    }

    /// Run the gateway until Ctrl-C / SIGTERM, then stop every container
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let mounted = self.bootstrap().await?;
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MCP CONTAINER GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(mounts = mounted, runtime = %self.config.container.runtime, "Sub-servers mounted");
        info!(
            "  POST http://{}:{}/mcp  (requests)",
            self.config.server.host, self.config.server.port
        );
        info!(
            "  http://{}:{}/admin/servers  (administration)",
            self.config.server.host, self.config.server.port
        );
        info!("============================================================");

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Stopping sub-server containers...");
        let registry = Arc::clone(&self.state.registry);
        if tokio::time::timeout(self.config.server.shutdown_timeout, registry.shutdown_all())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.server.shutdown_timeout.as_secs(),
                "Timed out stopping sub-servers"
            );
        }

        Ok(())
    }
}

/// Build when needed, then mount.
///
/// With `force_build` the image is always rebuilt; otherwise only configs
/// without a recorded successful build are built. A build failure is
/// recorded on the config and returned before anything is mounted.
pub(crate) async fn provision(
    store: &Store,
    builder: &ImageBuilder,
    registry: &MountRegistry,
    config: &SubServerConfig,
    force_build: bool,
) -> Result<MountStatus> {
    let needs_build =
        force_build || config.build_status != BuildStatus::Built || config.image_tag.is_none();
    if !needs_build {
        return registry.add(config).await;
    }

    build_and_record(store, builder, config).await?;
    let built = store
        .get_server(&config.id)
        .await?
        .ok_or_else(|| Error::BackendNotFound(format!("Sub-server {}", config.id)))?;
    registry.add(&built).await
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
