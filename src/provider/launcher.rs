//! Docker-backed launcher

use std::sync::Arc;

use super::{Launcher, Provider, ProxyClient};
use crate::config::ContainerConfig;
use crate::container::translate;
use crate::store::SubServerConfig;
use crate::transport::TransportTimeouts;
use crate::{Error, Result};

/// Launches sub-servers as containers through the configured runtime CLI
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    container: ContainerConfig,
}

impl DockerLauncher {
    /// Create a launcher with the given container settings
    #[must_use]
    pub fn new(container: ContainerConfig) -> Self {
        Self { container }
    }
}

impl Launcher for DockerLauncher {
    fn launch(&self, config: &SubServerConfig) -> Result<Arc<dyn Provider>> {
        let spec = translate(config, &self.container).ok_or_else(|| {
            Error::Config(format!(
                "Start command for {} cannot be parsed: {}",
                config.id, config.start_command
            ))
        })?;

        let timeouts = TransportTimeouts {
            connect: self.container.connect_timeout,
            request: self.container.request_timeout,
        };
        Ok(Arc::new(ProxyClient::new(spec, timeouts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BuildStatus, RuntimeKind};
    use chrono::Utc;

    fn config(start: &str) -> SubServerConfig {
        SubServerConfig {
            id: "abc12345".to_string(),
            name: "calc".to_string(),
            source_reference: String::new(),
            description: String::new(),
            runtime_kind: RuntimeKind::Python,
            install_command: String::new(),
            start_command: start.to_string(),
            environment: Vec::new(),
            is_active: true,
            build_status: BuildStatus::Built,
            build_error: None,
            image_tag: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn launch_names_provider_after_prefix() {
        let launcher = DockerLauncher::new(ContainerConfig::default());
        let provider = launcher.launch(&config("python -m calc")).unwrap();
        assert_eq!(provider.name(), "abc12345");
    }

    #[test]
    fn unparseable_start_command_is_config_error() {
        let launcher = DockerLauncher::new(ContainerConfig::default());
        let Err(err) = launcher.launch(&config("python 'unterminated")) else {
            panic!("launch should fail");
        };
        assert!(matches!(err, Error::Config(_)));
    }
}
