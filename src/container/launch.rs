//! Launch specifications for sub-server containers

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use super::image_tag_for;
use crate::config::ContainerConfig;
use crate::store::SubServerConfig;

/// Everything needed to spawn one sub-server container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Owning sub-server id (mount prefix)
    pub server_id: String,
    /// Container runtime binary
    pub runtime: String,
    /// Image reference
    pub image: String,
    /// Per-run unique container name
    pub container_name: String,
    /// Memory ceiling, e.g. `512m`
    pub memory_limit: String,
    /// CPU ceiling, e.g. `1.0`
    pub cpu_limit: String,
    /// Injected environment, in declaration order
    pub env: Vec<(String, String)>,
    /// Parsed start command, run after the image reference
    pub command: Vec<String>,
}

impl LaunchSpec {
    /// Full argv: runtime binary first.
    ///
    /// Always `--rm`, `--init` and `-i`. Never `-t`: a pseudo-terminal mangles
    /// line-framed JSON-RPC.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.runtime.clone(),
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--init".to_string(),
            "--memory".to_string(),
            self.memory_limit.clone(),
            "--cpus".to_string(),
            self.cpu_limit.clone(),
            "--name".to_string(),
            self.container_name.clone(),
        ];
        for (key, value) in &self.env {
            argv.push("-e".to_string());
            argv.push(format!("{key}={value}"));
        }
        argv.push(self.image.clone());
        argv.extend(self.command.iter().cloned());
        argv
    }

    /// Shell-quoted command line for logs, with environment values masked
    #[must_use]
    pub fn to_command_line(&self) -> String {
        let masked = Self {
            env: self
                .env
                .iter()
                .map(|(k, _)| (k.clone(), "***".to_string()))
                .collect(),
            ..self.clone()
        };
        let argv = masked.argv();
        shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
    }
}

/// Translate a configuration into a launch spec.
///
/// Returns `None`, with a warning, when the start command cannot be split
/// into an argument vector. The image reference is the deterministic tag
/// for the id, so an unbuilt configuration still translates.
#[must_use]
pub fn translate(config: &SubServerConfig, container: &ContainerConfig) -> Option<LaunchSpec> {
    let Some(command) = shlex::split(config.start_command.trim()) else {
        warn!(
            server = %config.id,
            start_command = %config.start_command,
            "Start command has unbalanced quoting"
        );
        return None;
    };
    if command.is_empty() {
        warn!(server = %config.id, "Start command is empty");
        return None;
    }

    let image = config
        .image_tag
        .clone()
        .unwrap_or_else(|| image_tag_for(&container.image_prefix, &config.id));
    let run_id = uuid::Uuid::new_v4().simple().to_string();

    Some(LaunchSpec {
        server_id: config.id.clone(),
        runtime: container.runtime.clone(),
        image,
        container_name: format!("{}-{}-{}", container.image_prefix, config.id, &run_id[..8]),
        memory_limit: container.memory_limit.clone(),
        cpu_limit: container.cpu_limit.clone(),
        env: config
            .environment
            .iter()
            .filter(|e| e.has_value())
            .map(|e| (e.key.trim().to_string(), e.value.clone()))
            .collect(),
        command,
    })
}

/// Force-remove a container by name; failures are only logged.
///
/// Used after closing a transport, since killing the runtime client does not
/// always stop the container it started.
pub async fn remove_container(runtime: &str, container_name: &str) {
    let result = Command::new(runtime)
        .args(["rm", "-f", container_name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {
            debug!(container = %container_name, "Container removed");
        }
        Ok(status) => {
            debug!(container = %container_name, %status, "Container already gone");
        }
        Err(e) => {
            warn!(container = %container_name, error = %e, "Failed to remove container");
        }
    }
}
