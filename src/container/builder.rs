//! Image builds through the container runtime CLI

use std::fmt::Write as _;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::store::{BuildStatus, RuntimeKind, Store, SubServerConfig};
use crate::{Error, Result};

/// Bytes of build output kept in a stored build error
const MAX_ERROR_OUTPUT: usize = 4096;

/// Deterministic image tag for a sub-server id.
///
/// Rebuilding the same id always overwrites the same tag.
#[must_use]
pub fn image_tag_for(image_prefix: &str, server_id: &str) -> String {
    format!("{image_prefix}-{server_id}:latest").to_lowercase()
}

/// Render the Dockerfile for a configuration.
///
/// Multi-line install commands are chained with `&&` into one layer.
#[must_use]
pub fn dockerfile_for(config: &SubServerConfig, container: &ContainerConfig) -> String {
    let mut dockerfile = String::new();
    let base = match config.runtime_kind {
        RuntimeKind::Node => &container.node_base_image,
        RuntimeKind::Python => &container.python_base_image,
        RuntimeKind::Custom => &container.custom_base_image,
    };
    let _ = writeln!(dockerfile, "FROM {base}");
    if config.runtime_kind == RuntimeKind::Python {
        dockerfile.push_str("RUN pip install --no-cache-dir uv\n");
    }
    dockerfile.push_str("WORKDIR /app\n");

    let install = config
        .install_command
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" && ");
    if !install.is_empty() {
        let _ = writeln!(dockerfile, "RUN {install}");
    }
    dockerfile
}

/// Keep the tail of build output; the failure is almost always at the end
fn tail(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= MAX_ERROR_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_ERROR_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// Builds sub-server images with `{runtime} build -t {tag} -`
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    container: ContainerConfig,
}

impl ImageBuilder {
    /// Create a builder for the configured runtime
    #[must_use]
    pub fn new(container: ContainerConfig) -> Self {
        Self { container }
    }

    /// Tag the image for `server_id` is (or will be) built under
    #[must_use]
    pub fn tag_for(&self, server_id: &str) -> String {
        image_tag_for(&self.container.image_prefix, server_id)
    }

    /// Build the image for one configuration and return its tag.
    ///
    /// Long-running; bounded by `build_timeout`. The Dockerfile is streamed
    /// over stdin with an empty build context.
    pub async fn build(&self, config: &SubServerConfig) -> Result<String> {
        let tag = self.tag_for(&config.id);
        let dockerfile = dockerfile_for(config, &self.container);
        let started = Instant::now();

        info!(
            server = %config.id,
            tag = %tag,
            runtime = %self.container.runtime,
            "Building image (this may take a while)"
        );
        debug!(server = %config.id, dockerfile = %dockerfile, "Generated Dockerfile");

        let mut child = Command::new(&self.container.runtime)
            .args(["build", "-t", &tag, "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::build(
                    &config.id,
                    format!("Failed to run {}: {e}", self.container.runtime),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A runtime that exits early closes the pipe; its exit status decides.
            if let Err(e) = stdin.write_all(dockerfile.as_bytes()).await {
                debug!(server = %config.id, error = %e, "Build stdin closed early");
            }
            drop(stdin);
        }

        let output =
            match tokio::time::timeout(self.container.build_timeout, child.wait_with_output())
                .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(Error::build(&config.id, e.to_string())),
                Err(_) => {
                    return Err(Error::build(
                        &config.id,
                        format!(
                            "Build timed out after {}s",
                            self.container.build_timeout.as_secs()
                        ),
                    ));
                }
            };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("{} build exited with {}", self.container.runtime, output.status)
            } else {
                tail(&stderr)
            };
            return Err(Error::build(&config.id, message));
        }

        info!(
            server = %config.id,
            tag = %tag,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image built"
        );
        Ok(tag)
    }
}

/// Build one configuration and record the outcome on its stored row.
///
/// `building` is recorded first; then `built` with the tag, or `failed` with
/// the error text. The build error is also returned to the caller.
pub async fn build_and_record(
    store: &Store,
    builder: &ImageBuilder,
    config: &SubServerConfig,
) -> Result<String> {
    store
        .set_build_status(&config.id, BuildStatus::Building, None, None)
        .await?;

    match builder.build(config).await {
        Ok(tag) => {
            store
                .set_build_status(&config.id, BuildStatus::Built, None, Some(&tag))
                .await?;
            Ok(tag)
        }
        Err(e) => {
            let message = match &e {
                Error::Build { message, .. } => message.clone(),
                other => other.to_string(),
            };
            warn!(server = %config.id, error = %message, "Image build failed");
            store
                .set_build_status(&config.id, BuildStatus::Failed, Some(&message), None)
                .await?;
            Err(e)
        }
    }
}
