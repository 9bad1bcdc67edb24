//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Container build and launch settings
    pub container: ContainerConfig,
    /// Routing and listing behaviour
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_CONTAINER_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in path-like values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.database.path = expand_home(&Self::expand_string(&re, &self.database.path));
        self.container.runtime = Self::expand_string(&re, &self.container.runtime);
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` database file
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.mcp-container-gateway/gateway.db".to_string(),
        }
    }
}

/// Container build and launch settings
///
/// Resource limits apply identically to every sub-server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container CLI binary (`docker`, `podman`, ...)
    pub runtime: String,
    /// Prefix for image tags and container names
    pub image_prefix: String,
    /// Memory ceiling passed to `--memory`
    pub memory_limit: String,
    /// CPU ceiling passed to `--cpus`
    pub cpu_limit: String,
    /// Upper bound for one image build
    #[serde(with = "humantime_serde")]
    pub build_timeout: Duration,
    /// Upper bound for container start + protocol handshake
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound for one request to a sub-server
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Base image for JS package sub-servers
    pub node_base_image: String,
    /// Base image for Python package sub-servers
    pub python_base_image: String,
    /// Base image for custom sub-servers
    pub custom_base_image: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image_prefix: "mcp-subserver".to_string(),
            memory_limit: "512m".to_string(),
            cpu_limit: "1.0".to_string(),
            build_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            node_base_image: "node:20-slim".to_string(),
            python_base_image: "python:3.12-slim".to_string(),
            custom_base_image: "debian:bookworm-slim".to_string(),
        }
    }
}

/// Routing and listing behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// TTL for cached resource/prompt/tool listings
    #[serde(with = "humantime_serde")]
    pub listing_cache_ttl: Duration,
    /// Reject `tools/call` for tools an administrator disabled
    pub block_disabled_calls: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listing_cache_ttl: Duration::from_secs(30),
            block_disabled_calls: false,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 39500);
        assert_eq!(config.container.runtime, "docker");
        assert_eq!(config.container.memory_limit, "512m");
        assert!(!config.gateway.block_disabled_calls);
    }

    #[test]
    fn yaml_overrides_nested_sections() {
        let yaml = r#"
server:
  port: 40001
container:
  runtime: podman
  build_timeout: 5m
  connect_timeout: 1500ms
gateway:
  block_disabled_calls: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 40001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.container.runtime, "podman");
        assert_eq!(config.container.build_timeout, Duration::from_secs(300));
        assert_eq!(config.container.connect_timeout, Duration::from_millis(1500));
        assert!(config.gateway.block_disabled_calls);
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "database:\n  path: /tmp/mcg-test.db\ncontainer:\n  memory_limit: 1g").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.database.path, "/tmp/mcg-test.db");
        assert_eq!(config.container.memory_limit, "1g");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/gateway.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn expand_string_uses_default() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let value = Config::expand_string(&re, "${MCG_TEST_SURELY_UNSET:-/var/lib/gw}/db");
        assert_eq!(value, "/var/lib/gw/db");
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }
}
