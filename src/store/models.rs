//! Persisted sub-server and tool records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gateway_core::prefixed_name;
use serde::{Deserialize, Serialize};

use crate::Error;

/// How a sub-server is packaged and therefore which base image it builds on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Interpreted JS package (npm/npx)
    Node,
    /// Interpreted Python package (pip/uv)
    Python,
    /// Anything else; install command runs on a plain base image
    Custom,
}

impl RuntimeKind {
    /// Storage representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(Self::Node),
            "python" => Ok(Self::Python),
            "custom" => Ok(Self::Custom),
            other => Err(Error::Config(format!("Unknown runtime kind: {other}"))),
        }
    }
}

/// Image build progress: `pending → building → {built | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Never built
    Pending,
    /// Build in progress
    Building,
    /// Image available under `image_tag`
    Built,
    /// Last build failed; see `build_error`
    Failed,
}

impl BuildStatus {
    /// Storage representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Built => "built",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "building" => Ok(Self::Building),
            "built" => Ok(Self::Built),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Config(format!("Unknown build status: {other}"))),
        }
    }
}

/// One declared environment variable.
///
/// Only declarations with a non-empty value are injected at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvDeclaration {
    /// Variable name
    pub key: String,
    /// Value; empty means "declared but not provided"
    #[serde(default)]
    pub value: String,
    /// What the variable is for
    #[serde(default)]
    pub description: String,
}

impl EnvDeclaration {
    /// Whether this declaration should be injected into the container
    #[must_use]
    pub fn has_value(&self) -> bool {
        !self.key.trim().is_empty() && !self.value.is_empty()
    }
}

/// A backend tool-server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubServerConfig {
    /// Short opaque id; also the mount prefix
    pub id: String,
    /// Unique display name
    pub name: String,
    /// Origin URL or package reference
    pub source_reference: String,
    /// Human-readable description
    pub description: String,
    /// Packaging kind
    pub runtime_kind: RuntimeKind,
    /// Install command, run at image build time
    pub install_command: String,
    /// Start command, run as the container command
    pub start_command: String,
    /// Declared environment, in declaration order
    pub environment: Vec<EnvDeclaration>,
    /// Mount on next start
    pub is_active: bool,
    /// Image build progress
    pub build_status: BuildStatus,
    /// Last build failure
    pub build_error: Option<String>,
    /// Tag of the last successful build
    pub image_tag: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl SubServerConfig {
    /// Copy safe to show outside the process: provided environment values
    /// are replaced by `***`, empty ones stay empty.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let environment = self
            .environment
            .iter()
            .map(|decl| EnvDeclaration {
                value: if decl.value.is_empty() {
                    String::new()
                } else {
                    "***".to_string()
                },
                ..decl.clone()
            })
            .collect();
        Self {
            environment,
            ..self.clone()
        }
    }
}

/// Input for creating a sub-server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubServer {
    /// Unique display name
    pub name: String,
    /// Origin URL or package reference
    #[serde(default)]
    pub source_reference: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Packaging kind
    pub runtime_kind: RuntimeKind,
    /// Install command
    #[serde(default)]
    pub install_command: String,
    /// Start command
    pub start_command: String,
    /// Declared environment
    #[serde(default)]
    pub environment: Vec<EnvDeclaration>,
    /// Mount on next start
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewSubServer {
    /// Check required fields before anything is persisted
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Sub-server name is required".to_string()));
        }
        if self.start_command.trim().is_empty() {
            return Err(Error::Config("Start command is required".to_string()));
        }
        Ok(())
    }
}

/// One tool exposed by one sub-server, with its administrator switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Row id; administrative actions are keyed by this
    pub id: i64,
    /// Owning sub-server
    pub server_id: String,
    /// Unprefixed name as reported by the sub-server
    pub tool_name: String,
    /// Description as reported by the sub-server
    pub tool_description: String,
    /// Administrator switch
    pub is_enabled: bool,
    /// Discovery time
    pub created_at: DateTime<Utc>,
}

impl ToolRecord {
    /// Gateway-facing name of this tool
    #[must_use]
    pub fn prefixed_name(&self) -> String {
        prefixed_name(&self.server_id, &self.tool_name)
    }
}
