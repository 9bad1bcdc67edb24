//! Gateway core primitives
//!
//! Every component that exposes or matches a sub-server tool under the
//! gateway namespace goes through [`prefixed_name`]. The router uses it when
//! listing mounted tools; the listing filter uses it when matching disabled
//! tool records. Keeping the rule in one place is what makes those two
//! agree.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between a server id and a tool name.
pub const PREFIX_SEPARATOR: char = '_';

/// Build the gateway-facing name of a tool: `{server_id}_{tool_name}`.
#[must_use]
pub fn prefixed_name(server_id: &str, tool_name: &str) -> String {
    format!("{server_id}{PREFIX_SEPARATOR}{tool_name}")
}

/// Strip `{server_id}_` from a prefixed name.
///
/// Returns `None` when the name does not carry that server's prefix or
/// when nothing remains after it.
#[must_use]
pub fn strip_server_prefix<'a>(server_id: &str, name: &'a str) -> Option<&'a str> {
    name.strip_prefix(server_id)
        .and_then(|rest| rest.strip_prefix(PREFIX_SEPARATOR))
        .filter(|rest| !rest.is_empty())
}

/// Name and description of one tool as reported by a sub-server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Unprefixed tool name
    pub name: String,
    /// Tool description (empty when the sub-server omits it)
    #[serde(default)]
    pub description: String,
}

impl ToolInfo {
    /// Create a tool info pair
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Extract name/description from a raw tool descriptor.
    ///
    /// A descriptor without a non-empty string `name` is malformed and
    /// yields `None`. A missing or non-string description becomes empty.
    #[must_use]
    pub fn from_descriptor(descriptor: &Value) -> Option<Self> {
        let name = descriptor
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.trim().is_empty())?;
        let description = descriptor
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(Self::new(name, description))
    }
}
