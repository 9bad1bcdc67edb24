//! MCP Protocol types

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP Protocol version spoken to sub-servers and offered to clients
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions the gateway accepts from clients, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Pick the protocol version to answer an `initialize` with.
///
/// A supported client version is echoed back; anything else gets the latest.
#[must_use]
pub fn negotiate_version(client_version: Option<&str>) -> &'static str {
    client_version
        .and_then(|v| SUPPORTED_VERSIONS.iter().find(|s| **s == v).copied())
        .unwrap_or(PROTOCOL_VERSION)
}
