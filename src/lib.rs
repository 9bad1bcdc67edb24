//! MCP Container Gateway
//!
//! Aggregates containerized stdio MCP servers behind one JSON-RPC endpoint.
//! Every sub-server runs in its own container, is mounted under its short
//! id, and exposes its tools as `{server_id}_{tool_name}`.
//!
//! # Components
//!
//! - **Image builder**: one image per sub-server, tagged by id
//! - **Launch translator**: configuration to `docker run --rm -i --init ...`
//! - **Proxy client**: lazily connected line-framed stdio JSON-RPC client
//! - **Mount registry**: the only writer of the router's routing tables
//! - **Tool discovery**: catalog query plus transactional replace-set
//! - **Tool filter**: hides administrator-disabled tools from `tools/list`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod provider;
pub mod store;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level`; `format` selects `json` or plain text.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Tracing already initialized: {e}")))
}
