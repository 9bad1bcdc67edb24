//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP gateway for containerized stdio tool-servers
#[derive(Parser, Debug)]
#[command(name = "mcp-container-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_CONTAINER_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_CONTAINER_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_CONTAINER_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_CONTAINER_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_CONTAINER_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Rebuild the image for one stored sub-server and record the outcome
    Build {
        /// Sub-server id
        id: String,
    },

    /// List stored sub-server configurations with their build status
    Servers {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// List stored tool records for one sub-server
    Tools {
        /// Sub-server id
        id: String,
    },
}
