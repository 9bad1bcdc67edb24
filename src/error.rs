//! Error types for the container gateway

use std::io;

use thiserror::Error;

/// Result type alias for the container gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Container gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (malformed start command, missing fields, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Container image build failed
    #[error("Build failed for {config_id}: {message}")]
    Build {
        /// Sub-server the build belonged to
        config_id: String,
        /// Build tool output or failure reason
        message: String,
    },

    /// Container failed to start or the transport handshake failed
    #[error("Connection to {server} failed: {message}")]
    Connection {
        /// Owning sub-server id
        server: String,
        /// Failure reason
        message: String,
    },

    /// Storage failure during a tool replace-set
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Backend (mount) not found
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Backend timeout
    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a connection error for a sub-server
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a build error for a sub-server
    pub fn build(config_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            config_id: config_id.into(),
            message: message.into(),
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) | Self::Config(_) => rpc_codes::INVALID_REQUEST,
            Self::BackendNotFound(_) => -32001,
            Self::Connection { .. }
            | Self::BackendTimeout(_)
            | Self::Build { .. } => rpc_codes::SERVER_ERROR_START,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Server error range end
    pub const SERVER_ERROR_END: i32 = -32099;
}
