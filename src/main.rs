//! MCP Container Gateway
//!
//! Mounts containerized stdio MCP servers under one prefixed namespace.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_container_gateway::{
    cli::{Cli, Command},
    config::Config,
    container::{ImageBuilder, build_and_record},
    gateway::Gateway,
    setup_tracing,
    store::{Store, SubServerConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Build { id }) => run_build(&config, &id).await,
        Some(Command::Servers { format }) => run_servers(&config, &format).await,
        Some(Command::Tools { id }) => run_tools(&config, &id).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

async fn open_store(config: &Config) -> Option<Store> {
    match Store::open(Path::new(&config.database.path)).await {
        Ok(store) => Some(store),
        Err(e) => {
            error!(path = %config.database.path, "Failed to open database: {e}");
            None
        }
    }
}

/// Rebuild one image
async fn run_build(config: &Config, id: &str) -> ExitCode {
    let Some(store) = open_store(config).await else {
        return ExitCode::FAILURE;
    };
    let server = match store.get_server(id).await {
        Ok(Some(server)) => server,
        Ok(None) => {
            eprintln!("No sub-server with id {id}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to load sub-server: {e}");
            return ExitCode::FAILURE;
        }
    };

    let builder = ImageBuilder::new(config.container.clone());
    match build_and_record(&store, &builder, &server).await {
        Ok(tag) => {
            println!("Built {} ({}) as {tag}", server.id, server.name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Build failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print stored configurations
async fn run_servers(config: &Config, format: &str) -> ExitCode {
    let Some(store) = open_store(config).await else {
        return ExitCode::FAILURE;
    };
    let servers = match store.list_servers().await {
        Ok(servers) => servers,
        Err(e) => {
            error!("Failed to list sub-servers: {e}");
            return ExitCode::FAILURE;
        }
    };

    if format == "json" {
        let shown: Vec<_> = servers.iter().map(SubServerConfig::redacted).collect();
        return match serde_json::to_string_pretty(&shown) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize to JSON: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if servers.is_empty() {
        println!("No sub-servers configured.");
        return ExitCode::SUCCESS;
    }
    println!("{:<10} {:<24} {:<8} {:<9} {:<7} IMAGE", "ID", "NAME", "RUNTIME", "BUILD", "ACTIVE");
    for server in &servers {
        println!(
            "{:<10} {:<24} {:<8} {:<9} {:<7} {}",
            server.id,
            server.name,
            server.runtime_kind.as_str(),
            server.build_status.as_str(),
            server.is_active,
            server.image_tag.as_deref().unwrap_or("-"),
        );
        if let Some(ref err) = server.build_error {
            println!("           error: {err}");
        }
    }
    ExitCode::SUCCESS
}

/// Print stored tool records for one server
async fn run_tools(config: &Config, id: &str) -> ExitCode {
    let Some(store) = open_store(config).await else {
        return ExitCode::FAILURE;
    };
    match store.tools_for_server(id).await {
        Ok(tools) if tools.is_empty() => {
            println!("No tools discovered yet for {id}.");
            ExitCode::SUCCESS
        }
        Ok(tools) => {
            for tool in &tools {
                let state = if tool.is_enabled { "enabled" } else { "disabled" };
                println!("{:>5}  {:<8}  {}  {}", tool.id, state, tool.tool_name, tool.tool_description);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to list tools: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        database = %config.database.path,
        runtime = %config.container.runtime,
        "Starting MCP Container Gateway"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
