//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which starts the stdio-based MCP server,
//! registering the Atlas tools and blocking until the client disconnects.

use std::path::PathBuf;

use atlas_core::AtlasError;
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};

use crate::tools::AtlasServer;

const SERVER_INSTRUCTIONS: &str = "\
Atlas builds ranked, token-budgeted maps of a repository. Use these tools to orient in a codebase:\n\
- repo_map: Get the most important definitions across the project, fitted to a token budget\n\
- search_identifiers: Find where an identifier is defined and used, with surrounding lines";

#[tool_handler]
impl ServerHandler for AtlasServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "atlas".to_string(),
                title: Some("Atlas Repository Map".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Token-budgeted, relevance-ranked repository maps".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `atlas mcp` CLI subcommand. It blocks until the
/// client closes stdin, then closes every project cache it opened.
///
/// # Errors
///
/// Returns [`AtlasError`] if the server fails to initialize or encounters
/// a transport error.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
///
/// # async fn example() -> Result<(), atlas_core::AtlasError> {
/// atlas_mcp::server::run_server(PathBuf::from(".")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server(default_root: PathBuf) -> Result<(), AtlasError> {
    let server = AtlasServer::new(default_root);
    let handle = server.clone();
    tracing::info!("starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| AtlasError::Config(format!("MCP server failed to start: {e}")))?;

    let outcome = service
        .waiting()
        .await
        .map_err(|e| AtlasError::Config(format!("MCP server error: {e}")));

    handle.shutdown();
    outcome?;
    Ok(())
}
