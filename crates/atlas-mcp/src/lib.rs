//! MCP server exposing Atlas repository maps to IDEs and agents.
//!
//! Implements a Model Context Protocol server using rmcp that exposes
//! `repo_map` and `search_identifiers` over stdio transport. Parsing and
//! ranking run on blocking worker threads so the dispatcher stays responsive.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), atlas_core::AtlasError> {
//! atlas_mcp::server::run_server(PathBuf::from(".")).await?;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod tools;
