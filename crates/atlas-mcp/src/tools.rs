//! Tool implementations for the Atlas MCP server.
//!
//! Two tools are exposed: `repo_map` and `search_identifiers`. Domain failures
//! (a missing project root, a blank query) come back as a JSON body of the form
//! `{"error": "..."}` rather than as protocol errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use atlas_core::{AtlasError, IdentifierMatch};
use atlas_repomap::search::SearchOptions;
use atlas_repomap::{RepoMapOutput, RepoMapRequest, RepoMapper};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};

/// MCP server exposing Atlas map and search tools.
///
/// One [`RepoMapper`] is kept per project root, so each root's cache is
/// opened once and shared by every request against it.
///
/// # Examples
///
/// ```
/// use atlas_mcp::tools::AtlasServer;
/// use std::path::PathBuf;
///
/// let server = AtlasServer::new(PathBuf::from("."));
/// ```
#[derive(Clone)]
pub struct AtlasServer {
    pub(crate) default_root: PathBuf,
    mappers: Arc<Mutex<BTreeMap<PathBuf, Arc<RepoMapper>>>>,
    pub(crate) tool_router: ToolRouter<Self>,
}

// --- Parameter structs ---

/// Parameters for the `repo_map` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct RepoMapParams {
    /// Absolute project root (default: the server's configured root).
    pub project_root: Option<String>,
    /// Files already in the conversation. They get the highest ranking boost
    /// and are left out of the map.
    pub chat_files: Option<Vec<String>>,
    /// Files to consider, relative to the project root. The whole root is
    /// scanned when omitted.
    pub other_files: Option<Vec<String>>,
    /// Token budget for the map (default: 2048). Numbers and numeric strings
    /// are accepted; anything else falls back to the default.
    pub token_limit: Option<serde_json::Value>,
    /// Leave out definitions that nothing references (default: false).
    pub exclude_unranked: Option<bool>,
    /// Ignore cached results (default: false).
    pub force_refresh: Option<bool>,
    /// Files mentioned in the conversation, given a mid-level boost.
    pub mentioned_files: Option<Vec<String>>,
    /// Identifiers mentioned in the conversation, boosted wherever referenced.
    pub mentioned_idents: Option<Vec<String>>,
    /// Caller's context window; widens the budget when there are no chat files.
    pub max_context_window: Option<usize>,
}

/// Parameters for the `search_identifiers` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct SearchIdentifiersParams {
    /// Absolute project root (default: the server's configured root).
    pub project_root: Option<String>,
    /// Identifier name or fragment, matched case-insensitively.
    pub query: String,
    /// Maximum results (default: 50).
    pub max_results: Option<usize>,
    /// Lines of context on each side of a hit (default: 2).
    pub context_lines: Option<u32>,
    /// Include definitions (default: true).
    pub include_definitions: Option<bool>,
    /// Include references (default: true).
    pub include_references: Option<bool>,
}

// --- Response structs ---

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<IdentifierMatch>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| mcp_err(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn error_result(context: &str, error: &AtlasError) -> Result<CallToolResult, McpError> {
    tracing::warn!(error = %error, "{context}");
    json_result(&ErrorResponse {
        error: format!("{context}: {error}"),
    })
}

#[tool_router]
impl AtlasServer {
    /// Create a new server that resolves relative roots against `default_root`.
    pub fn new(default_root: PathBuf) -> Self {
        Self {
            default_root,
            mappers: Arc::new(Mutex::new(BTreeMap::new())),
            tool_router: Self::tool_router(),
        }
    }

    fn mappers(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Arc<RepoMapper>>> {
        self.mappers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn resolve_root(&self, project_root: Option<&str>) -> PathBuf {
        match project_root.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
            Some(p) => self.default_root.join(p),
            None => self.default_root.clone(),
        }
    }

    /// The mapper for `root`, opening its cache on first use.
    pub(crate) fn mapper_for(&self, root: &Path) -> Result<Arc<RepoMapper>, AtlasError> {
        let root = atlas_repomap::canonical_root(root)?;
        if let Some(mapper) = self.mappers().get(&root) {
            return Ok(Arc::clone(mapper));
        }

        // Opened outside the lock; a racing request may open the same root
        // and the first insert wins.
        let opened = Arc::new(RepoMapper::open(&root)?);
        tracing::info!(root = %root.display(), "opened project");
        let mut mappers = self.mappers();
        let mapper = mappers.entry(root).or_insert(opened);
        Ok(Arc::clone(mapper))
    }

    /// Number of project roots with an open cache.
    pub fn open_projects(&self) -> usize {
        self.mappers().len()
    }

    /// Close every project cache. Caches still in use by a running request
    /// are released when that request finishes.
    pub fn shutdown(&self) {
        let mappers = std::mem::take(&mut *self.mappers());
        for (root, mapper) in mappers {
            let Ok(mapper) = Arc::try_unwrap(mapper) else {
                continue;
            };
            if let Ok(cache) = Arc::try_unwrap(mapper.into_cache()) {
                if let Err(e) = cache.close() {
                    tracing::warn!(root = %root.display(), error = %e, "failed to close cache");
                }
            }
        }
    }

    fn run_repo_map(&self, params: RepoMapParams) -> Result<RepoMapOutput, AtlasError> {
        let root = self.resolve_root(params.project_root.as_deref());
        if !root.is_dir() {
            return Err(AtlasError::FileNotFound(root));
        }
        let mapper = self.mapper_for(&root)?;
        let default_limit = mapper.config().map.token_limit;
        let request = RepoMapRequest {
            chat_files: params.chat_files.unwrap_or_default(),
            other_files: params.other_files.unwrap_or_default(),
            token_limit: Some(atlas_repomap::parse_token_limit(
                params.token_limit.as_ref(),
                default_limit,
            )),
            exclude_unranked: params.exclude_unranked.unwrap_or(false),
            force_refresh: params.force_refresh.unwrap_or(false),
            mentioned_files: params.mentioned_files.unwrap_or_default(),
            mentioned_idents: params.mentioned_idents.unwrap_or_default(),
            max_context_window: params.max_context_window,
        };
        mapper.repo_map(&request)
    }

    fn run_search(
        &self,
        params: SearchIdentifiersParams,
    ) -> Result<Vec<IdentifierMatch>, AtlasError> {
        let root = self.resolve_root(params.project_root.as_deref());
        if !root.is_dir() {
            return Err(AtlasError::FileNotFound(root));
        }
        let defaults = SearchOptions::default();
        let options = SearchOptions {
            max_results: params.max_results.unwrap_or(defaults.max_results),
            context_lines: params.context_lines.unwrap_or(defaults.context_lines),
            include_definitions: params
                .include_definitions
                .unwrap_or(defaults.include_definitions),
            include_references: params
                .include_references
                .unwrap_or(defaults.include_references),
        };
        self.mapper_for(&root)?
            .search_identifiers(&params.query, &options)
    }

    #[tool(
        name = "repo_map",
        description = "Generate a repository map: the most important function, class and variable definitions across the project, ranked by how the files reference each other and fitted to a token budget. Provide file names relative to the project root. Chat files get the highest ranking boost and are left out of the map; mentioned files and identifiers get a smaller boost. Returns the map and a report of included and excluded files."
    )]
    pub async fn repo_map(
        &self,
        Parameters(params): Parameters<RepoMapParams>,
    ) -> Result<CallToolResult, McpError> {
        let server = self.clone();
        let outcome = tokio::task::spawn_blocking(move || server.run_repo_map(params))
            .await
            .map_err(|e| mcp_err(format!("repo_map task failed: {e}")))?;

        match outcome {
            Ok(output) => json_result(&output),
            Err(e) => error_result("Error generating repository map", &e),
        }
    }

    #[tool(
        name = "search_identifiers",
        description = "Search for identifiers in code files by name, case-insensitively. Use the bare identifier without prefixes or punctuation. Definitions are listed before references, and each result includes its file, line, kind and surrounding lines."
    )]
    pub async fn search_identifiers(
        &self,
        Parameters(params): Parameters<SearchIdentifiersParams>,
    ) -> Result<CallToolResult, McpError> {
        let server = self.clone();
        let outcome = tokio::task::spawn_blocking(move || server.run_search(params))
            .await
            .map_err(|e| mcp_err(format!("search_identifiers task failed: {e}")))?;

        match outcome {
            Ok(results) => json_result(&SearchResponse { results }),
            Err(e) => error_result("Error searching identifiers", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn resolve_root_joins_relative_paths() {
        let server = AtlasServer::new(PathBuf::from("/srv/repo"));
        assert_eq!(server.resolve_root(Some("sub")), PathBuf::from("/srv/repo/sub"));
        assert_eq!(server.resolve_root(Some("/other")), PathBuf::from("/other"));
        assert_eq!(server.resolve_root(Some("  ")), PathBuf::from("/srv/repo"));
        assert_eq!(server.resolve_root(None), PathBuf::from("/srv/repo"));
    }

    #[test]
    fn mapper_is_reused_per_root() {
        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("a.py"), "def a():\n    pass\n").unwrap();

        let server = AtlasServer::new(repo.path().to_path_buf());
        let first = server.mapper_for(repo.path()).unwrap();
        let second = server.mapper_for(&repo.path().join(".")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(server.open_projects(), 1);
    }

    #[test]
    fn shutdown_releases_projects() {
        let repo = tempfile::tempdir().unwrap();
        let server = AtlasServer::new(repo.path().to_path_buf());
        drop(server.mapper_for(repo.path()).unwrap());
        server.shutdown();
        assert_eq!(server.open_projects(), 0);
    }

    #[test]
    fn missing_root_is_reported() {
        let repo = tempfile::tempdir().unwrap();
        let server = AtlasServer::new(repo.path().to_path_buf());
        let err = server
            .run_repo_map(RepoMapParams {
                project_root: Some(repo.path().join("missing").display().to_string()),
                ..RepoMapParams::default()
            })
            .unwrap_err();
        assert!(matches!(err, AtlasError::FileNotFound(_)));
    }
}
