use std::path::PathBuf;

/// Errors that can occur across Atlas.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary converts to `miette::Report` at the boundary and the
/// MCP server folds it into an `{"error": ...}` payload.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasError;
///
/// let err = AtlasError::InvalidInput("query is empty".into());
/// assert!(err.to_string().contains("query is empty"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AtlasError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(atlas::config), help("check the values in .atlas.toml"))]
    Config(String),

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Tag or map cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// The tokenizer could not be loaded.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Caller supplied an argument that cannot be used.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file or directory was not found.
    #[error("not found: {}", .0.display())]
    #[diagnostic(code(atlas::not_found))]
    FileNotFound(PathBuf),
}
