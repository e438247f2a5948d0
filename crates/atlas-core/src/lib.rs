//! Core types, configuration, and error handling for Atlas.
//!
//! This crate provides the shared foundation used by the other Atlas crates:
//! - [`AtlasError`]: unified error type using `thiserror` and `miette`
//! - [`AtlasConfig`]: configuration loaded from `.atlas.toml`
//! - Shared types: [`FileReport`], [`IdentifierMatch`], [`TagKind`],
//!   [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    AtlasConfig, CacheConfig, FilesConfig, MapConfig, RankingConfig, CONFIG_FILE_NAME,
};
pub use error::AtlasError;
pub use types::{FileReport, IdentifierMatch, OutputFormat, TagKind};

/// A convenience `Result` type for Atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;
