use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AtlasError;

/// Name of the per-project configuration file.
pub const CONFIG_FILE_NAME: &str = ".atlas.toml";

/// Top-level configuration loaded from `.atlas.toml`.
///
/// Every field carries a serde default, so a partial file only overrides what
/// it names.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasConfig;
///
/// let config = AtlasConfig::default();
/// assert_eq!(config.map.token_limit, 2048);
/// assert_eq!(config.ranking.damping, 0.85);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    /// Map rendering and budget settings.
    #[serde(default)]
    pub map: MapConfig,
    /// Graph weighting and propagation settings.
    #[serde(default)]
    pub ranking: RankingConfig,
    /// File admission limits.
    #[serde(default)]
    pub files: FilesConfig,
    /// Persistent cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AtlasConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Io`] if the file cannot be read, or
    /// [`AtlasError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use atlas_core::AtlasConfig;
    /// use std::path::Path;
    ///
    /// let config = AtlasConfig::from_file(Path::new(".atlas.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, AtlasError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_core::AtlasConfig;
    ///
    /// let toml = r#"
    /// [ranking]
    /// damping = 0.9
    /// "#;
    /// let config = AtlasConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.ranking.damping, 0.9);
    /// assert_eq!(config.map.token_limit, 2048);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, AtlasError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/.atlas.toml` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only when the file exists but cannot be read or parsed.
    pub fn for_project(root: &Path) -> Result<Self, AtlasError> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), AtlasError> {
        let damping = self.ranking.damping;
        if !(0.0..1.0).contains(&damping) {
            return Err(AtlasError::Config(format!(
                "ranking.damping must be in [0, 1), got {damping}"
            )));
        }
        if self.ranking.max_iterations == 0 {
            return Err(AtlasError::Config(
                "ranking.max_iterations must be at least 1".into(),
            ));
        }
        let priors = [
            self.ranking.chat_prior,
            self.ranking.mentioned_prior,
            self.ranking.other_prior,
        ];
        if priors.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(AtlasError::Config(
                "ranking priors must be positive".into(),
            ));
        }
        let multipliers = [
            self.ranking.rare_boost,
            self.ranking.noisy_dampen,
            self.ranking.mentioned_ident_boost,
            self.ranking.self_loop_factor,
        ];
        if multipliers.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err(AtlasError::Config(
                "ranking edge multipliers must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Map rendering configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::MapConfig;
///
/// let config = MapConfig::default();
/// assert_eq!(config.map_mul_no_files, 8);
/// assert!(config.include_important_files);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Default token budget when the caller supplies none (default: 2048).
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    /// Budget multiplier applied when no chat files are given (default: 8).
    #[serde(default = "default_map_mul_no_files")]
    pub map_mul_no_files: usize,
    /// Tokens reserved from the context window for the rest of the prompt (default: 4096).
    #[serde(default = "default_context_window_padding")]
    pub context_window_padding: usize,
    /// Rendered source lines are cut to this many characters (default: 100).
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// List well-known project files at the top of the map (default: true).
    #[serde(default = "default_true")]
    pub include_important_files: bool,
}

fn default_token_limit() -> usize {
    2048
}

fn default_map_mul_no_files() -> usize {
    8
}

fn default_context_window_padding() -> usize {
    4096
}

fn default_max_line_length() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            map_mul_no_files: default_map_mul_no_files(),
            context_window_padding: default_context_window_padding(),
            max_line_length: default_max_line_length(),
            include_important_files: true,
        }
    }
}

/// Weighting and propagation constants for the reference graph.
///
/// The multipliers are empirically tuned; only their direction matters
/// (boosts are `> 1`, dampers are `< 1`).
///
/// # Examples
///
/// ```
/// use atlas_core::RankingConfig;
///
/// let config = RankingConfig::default();
/// assert!(config.rare_boost > 1.0);
/// assert!(config.noisy_dampen < 1.0);
/// assert!(config.chat_prior > config.mentioned_prior);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Probability of following an edge rather than teleporting (default: 0.85).
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Upper bound on propagation rounds (default: 100).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Stop early once the L1 change between rounds drops below this (default: 1e-9).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Prior weight of each chat file (default: 100).
    #[serde(default = "default_chat_prior")]
    pub chat_prior: f64,
    /// Prior weight of each mentioned file (default: 10).
    #[serde(default = "default_mentioned_prior")]
    pub mentioned_prior: f64,
    /// Prior weight of every other file (default: 1).
    #[serde(default = "default_other_prior")]
    pub other_prior: f64,
    /// Multiplier for identifiers referenced exactly once (default: 2).
    #[serde(default = "default_rare_boost")]
    pub rare_boost: f64,
    /// Multiplier for short, generic or widely defined identifiers (default: 0.1).
    #[serde(default = "default_noisy_dampen")]
    pub noisy_dampen: f64,
    /// Identifiers this short or shorter are noisy (default: 2).
    #[serde(default = "default_noisy_max_len")]
    pub noisy_max_len: usize,
    /// Identifiers defined in more files than this are noisy (default: 5).
    #[serde(default = "default_widely_defined_threshold")]
    pub widely_defined_threshold: usize,
    /// Multiplier for identifiers the caller mentioned (default: 10).
    #[serde(default = "default_mentioned_ident_boost")]
    pub mentioned_ident_boost: f64,
    /// Multiplier for references that resolve inside the same file (default: 0.1).
    #[serde(default = "default_self_loop_factor")]
    pub self_loop_factor: f64,
}

fn default_damping() -> f64 {
    0.85
}

fn default_max_iterations() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-9
}

fn default_chat_prior() -> f64 {
    100.0
}

fn default_mentioned_prior() -> f64 {
    10.0
}

fn default_other_prior() -> f64 {
    1.0
}

fn default_rare_boost() -> f64 {
    2.0
}

fn default_noisy_dampen() -> f64 {
    0.1
}

fn default_noisy_max_len() -> usize {
    2
}

fn default_widely_defined_threshold() -> usize {
    5
}

fn default_mentioned_ident_boost() -> f64 {
    10.0
}

fn default_self_loop_factor() -> f64 {
    0.1
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            chat_prior: default_chat_prior(),
            mentioned_prior: default_mentioned_prior(),
            other_prior: default_other_prior(),
            rare_boost: default_rare_boost(),
            noisy_dampen: default_noisy_dampen(),
            noisy_max_len: default_noisy_max_len(),
            widely_defined_threshold: default_widely_defined_threshold(),
            mentioned_ident_boost: default_mentioned_ident_boost(),
            self_loop_factor: default_self_loop_factor(),
        }
    }
}

/// Limits applied when admitting files into a run.
///
/// # Examples
///
/// ```
/// use atlas_core::FilesConfig;
///
/// let config = FilesConfig::default();
/// assert_eq!(config.max_file_size, 1_048_576);
/// assert!(config.skip_dirs.iter().any(|d| d == "node_modules"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Files larger than this many bytes are excluded (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Leading bytes inspected for NUL when detecting binaries (default: 8192).
    #[serde(default = "default_binary_check_bytes")]
    pub binary_check_bytes: usize,
    /// Directory names never descended into when scanning the root.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
}

fn default_max_file_size() -> u64 {
    1_048_576
}

fn default_binary_check_bytes() -> usize {
    8192
}

fn default_skip_dirs() -> Vec<String> {
    ["node_modules", "__pycache__", "venv", "env", "target"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            binary_check_bytes: default_binary_check_bytes(),
            skip_dirs: default_skip_dirs(),
        }
    }
}

/// Persistent cache configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::CacheConfig;
///
/// let config = CacheConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.dir, ".atlas");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist tags and maps between runs (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache directory, relative to the project root (default: `.atlas`).
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

fn default_cache_dir() -> String {
    ".atlas".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AtlasConfig::from_toml("").unwrap();
        assert_eq!(config.map.token_limit, 2048);
        assert_eq!(config.ranking.max_iterations, 100);
        assert_eq!(config.files.binary_check_bytes, 8192);
        assert!(config.cache.enabled);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let toml = r#"
[ranking]
rare_boost = 3.0

[cache]
enabled = false
"#;
        let config = AtlasConfig::from_toml(toml).unwrap();
        assert_eq!(config.ranking.rare_boost, 3.0);
        assert_eq!(config.ranking.noisy_dampen, 0.1);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.dir, ".atlas");
    }

    #[test]
    fn rejects_out_of_range_damping() {
        let err = AtlasConfig::from_toml("[ranking]\ndamping = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("damping"));
    }

    #[test]
    fn rejects_non_positive_prior() {
        let err = AtlasConfig::from_toml("[ranking]\nother_prior = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("priors"));
    }

    #[test]
    fn rejects_zero_self_loop_factor() {
        let err = AtlasConfig::from_toml("[ranking]\nself_loop_factor = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("multipliers"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(AtlasConfig::from_toml("[map\ntoken_limit = ").is_err());
    }

    #[test]
    fn for_project_without_file_returns_defaults() {
        let dir = std::env::temp_dir().join("atlas-config-missing-test");
        let config = AtlasConfig::for_project(&dir).unwrap();
        assert_eq!(config.map.token_limit, 2048);
    }
}
