//! Token-budgeted repository maps ranked by cross-file references.
//!
//! Extracts definition and reference tags with tree-sitter (falling back to
//! per-language regexes), links files through the identifiers they share,
//! ranks them with personalized PageRank over a petgraph graph, and renders
//! the best definitions as a compact tree that fits a token budget. Tags and
//! finished maps are cached in SQLite under the project root.

pub mod budget;
pub mod cache;
pub mod fallback;
pub mod graph;
pub mod important;
pub mod output;
pub mod parser;
pub mod rank;
pub mod search;
pub mod tokens;
pub mod walker;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atlas_core::{AtlasConfig, AtlasError, FileReport, IdentifierMatch, TagKind};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, TagCache};
use crate::graph::{RankingInputs, ReferenceGraph};
use crate::output::TreeRenderer;
use crate::parser::{ExtractionMethod, Tag};
use crate::search::SearchOptions;
use crate::tokens::TokenCounter;
use crate::walker::{FileReader, FsReader, Language};

/// Map returned when there are no files to consider.
pub const NO_FILES_MESSAGE: &str = "No files found to generate a map.";

/// Map returned when files exist but nothing could be rendered.
pub const EMPTY_MAP_MESSAGE: &str = "No repository map could be generated.";

/// Inputs to one [`RepoMapper::repo_map`] call.
///
/// File paths may be root-relative or absolute paths inside the root.
#[derive(Debug, Clone, Default)]
pub struct RepoMapRequest {
    /// Files already visible to the caller. They steer ranking but are not
    /// rendered.
    pub chat_files: Vec<String>,
    /// Candidate files; the whole root is scanned when empty.
    pub other_files: Vec<String>,
    /// Token budget; `None` or `0` selects the configured default.
    pub token_limit: Option<usize>,
    /// Drop definitions nobody references.
    pub exclude_unranked: bool,
    /// Ignore cached tags and maps.
    pub force_refresh: bool,
    pub mentioned_files: Vec<String>,
    pub mentioned_idents: Vec<String>,
    /// Caller's context window, used to widen the budget when there are no
    /// chat files.
    pub max_context_window: Option<usize>,
}

/// A rendered map and the report of how it was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoMapOutput {
    pub map: String,
    pub report: FileReport,
}

/// Builds maps and answers identifier searches for one project root.
///
/// A mapper is cheap to share behind an [`Arc`]; every call is independent
/// apart from the cache.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use atlas_repomap::{RepoMapRequest, RepoMapper};
///
/// let mapper = RepoMapper::open(Path::new(".")).unwrap();
/// let output = mapper.repo_map(&RepoMapRequest::default()).unwrap();
/// println!("{}", output.map);
/// ```
pub struct RepoMapper {
    root: PathBuf,
    config: AtlasConfig,
    cache: Arc<TagCache>,
    reader: Arc<dyn FileReader>,
    counter: Arc<dyn TokenCounter>,
}

enum FileOutcome {
    Tags(Vec<Tag>),
    Excluded(String),
}

impl RepoMapper {
    /// Open a mapper for `root`, loading `.atlas.toml` and the project cache.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::FileNotFound`] if `root` is not a directory,
    /// or a configuration error if `.atlas.toml` is invalid.
    pub fn open(root: &Path) -> Result<Self, AtlasError> {
        let root = canonical_root(root)?;
        let config = AtlasConfig::for_project(&root)?;
        let cache = TagCache::for_project(&root, &config.cache)?;
        Ok(Self::new(root, config, Arc::new(cache)))
    }

    /// Create a mapper over an already-open cache.
    ///
    /// Files are read from disk and tokens counted with `cl100k_base`.
    pub fn new(root: PathBuf, config: AtlasConfig, cache: Arc<TagCache>) -> Self {
        let reader = Arc::new(FsReader::new(root.clone(), &config.files));
        Self {
            root,
            config,
            cache,
            reader,
            counter: Arc::from(tokens::default_counter()),
        }
    }

    /// Replace the source of file content.
    pub fn with_reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Replace the token counter.
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TagCache> {
        &self.cache
    }

    /// Release the mapper, handing back its cache so it can be closed.
    pub fn into_cache(self) -> Arc<TagCache> {
        self.cache
    }

    /// Build a ranked map of the requested files that fits the token budget.
    ///
    /// Identical requests over unchanged files return identical output,
    /// served from the cache unless `force_refresh` is set.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::FileNotFound`] if the root disappeared while
    /// scanning. Per-file problems are reported in
    /// [`FileReport::excluded`] instead.
    pub fn repo_map(&self, request: &RepoMapRequest) -> Result<RepoMapOutput, AtlasError> {
        let token_limit = request
            .token_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(self.config.map.token_limit);

        let chat_files: BTreeSet<String> = request
            .chat_files
            .iter()
            .map(|f| walker::normalize_file_arg(&self.root, f))
            .filter(|f| !f.is_empty())
            .collect();

        let candidates = if request.other_files.is_empty() {
            tracing::info!(root = %self.root.display(), "no other files given, scanning project root");
            walker::walk_repo(&self.root, &self.config.files)?
        } else {
            request.other_files.clone()
        };
        let other_files: BTreeSet<String> = candidates
            .iter()
            .map(|f| walker::normalize_file_arg(&self.root, f))
            .filter(|f| !f.is_empty() && !chat_files.contains(f))
            .collect();

        tracing::debug!(
            chat_files = chat_files.len(),
            other_files = other_files.len(),
            "resolved map inputs"
        );
        if chat_files.is_empty() && other_files.is_empty() {
            return Ok(RepoMapOutput {
                map: NO_FILES_MESSAGE.to_string(),
                report: FileReport::default(),
            });
        }

        let budget = self.effective_budget(
            token_limit,
            !chat_files.is_empty(),
            request.max_context_window,
        );
        let mentioned_files: BTreeSet<String> = request
            .mentioned_files
            .iter()
            .map(|f| walker::normalize_file_arg(&self.root, f))
            .collect();
        let mentioned_idents: BTreeSet<String> = request.mentioned_idents.iter().cloned().collect();

        let job = MapJob {
            chat_files,
            other_files,
            mentioned_files,
            mentioned_idents,
            budget,
            exclude_unranked: request.exclude_unranked,
            force_refresh: request.force_refresh,
        };
        let key = self.map_cache_key(&job);
        let (output, hit) = self
            .cache
            .get_or_compute(&key, job.force_refresh, || self.build_map(&job))?;
        tracing::info!(
            cache_hit = hit,
            budget,
            tokens = output.report.map_tokens,
            included = output.report.included.len(),
            excluded = output.report.excluded.len(),
            "repository map ready"
        );
        Ok(output)
    }

    /// Find identifiers whose name contains `query`, case-insensitively,
    /// across every file under the root.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidInput`] for a blank query.
    pub fn search_identifiers(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<IdentifierMatch>, AtlasError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AtlasError::InvalidInput("search query is empty".into()));
        }

        let files = walker::walk_repo(&self.root, &self.config.files)?;
        let mut report = FileReport::default();
        let tags: Vec<Tag> = self
            .tags_for_files(&files, false, &mut report)
            .into_values()
            .flatten()
            .collect();

        let hits = search::find_matches(&tags, query, options);
        let mut renderer = TreeRenderer::new(self.reader.as_ref(), self.config.map.max_line_length);
        let results = search::render_matches(&hits, &mut renderer, options.context_lines);
        tracing::debug!(query, files = files.len(), results = results.len(), "identifier search finished");
        Ok(results)
    }

    /// Tags for each file, from the cache where possible.
    ///
    /// Cache misses are read and parsed in parallel. Every file lands in
    /// either `report.included` or `report.excluded`, and the tag counts in
    /// `report` are updated. Files without tags are not in the result.
    pub fn tags_for_files(
        &self,
        files: &[String],
        force_refresh: bool,
        report: &mut FileReport,
    ) -> BTreeMap<String, Vec<Tag>> {
        let mut outcomes: BTreeMap<String, FileOutcome> = BTreeMap::new();
        let mut misses: Vec<(String, Option<i64>)> = Vec::new();

        for file in files {
            if outcomes.contains_key(file) {
                continue;
            }
            if !Language::from_path(file).is_supported() {
                outcomes.insert(file.clone(), FileOutcome::Excluded("unsupported file type".into()));
                continue;
            }
            let mtime = self.reader.modified(file);
            let cached = if force_refresh {
                None
            } else {
                self.cache.lookup_tags(file, mtime)
            };
            match cached {
                Some(tags) => {
                    outcomes.insert(file.clone(), FileOutcome::Tags(tags));
                }
                None => misses.push((file.clone(), mtime)),
            }
        }
        misses.sort();
        misses.dedup();

        let hits = outcomes.len();
        let parsed: Vec<(String, FileOutcome)> = misses
            .par_iter()
            .map(|(file, mtime)| (file.clone(), self.extract_file(file, *mtime, force_refresh)))
            .collect();
        tracing::debug!(cached = hits, parsed = parsed.len(), "resolved file tags");
        outcomes.extend(parsed);

        let mut tags_by_file = BTreeMap::new();
        for (file, outcome) in outcomes {
            match outcome {
                FileOutcome::Tags(tags) if !tags.is_empty() => {
                    for tag in &tags {
                        match tag.kind {
                            TagKind::Definition => report.definition_matches += 1,
                            TagKind::Reference => report.reference_matches += 1,
                        }
                    }
                    report.include(file.as_str());
                    tags_by_file.insert(file, tags);
                }
                FileOutcome::Tags(_) => report.exclude(file, "no identifiers found"),
                FileOutcome::Excluded(reason) => report.exclude(file, reason),
            }
        }
        tags_by_file
    }

    fn extract_file(&self, file: &str, mtime: Option<i64>, force_refresh: bool) -> FileOutcome {
        let content = match self.reader.read(file) {
            Ok(content) => content,
            Err(failure) => {
                tracing::debug!(file, reason = %failure.reason(), "excluding file");
                return FileOutcome::Excluded(failure.reason());
            }
        };

        let fingerprint = cache::fingerprint(&content);
        if !force_refresh {
            if let Some(tags) = self.cache.lookup_tags_by_fingerprint(file, &fingerprint) {
                self.cache.store_tags(file, mtime, &fingerprint, &tags);
                return FileOutcome::Tags(tags);
            }
        }

        let extraction = parser::extract_tags(file, &content);
        if extraction.method == ExtractionMethod::Unsupported {
            return FileOutcome::Excluded("unsupported file type".into());
        }
        if let Some(error) = extraction.error {
            return FileOutcome::Excluded(error);
        }
        self.cache.store_tags(file, mtime, &fingerprint, &extraction.tags);
        FileOutcome::Tags(extraction.tags)
    }

    /// Budget after widening for callers with no chat files and a known
    /// context window.
    fn effective_budget(
        &self,
        token_limit: usize,
        has_chat_files: bool,
        max_context_window: Option<usize>,
    ) -> usize {
        let Some(window) = max_context_window else {
            return token_limit;
        };
        if has_chat_files {
            return token_limit;
        }
        let widened = token_limit.saturating_mul(self.config.map.map_mul_no_files);
        let available = window.saturating_sub(self.config.map.context_window_padding);
        match widened.min(available) {
            0 => token_limit,
            target => target,
        }
    }

    fn map_cache_key(&self, job: &MapJob) -> String {
        let mut key = CacheKey::new("map");
        key.push(&self.root.to_string_lossy());
        key.push(&serde_json::to_string(&self.config).unwrap_or_default());
        key.push(&job.budget.to_string());
        key.push(if job.exclude_unranked { "exclude-unranked" } else { "all" });

        for (label, files) in [("chat", &job.chat_files), ("other", &job.other_files)] {
            key.push(label);
            for file in files {
                let mtime = self
                    .reader
                    .modified(file)
                    .map_or_else(|| "-".to_string(), |m| m.to_string());
                key.push(file).push(&mtime);
            }
        }
        key.push("mentioned-files").push_all(job.mentioned_files.iter().map(String::as_str));
        key.push("mentioned-idents").push_all(job.mentioned_idents.iter().map(String::as_str));
        key.finish()
    }

    fn build_map(&self, job: &MapJob) -> Result<RepoMapOutput, AtlasError> {
        let mut report = FileReport::default();
        let all_files: Vec<String> = job
            .chat_files
            .iter()
            .chain(job.other_files.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let tags_by_file = self.tags_for_files(&all_files, job.force_refresh, &mut report);

        let inputs = RankingInputs {
            chat_files: &job.chat_files,
            mentioned_files: &job.mentioned_files,
            mentioned_idents: &job.mentioned_idents,
        };
        let ranking = &self.config.ranking;
        let graph = ReferenceGraph::build(&tags_by_file, &inputs, ranking);
        let scores = rank::propagate(&graph, ranking);
        let mut ranked = rank::rank_definitions(&graph, &scores, &tags_by_file, &job.chat_files);
        if job.exclude_unranked {
            ranked.retain(|r| r.score > 0.0);
        }
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            ranked = ranked.len(),
            "ranked definitions"
        );

        let header = if self.config.map.include_important_files {
            let important =
                important::filter_important_files(job.other_files.iter().map(String::as_str));
            important.iter().map(|f| format!("{f}\n")).collect::<String>()
        } else {
            String::new()
        };

        let mut renderer = TreeRenderer::new(self.reader.as_ref(), self.config.map.max_line_length);
        let fit = budget::fit_to_budget(ranked.len(), job.budget, self.counter.as_ref(), |k| {
            let body = renderer.render_locations(
                ranked[..k].iter().map(|r| (r.tag.file.as_str(), r.tag.line)),
            );
            match (header.is_empty(), body.is_empty()) {
                (true, _) => body,
                (false, true) => header.clone(),
                (false, false) => format!("{header}\n{body}"),
            }
        });
        if fit.over_budget {
            tracing::warn!(
                budget = job.budget,
                tokens = fit.tokens,
                "smallest map exceeds the token budget"
            );
        }

        let map = if fit.rendered.trim().is_empty() {
            EMPTY_MAP_MESSAGE.to_string()
        } else {
            fit.rendered
        };
        report.over_budget = fit.over_budget;
        report.map_tokens = self.counter.count(&map);
        Ok(RepoMapOutput { map, report })
    }
}

struct MapJob {
    chat_files: BTreeSet<String>,
    other_files: BTreeSet<String>,
    mentioned_files: BTreeSet<String>,
    mentioned_idents: BTreeSet<String>,
    budget: usize,
    exclude_unranked: bool,
    force_refresh: bool,
}

/// Resolve `root` to an absolute directory path.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] if `root` does not exist or is not a
/// directory.
pub fn canonical_root(root: &Path) -> Result<PathBuf, AtlasError> {
    let resolved = root
        .canonicalize()
        .map_err(|_| AtlasError::FileNotFound(root.to_path_buf()))?;
    if !resolved.is_dir() {
        return Err(AtlasError::FileNotFound(root.to_path_buf()));
    }
    Ok(resolved)
}

/// Interpret a loosely typed token limit.
///
/// Accepts integers, integral floats and numeric strings. Anything missing,
/// empty, unparsable or not positive yields `default`.
///
/// # Examples
///
/// ```
/// use atlas_repomap::parse_token_limit;
/// use serde_json::json;
///
/// assert_eq!(parse_token_limit(Some(&json!(4096)), 2048), 4096);
/// assert_eq!(parse_token_limit(Some(&json!("1024")), 2048), 1024);
/// assert_eq!(parse_token_limit(Some(&json!("")), 2048), 2048);
/// assert_eq!(parse_token_limit(Some(&json!(-5)), 2048), 2048);
/// assert_eq!(parse_token_limit(None, 2048), 2048);
/// ```
pub fn parse_token_limit(value: Option<&serde_json::Value>, default: usize) -> usize {
    use serde_json::Value;

    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 1.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok().and_then(|n| u64::try_from(n).ok()),
        _ => None,
    };
    parsed
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}
