//! Substring search over extracted identifier tags.

use std::cmp::Ordering;

use atlas_core::{IdentifierMatch, TagKind};
use serde::{Deserialize, Serialize};

use crate::output::TreeRenderer;
use crate::parser::Tag;

/// Filters and limits for an identifier search.
///
/// # Examples
///
/// ```
/// use atlas_repomap::search::SearchOptions;
///
/// let options = SearchOptions::default();
/// assert_eq!(options.max_results, 50);
/// assert_eq!(options.context_lines, 2);
/// assert!(options.include_definitions && options.include_references);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub max_results: usize,
    /// Lines of source shown on each side of a hit.
    pub context_lines: u32,
    pub include_definitions: bool,
    pub include_references: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 50,
            context_lines: 2,
            include_definitions: true,
            include_references: true,
        }
    }
}

impl SearchOptions {
    fn accepts(&self, kind: TagKind) -> bool {
        match kind {
            TagKind::Definition => self.include_definitions,
            TagKind::Reference => self.include_references,
        }
    }
}

/// Select the tags whose name contains `query`, ignoring case.
///
/// Definitions come before references; within a kind, names where the query
/// matches earlier come first, then file path and line. At most
/// `options.max_results` tags are returned.
///
/// # Examples
///
/// ```
/// use atlas_core::TagKind;
/// use atlas_repomap::parser::Tag;
/// use atlas_repomap::search::{find_matches, SearchOptions};
/// use atlas_repomap::walker::Language;
///
/// let tag = |name: &str, kind| Tag {
///     file: "db.py".into(),
///     name: name.into(),
///     kind,
///     line: 1,
///     language: Language::Python,
/// };
/// let tags = vec![
///     tag("open_conn", TagKind::Reference),
///     tag("ConnPool", TagKind::Definition),
///     tag("close", TagKind::Definition),
/// ];
/// let hits = find_matches(&tags, "conn", &SearchOptions::default());
/// let names: Vec<&str> = hits.iter().map(|t| t.name.as_str()).collect();
/// assert_eq!(names, ["ConnPool", "open_conn"]);
/// ```
pub fn find_matches<'t>(tags: &'t [Tag], query: &str, options: &SearchOptions) -> Vec<&'t Tag> {
    let needle = query.to_lowercase();
    let mut hits: Vec<(usize, &Tag)> = tags
        .iter()
        .filter(|tag| options.accepts(tag.kind))
        .filter_map(|tag| {
            tag.name
                .to_lowercase()
                .find(&needle)
                .map(|position| (position, tag))
        })
        .collect();

    hits.sort_by(|(pa, a), (pb, b)| compare_hits(*pa, a, *pb, b));
    hits.truncate(options.max_results);
    hits.into_iter().map(|(_, tag)| tag).collect()
}

fn compare_hits(pa: usize, a: &Tag, pb: usize, b: &Tag) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then(pa.cmp(&pb))
        .then_with(|| a.file.cmp(&b.file))
        .then_with(|| a.line.cmp(&b.line))
        .then_with(|| a.name.cmp(&b.name))
}

/// Render a context window around each hit.
///
/// Hits whose file can no longer be read, and so render empty, are dropped.
pub fn render_matches(
    hits: &[&Tag],
    renderer: &mut TreeRenderer<'_>,
    context_lines: u32,
) -> Vec<IdentifierMatch> {
    hits.iter()
        .filter_map(|tag| {
            let context = renderer.render_context(&tag.file, tag.line, context_lines)?;
            Some(IdentifierMatch {
                file: tag.file.clone(),
                line: tag.line,
                name: tag.name.clone(),
                kind: tag.kind,
                context,
            })
        })
        .collect()
}
