use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether an identifier occurrence defines or uses a name.
///
/// # Examples
///
/// ```
/// use atlas_core::TagKind;
///
/// assert_eq!(TagKind::Definition.to_string(), "definition");
/// assert_eq!(serde_json::to_string(&TagKind::Reference).unwrap(), "\"reference\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    /// A function, class, type or top-level binding is introduced here.
    Definition,
    /// A name is called, imported or otherwise used here.
    Reference,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagKind::Definition => write!(f, "definition"),
            TagKind::Reference => write!(f, "reference"),
        }
    }
}

/// Summary of which files one map invocation used and why others were dropped.
///
/// Every considered file lands in exactly one of `included` or `excluded`.
///
/// # Examples
///
/// ```
/// use atlas_core::FileReport;
///
/// let mut report = FileReport::default();
/// report.include("src/lib.rs");
/// report.exclude("logo.png", "binary file");
/// assert_eq!(report.total_files_considered, 2);
/// assert_eq!(report.excluded["logo.png"], "binary file");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    /// Files whose tags contributed to the map through the reference graph.
    ///
    /// This includes chat files, files that only reference others, and files
    /// whose definitions were cut by the token budget; their tags still shaped
    /// the ranking. Files actually rendered are the `file:` headers of the map.
    pub included: Vec<String>,
    /// Files that were skipped, mapped to a human-readable reason.
    pub excluded: BTreeMap<String, String>,
    /// Definition tags found across all processed files.
    pub definition_matches: usize,
    /// Reference tags found across all processed files.
    pub reference_matches: usize,
    /// `included.len() + excluded.len()`.
    pub total_files_considered: usize,
    /// The smallest non-empty rendering was still larger than the budget.
    #[serde(default)]
    pub over_budget: bool,
    /// Token count of the returned map.
    #[serde(default)]
    pub map_tokens: usize,
}

impl FileReport {
    /// Record a file that contributed tags.
    pub fn include(&mut self, file: impl Into<String>) {
        self.included.push(file.into());
        self.total_files_considered += 1;
    }

    /// Record a skipped file. A file excluded twice keeps its first reason.
    pub fn exclude(&mut self, file: impl Into<String>, reason: impl Into<String>) {
        let file = file.into();
        if self.excluded.contains_key(&file) {
            return;
        }
        self.excluded.insert(file, reason.into());
        self.total_files_considered += 1;
    }
}

/// One hit from an identifier search, with rendered surrounding lines.
///
/// # Examples
///
/// ```
/// use atlas_core::{IdentifierMatch, TagKind};
///
/// let hit = IdentifierMatch {
///     file: "src/db.py".into(),
///     line: 10,
///     name: "connect".into(),
///     kind: TagKind::Definition,
///     context: "src/db.py:\n  10│def connect():\n".into(),
/// };
/// assert_eq!(hit.kind, TagKind::Definition);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMatch {
    /// Path relative to the project root.
    pub file: String,
    /// 1-based line of the occurrence.
    pub line: u32,
    /// Identifier text.
    pub name: String,
    /// Definition or reference.
    pub kind: TagKind,
    /// Tree rendering of the lines around the occurrence.
    pub context: String,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use atlas_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The rendered map or plain search hits.
    #[default]
    Text,
    /// The full structured result as JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn output_format_default_is_text() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn report_totals_track_both_lists() {
        let mut report = FileReport::default();
        report.include("a.py");
        report.include("b.py");
        report.exclude("c.bin", "binary file");
        report.exclude("c.bin", "unreadable");
        assert_eq!(
            report.total_files_considered,
            report.included.len() + report.excluded.len()
        );
        assert_eq!(report.excluded["c.bin"], "binary file");
    }

    #[test]
    fn report_serializes_snake_case_keys() {
        let report = FileReport::default();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("definition_matches").is_some());
        assert!(json.get("total_files_considered").is_some());
    }

    #[test]
    fn tag_kind_orders_definitions_first() {
        assert!(TagKind::Definition < TagKind::Reference);
    }
}
