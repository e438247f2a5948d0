use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use crate::walker::FileReader;

/// Marker emitted in place of a run of omitted lines.
pub const GAP_MARKER: &str = "⋮";

/// Renders selected source lines grouped by file, as a compact tree.
///
/// File contents are loaded through the [`FileReader`] at most once per
/// renderer, so repeated renderings during budget fitting stay cheap.
pub struct TreeRenderer<'a> {
    reader: &'a dyn FileReader,
    max_line_length: usize,
    files: HashMap<String, Option<Vec<String>>>,
}

impl<'a> TreeRenderer<'a> {
    pub fn new(reader: &'a dyn FileReader, max_line_length: usize) -> Self {
        Self {
            reader,
            max_line_length,
            files: HashMap::new(),
        }
    }

    /// Render the given `(file, line)` locations, with enclosing scope headers.
    ///
    /// Files appear in path order; unreadable files are skipped.
    pub fn render_locations<'b>(
        &mut self,
        locations: impl IntoIterator<Item = (&'b str, u32)>,
    ) -> String {
        let mut by_file: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
        for (file, line) in locations {
            by_file.entry(file).or_default().insert(line);
        }

        let max_line_length = self.max_line_length;
        let mut sections = Vec::new();
        for (file, wanted) in &by_file {
            let Some(lines) = self.load(file) else {
                continue;
            };
            let mut shown = wanted.clone();
            for line in wanted {
                shown.extend(enclosing_scopes(lines, *line));
            }
            let section = render_file(file, lines, &shown, max_line_length);
            if !section.is_empty() {
                sections.push(section);
            }
        }
        sections.join("\n")
    }

    /// Render `line` of `file` with `context` lines on either side.
    ///
    /// Returns `None` when the file cannot be read or renders empty.
    pub fn render_context(&mut self, file: &str, line: u32, context: u32) -> Option<String> {
        let max_line_length = self.max_line_length;
        let lines = self.load(file)?;
        let last = u32::try_from(lines.len()).unwrap_or(u32::MAX);
        if last == 0 {
            return None;
        }
        // Clamp before collecting: `context` comes straight from callers.
        let start = line.saturating_sub(context).clamp(1, last);
        let end = line.saturating_add(context).clamp(start, last);
        let wanted: BTreeSet<u32> = (start..=end).collect();
        let rendered = render_file(file, lines, &wanted, max_line_length);
        (!rendered.is_empty()).then_some(rendered)
    }

    fn load(&mut self, file: &str) -> Option<&[String]> {
        if !self.files.contains_key(file) {
            let loaded = match self.reader.read(file) {
                Ok(content) => Some(content.lines().map(str::to_string).collect()),
                Err(failure) => {
                    tracing::warn!(file, reason = %failure.reason(), "skipping file while rendering");
                    None
                }
            };
            self.files.insert(file.to_string(), loaded);
        }
        self.files.get(file).and_then(|lines| lines.as_deref())
    }
}

/// Render one file's selected lines.
///
/// Line numbers outside the file are clamped to its bounds. Runs of omitted
/// lines collapse to a single [`GAP_MARKER`] line, except that a gap of exactly
/// one line is filled in. An empty file or selection renders as `""`.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use atlas_repomap::output::render_file;
///
/// let lines: Vec<String> = ["import os", "", "def main():", "    run()"]
///     .iter()
///     .map(|s| s.to_string())
///     .collect();
/// let wanted: BTreeSet<u32> = [3].into_iter().collect();
/// assert_eq!(render_file("app.py", &lines, &wanted, 100), "app.py:\n⋮\n3│def main():\n⋮\n");
/// ```
pub fn render_file(
    file: &str,
    lines: &[String],
    wanted: &BTreeSet<u32>,
    max_line_length: usize,
) -> String {
    let total = u32::try_from(lines.len()).unwrap_or(u32::MAX);
    if total == 0 || wanted.is_empty() {
        return String::new();
    }

    let mut shown: BTreeSet<u32> = wanted.iter().map(|l| (*l).clamp(1, total)).collect();
    // Fill single-line gaps so they do not cost a marker
    let filled: Vec<u32> = shown
        .iter()
        .zip(shown.iter().skip(1))
        .filter(|(a, b)| **b == **a + 2)
        .map(|(a, _)| a + 1)
        .collect();
    shown.extend(filled);

    let width = total.to_string().len();
    let mut out = String::new();
    let _ = writeln!(out, "{file}:");

    let mut previous: Option<u32> = None;
    for line in &shown {
        let gap = match previous {
            None => *line > 1,
            Some(prev) => *line > prev + 1,
        };
        if gap {
            let _ = writeln!(out, "{GAP_MARKER}");
        }
        let text = truncate_line(&lines[(*line - 1) as usize], max_line_length);
        let _ = writeln!(out, "{line:>width$}│{text}");
        previous = Some(*line);
    }
    if previous.is_some_and(|last| last < total) {
        let _ = writeln!(out, "{GAP_MARKER}");
    }

    out
}

/// Header lines of the blocks enclosing `line`, judged by indentation.
fn enclosing_scopes(lines: &[String], line: u32) -> Vec<u32> {
    let mut scopes = Vec::new();
    let Some(start) = (line as usize).checked_sub(1) else {
        return scopes;
    };
    let Some(current) = lines.get(start) else {
        return scopes;
    };

    let mut indent = indentation(current);
    let mut index = start;
    while indent > 0 && index > 0 {
        index -= 1;
        let candidate = &lines[index];
        if candidate.trim().is_empty() {
            continue;
        }
        let candidate_indent = indentation(candidate);
        if candidate_indent < indent {
            scopes.push(u32::try_from(index + 1).unwrap_or(u32::MAX));
            indent = candidate_indent;
        }
    }
    scopes
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn truncate_line(line: &str, max_chars: usize) -> &str {
    match line.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &line[..byte_index],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::ReadFailure;

    struct MapReader(HashMap<&'static str, &'static str>);

    impl FileReader for MapReader {
        fn read(&self, rel_path: &str) -> Result<String, ReadFailure> {
            self.0
                .get(rel_path)
                .map(|s| s.to_string())
                .ok_or(ReadFailure::Missing)
        }

        fn modified(&self, _rel_path: &str) -> Option<i64> {
            None
        }
    }

    fn to_lines(source: &str) -> Vec<String> {
        source.lines().map(str::to_string).collect()
    }

    fn set(lines: &[u32]) -> BTreeSet<u32> {
        lines.iter().copied().collect()
    }

    const SOURCE: &str = "class Store:\n    def get(self, key):\n        return self.data[key]\n\n    def put(self, key, value):\n        self.data[key] = value\n\n\ndef helper():\n    pass\n";

    #[test]
    fn gaps_collapse_to_single_marker() {
        let lines = to_lines(SOURCE);
        let rendered = render_file("store.py", &lines, &set(&[2, 9]), 100);
        assert_eq!(
            rendered,
            "store.py:\n⋮\n 2│    def get(self, key):\n⋮\n 9│def helper():\n⋮\n"
        );
    }

    #[test]
    fn single_line_gaps_are_filled() {
        let lines = to_lines(SOURCE);
        let rendered = render_file("store.py", &lines, &set(&[1, 3]), 100);
        assert!(rendered.contains(" 2│    def get"));
        assert_eq!(rendered.matches(GAP_MARKER).count(), 1);
    }

    #[test]
    fn out_of_range_lines_are_clamped() {
        let lines = to_lines("a = 1\nb = 2\n");
        let rendered = render_file("x.py", &lines, &set(&[0, 99]), 100);
        assert_eq!(rendered, "x.py:\n1│a = 1\n2│b = 2\n");
    }

    #[test]
    fn empty_inputs_render_nothing() {
        assert_eq!(render_file("x.py", &[], &set(&[1]), 100), "");
        assert_eq!(render_file("x.py", &to_lines("a"), &BTreeSet::new(), 100), "");
    }

    #[test]
    fn long_lines_are_truncated() {
        let lines = vec!["é".repeat(30)];
        let rendered = render_file("x.py", &lines, &set(&[1]), 10);
        assert_eq!(rendered, format!("x.py:\n1│{}\n", "é".repeat(10)));
    }

    #[test]
    fn locations_include_enclosing_scopes() {
        let reader = MapReader([("store.py", SOURCE)].into_iter().collect());
        let mut renderer = TreeRenderer::new(&reader, 100);
        let rendered = renderer.render_locations([("store.py", 5)]);
        assert!(rendered.contains(" 1│class Store:"));
        assert!(rendered.contains(" 5│    def put"));
        assert!(!rendered.contains("def get"));
    }

    #[test]
    fn locations_group_by_file_and_skip_unreadable() {
        let reader = MapReader(
            [("b.py", "def b():\n    pass\n"), ("a.py", "def a():\n    pass\n")]
                .into_iter()
                .collect(),
        );
        let mut renderer = TreeRenderer::new(&reader, 100);
        let rendered =
            renderer.render_locations([("b.py", 1), ("missing.py", 1), ("a.py", 1)]);
        assert_eq!(rendered, "a.py:\n1│def a():\n⋮\n\nb.py:\n1│def b():\n⋮\n");
    }

    #[test]
    fn context_window_is_clamped_at_file_start() {
        let reader = MapReader([("store.py", SOURCE)].into_iter().collect());
        let mut renderer = TreeRenderer::new(&reader, 100);
        let rendered = renderer.render_context("store.py", 1, 2).unwrap();
        assert!(rendered.starts_with("store.py:\n 1│class Store:"));
        assert!(rendered.contains(" 3│"));
        assert!(!rendered.contains(" 4│"));
        assert!(renderer.render_context("missing.py", 1, 2).is_none());
    }

    #[test]
    fn huge_context_window_is_bounded_by_file_length() {
        let reader = MapReader([("short.py", "def a():\n    pass\n")].into_iter().collect());
        let mut renderer = TreeRenderer::new(&reader, 100);
        let rendered = renderer.render_context("short.py", 1, u32::MAX).unwrap();
        assert_eq!(rendered, "short.py:\n1│def a():\n2│    pass\n");

        let past_end = renderer.render_context("short.py", 50, u32::MAX).unwrap();
        assert_eq!(past_end, rendered);
    }
}
