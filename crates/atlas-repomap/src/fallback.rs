//! Line-oriented regex extraction for files structured parsing cannot handle.
//!
//! Each language family has an ordered pattern table. Every non-blank,
//! non-comment line is tested against the table top to bottom; the first
//! pattern that yields a usable name produces exactly one tag for that line.

use std::collections::HashMap;
use std::sync::LazyLock;

use atlas_core::TagKind;
use atlas_core::TagKind::{Definition as Def, Reference as Ref};
use regex::Regex;

use crate::parser::{is_identifier, Tag};
use crate::walker::{Language, LanguageFamily};

struct Pattern {
    regex: Regex,
    kind: TagKind,
}

struct FamilyTable {
    patterns: Vec<Pattern>,
    comment_prefixes: &'static [&'static str],
    keywords: &'static [&'static str],
}

/// Leading words that turn an apparent declaration into a statement.
const STATEMENT_WORDS: &[&str] = &[
    "return", "else", "new", "throw", "await", "case", "yield", "delete", "goto", "echo",
];

const PYTHON_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "return", "not", "and", "or", "in", "is", "with",
    "def", "class", "lambda", "yield", "assert", "except", "import", "from", "as", "pass",
    "raise", "del", "global", "nonlocal", "try", "finally", "await", "async", "None", "True",
    "False", "print",
];

const JS_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "catch", "function", "return",
    "typeof", "instanceof", "new", "delete", "void", "await", "async", "yield", "import",
    "export", "from", "class", "const", "let", "var", "super", "this", "constructor",
];

const CLIKE_KEYWORDS: &[&str] = &[
    "if", "else", "for", "foreach", "while", "do", "switch", "case", "catch", "return",
    "sizeof", "typeof", "new", "delete", "throw", "using", "lock", "fixed", "when", "match",
    "synchronized", "static", "public", "private", "protected", "internal", "void", "int",
    "import", "package", "include", "define", "class", "struct", "super", "this", "base",
    "guard", "defer",
];

const RUBY_KEYWORDS: &[&str] = &[
    "if", "elsif", "else", "unless", "while", "until", "for", "case", "when", "return", "def",
    "class", "module", "end", "do", "yield", "puts", "require", "require_relative", "raise",
];

const RUST_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "loop", "match", "return", "fn", "let", "mut", "use", "mod",
    "pub", "impl", "struct", "enum", "trait", "type", "where", "as", "in", "move", "ref",
    "Some", "Ok", "Err", "None",
];

const GO_KEYWORDS: &[&str] = &[
    "if", "else", "for", "switch", "case", "select", "return", "func", "go", "defer", "range",
    "type", "var", "const", "import", "package", "make", "new", "len", "append",
];

const PHP_KEYWORDS: &[&str] = &[
    "if", "elseif", "else", "for", "foreach", "while", "switch", "case", "catch", "return",
    "function", "array", "isset", "unset", "empty", "list", "echo", "print", "new", "use",
    "require", "require_once", "include", "include_once",
];

fn table(
    entries: &[(&str, TagKind)],
    comment_prefixes: &'static [&'static str],
    keywords: &'static [&'static str],
) -> FamilyTable {
    let patterns = entries
        .iter()
        .filter_map(|(source, kind)| match Regex::new(source) {
            Ok(regex) => Some(Pattern { regex, kind: *kind }),
            Err(e) => {
                tracing::error!(pattern = %source, error = %e, "invalid fallback pattern");
                None
            }
        })
        .collect();
    FamilyTable {
        patterns,
        comment_prefixes,
        keywords,
    }
}

static TABLES: LazyLock<HashMap<LanguageFamily, FamilyTable>> = LazyLock::new(|| {
    let mut tables = HashMap::new();

    tables.insert(
        LanguageFamily::Python,
        table(
            &[
                (r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(", Def),
                (r"^\s*class\s+([A-Za-z_]\w*)\s*[(:]", Def),
                (r"^\s*from\s+[\w.]+\s+import\s+\(?\s*([A-Za-z_]\w*)", Ref),
                (r"^\s*import\s+(?:\w+\.)*([A-Za-z_]\w*)", Ref),
                (r"^([A-Za-z_]\w*)\s*(?::[^=]+)?=(?:[^=]|$)", Def),
                (r"([A-Za-z_]\w*)\s*\(", Ref),
            ],
            &["#"],
            PYTHON_KEYWORDS,
        ),
    );

    tables.insert(
        LanguageFamily::JavaScript,
        table(
            &[
                (
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)",
                    Def,
                ),
                (
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
                    Def,
                ),
                (
                    r"^\s*(?:export\s+)?(?:declare\s+)?(?:interface|type|enum)\s+([A-Za-z_$][\w$]*)",
                    Def,
                ),
                (r"^\s*import\s+(?:type\s+)?\{?\s*([A-Za-z_$][\w$]*)", Ref),
                (
                    r"^\s*(?:const|let|var)\s+\{?\s*([A-Za-z_$][\w$]*).*\brequire\s*\(",
                    Ref,
                ),
                (r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)", Def),
                (
                    r"^\s+(?:(?:static|async|public|private|protected|readonly|get|set)\s+)*([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::[^{]*)?\{\s*$",
                    Def,
                ),
                (r"([A-Za-z_$][\w$]*)\s*\(", Ref),
            ],
            &["//", "/*", "*"],
            JS_KEYWORDS,
        ),
    );

    tables.insert(
        LanguageFamily::CLike,
        table(
            &[
                (r"^\s*#\s*define\s+([A-Za-z_]\w*)", Def),
                (r#"^\s*#\s*include\s*[<"](?:[\w.\-]*/)*([A-Za-z_]\w*)"#, Ref),
                (
                    r"^\s*(?:import|using|package)\s+(?:static\s+)?(?:\w+\.)*([A-Za-z_]\w*)",
                    Ref,
                ),
                (
                    r"^\s*(?:(?:public|private|protected|internal|abstract|final|static|sealed|open|data|partial|export|inline|enum|annotation|case)\s+)*(?:class|interface|enum|struct|record|trait|object|protocol|extension|namespace)\s+([A-Za-z_]\w*)",
                    Def,
                ),
                (
                    r"^\s*(?:(?:public|private|protected|internal|open|override|static|final|abstract|suspend|inline|private\(set\)|mutating)\s+)*(?:fun|func|def)\s+(?:<[^>]*>\s*)?(?:[\w.]+\.)?([A-Za-z_]\w*)",
                    Def,
                ),
                (
                    r"^\s*(?:[\w<>\[\],.*&:?]+\s+)+\**&?([A-Za-z_]\w*)\s*\([^)]*\)\s*(?:const\s*)?(?:throws\s+[\w\s,.]+)?\{?\s*$",
                    Def,
                ),
                (
                    r"^(?:(?:static|const|final|val|var|let|public|private)\s+)+(?:[\w<>\[\]]+\s+)?([A-Za-z_]\w*)\s*(?::[^=]+)?=(?:[^=]|$)",
                    Def,
                ),
                (r"([A-Za-z_]\w*)\s*\(", Ref),
            ],
            &["//", "/*", "*"],
            CLIKE_KEYWORDS,
        ),
    );

    tables.insert(
        LanguageFamily::Ruby,
        table(
            &[
                (r"^\s*def\s+(?:self\.)?([A-Za-z_]\w*)", Def),
                (r"^\s*(?:class|module)\s+(?:[A-Z]\w*::)*([A-Z]\w*)", Def),
                (
                    r#"^\s*require(?:_relative)?\s*\(?\s*['"](?:[\w.\-]*/)*([A-Za-z_]\w*)"#,
                    Ref,
                ),
                (r"^([A-Za-z_]\w*)\s*=(?:[^=~]|$)", Def),
                (r"([A-Za-z_]\w*)\s*\(", Ref),
                (r"\.([A-Za-z_]\w*)", Ref),
            ],
            &["#"],
            RUBY_KEYWORDS,
        ),
    );

    tables.insert(
        LanguageFamily::Rust,
        table(
            &[
                (
                    r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)"#,
                    Def,
                ),
                (
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|type|union|mod)\s+([A-Za-z_]\w*)",
                    Def,
                ),
                (
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?([A-Za-z_]\w*)\s*:",
                    Def,
                ),
                (r"^\s*macro_rules!\s*([A-Za-z_]\w*)", Def),
                (
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?:\w+::)*\{?\s*([A-Za-z_]\w*)",
                    Ref,
                ),
                (r"([A-Za-z_]\w*)!?\s*\(", Ref),
            ],
            &["//", "/*", "*"],
            RUST_KEYWORDS,
        ),
    );

    tables.insert(
        LanguageFamily::Go,
        table(
            &[
                (r"^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)", Def),
                (r"^\s*type\s+([A-Za-z_]\w*)", Def),
                (r"^(?:var|const)\s+([A-Za-z_]\w*)", Def),
                (
                    r#"^\s*(?:import\s+)?(?:\w+\s+)?"(?:[\w.\-]*/)*([A-Za-z_]\w*)"\s*$"#,
                    Ref,
                ),
                (r"([A-Za-z_]\w*)\s*\(", Ref),
            ],
            &["//", "/*", "*"],
            GO_KEYWORDS,
        ),
    );

    tables.insert(
        LanguageFamily::Php,
        table(
            &[
                (
                    r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+&?([A-Za-z_]\w*)",
                    Def,
                ),
                (
                    r"^\s*(?:(?:abstract|final|readonly)\s+)*(?:class|interface|trait|enum)\s+([A-Za-z_]\w*)",
                    Def,
                ),
                (
                    r#"^\s*(?:use|require|require_once|include|include_once)\b\s*\(?\s*['"]?(?:[\w.\-]*[/\\])*([A-Za-z_]\w*)"#,
                    Ref,
                ),
                (r"^\$([A-Za-z_]\w*)\s*=(?:[^=]|$)", Def),
                (r"([A-Za-z_]\w*)\s*\(", Ref),
            ],
            &["//", "#", "/*", "*"],
            PHP_KEYWORDS,
        ),
    );

    tables
});

/// Extract tags from `content` using the regex table for `language`'s family.
///
/// Returns an empty list for languages without a family or when nothing
/// matches. Never panics.
///
/// # Examples
///
/// ```
/// use atlas_core::TagKind;
/// use atlas_repomap::fallback::extract_fallback_tags;
/// use atlas_repomap::walker::Language;
///
/// let tags = extract_fallback_tags("a.py", "def run():\n    helper()\n", Language::Python);
/// assert_eq!(tags.len(), 2);
/// assert_eq!(tags[0].kind, TagKind::Definition);
/// assert_eq!(tags[1].name, "helper");
/// ```
pub fn extract_fallback_tags(file: &str, content: &str, language: Language) -> Vec<Tag> {
    let Some(family) = language.family() else {
        return Vec::new();
    };
    let Some(table) = TABLES.get(&family) else {
        return Vec::new();
    };

    let mut tags = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || table
                .comment_prefixes
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
        {
            continue;
        }

        if let Some((name, kind)) = match_line(table, line, trimmed) {
            tags.push(Tag {
                file: file.to_string(),
                name,
                kind,
                line: u32::try_from(index + 1).unwrap_or(u32::MAX),
                language,
            });
        }
    }
    tags
}

fn match_line(table: &FamilyTable, line: &str, trimmed: &str) -> Option<(String, TagKind)> {
    let first_word = trimmed
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("");

    for pattern in &table.patterns {
        if pattern.kind == TagKind::Definition && STATEMENT_WORDS.contains(&first_word) {
            continue;
        }
        let name = pattern.regex.captures_iter(line).find_map(|captures| {
            captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .find(|name| !table.keywords.contains(name) && is_identifier(name))
        });
        if let Some(name) = name {
            return Some((name.to_string(), pattern.kind));
        }
    }
    None
}
