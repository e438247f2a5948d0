use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use atlas_core::{AtlasError, FilesConfig};
use serde::{Deserialize, Serialize};

/// Programming language detected from file extension.
///
/// C# and Scala have no bundled grammar and are handled by the regex
/// fallback only.
///
/// # Examples
///
/// ```
/// use atlas_repomap::walker::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("py"), Language::Python);
/// assert_eq!(Language::from_extension("java"), Language::Java);
/// assert_eq!(Language::from_extension("c"), Language::C);
/// assert_eq!(Language::from_extension("cpp"), Language::Cpp);
/// assert_eq!(Language::from_extension("rb"), Language::Ruby);
/// assert_eq!(Language::from_extension("php"), Language::Php);
/// assert_eq!(Language::from_extension("kt"), Language::Kotlin);
/// assert_eq!(Language::from_extension("swift"), Language::Swift);
/// assert_eq!(Language::from_extension("cs"), Language::CSharp);
/// assert_eq!(Language::from_extension("txt"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    CSharp,
    Scala,
    Unknown,
}

/// Groups of languages that share a regex fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    Python,
    JavaScript,
    /// Brace-delimited languages with C-like declarations.
    CLike,
    Ruby,
    Rust,
    Go,
    Php,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" | "rake" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "cs" => Language::CSharp,
            "scala" | "sc" => Language::Scala,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Get the tree-sitter language grammar for this language.
    ///
    /// Returns `None` for languages without a bundled grammar.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
            Language::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            Language::Kotlin => Some(tree_sitter_kotlin_ng::LANGUAGE.into()),
            Language::Swift => Some(tree_sitter_swift::LANGUAGE.into()),
            Language::CSharp | Language::Scala | Language::Unknown => None,
        }
    }

    /// The regex fallback table used when structured parsing yields nothing.
    pub fn family(&self) -> Option<LanguageFamily> {
        match self {
            Language::Python => Some(LanguageFamily::Python),
            Language::TypeScript | Language::JavaScript => Some(LanguageFamily::JavaScript),
            Language::Java
            | Language::C
            | Language::Cpp
            | Language::Kotlin
            | Language::Swift
            | Language::CSharp
            | Language::Scala => Some(LanguageFamily::CLike),
            Language::Ruby => Some(LanguageFamily::Ruby),
            Language::Rust => Some(LanguageFamily::Rust),
            Language::Go => Some(LanguageFamily::Go),
            Language::Php => Some(LanguageFamily::Php),
            Language::Unknown => None,
        }
    }

    /// Whether any extraction strategy exists for this language.
    pub fn is_supported(&self) -> bool {
        *self != Language::Unknown
    }
}

/// Walk a project, respecting `.gitignore`, returning every regular file.
///
/// Hidden entries and directories named in [`FilesConfig::skip_dirs`] are not
/// descended into. Returned paths are relative to `root`, use `/` separators,
/// and are sorted.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] if `root` is not a directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use atlas_core::FilesConfig;
/// use atlas_repomap::walker::walk_repo;
///
/// let files = walk_repo(Path::new("."), &FilesConfig::default()).unwrap();
/// for f in &files {
///     println!("{f}");
/// }
/// ```
pub fn walk_repo(root: &Path, config: &FilesConfig) -> Result<Vec<String>, AtlasError> {
    if !root.is_dir() {
        return Err(AtlasError::FileNotFound(root.to_path_buf()));
    }

    let skip_dirs = config.skip_dirs.clone();
    let walker = ignore::WalkBuilder::new(root)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(entry.depth() > 0 && is_dir && skip_dirs.iter().any(|d| entry.file_name() == d.as_str()))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable walk entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(path_to_slash(relative));
        }
    }

    files.sort();
    Ok(files)
}

/// Normalize a caller-supplied file argument to a root-relative `/` path.
///
/// Absolute paths inside `root` are made relative; anything else is kept with
/// leading `./` segments removed.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use atlas_repomap::walker::normalize_file_arg;
///
/// let root = Path::new("/repo");
/// assert_eq!(normalize_file_arg(root, "/repo/src/a.py"), "src/a.py");
/// assert_eq!(normalize_file_arg(root, "./src/b.py"), "src/b.py");
/// ```
pub fn normalize_file_arg(root: &Path, file: &str) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        if let Ok(relative) = path.strip_prefix(root) {
            return path_to_slash(relative);
        }
        return path_to_slash(path);
    }
    let mut normalized = file.replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

fn path_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}

/// Why a file's content could not be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    Missing,
    TooLarge { size: u64, limit: u64 },
    Binary,
    NotUtf8,
    Io(String),
}

impl ReadFailure {
    /// Human-readable exclusion reason for the file report.
    pub fn reason(&self) -> String {
        match self {
            ReadFailure::Missing => "file not found".into(),
            ReadFailure::TooLarge { size, limit } => {
                format!("too large ({size} bytes, limit {limit})")
            }
            ReadFailure::Binary => "binary file".into(),
            ReadFailure::NotUtf8 => "not valid UTF-8".into(),
            ReadFailure::Io(e) => format!("unreadable: {e}"),
        }
    }
}

/// Source of file content and modification times.
///
/// The pipeline reads through this trait so tests can substitute fixtures.
pub trait FileReader: Send + Sync {
    /// Read a root-relative file as text.
    fn read(&self, rel_path: &str) -> Result<String, ReadFailure>;

    /// Modification time in nanoseconds since the epoch, if known.
    fn modified(&self, rel_path: &str) -> Option<i64>;
}

/// [`FileReader`] backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct FsReader {
    root: PathBuf,
    max_file_size: u64,
    binary_check_bytes: usize,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>, config: &FilesConfig) -> Self {
        Self {
            root: root.into(),
            max_file_size: config.max_file_size,
            binary_check_bytes: config.binary_check_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileReader for FsReader {
    fn read(&self, rel_path: &str) -> Result<String, ReadFailure> {
        let path = self.root.join(rel_path);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadFailure::Missing)
            }
            Err(e) => return Err(ReadFailure::Io(e.to_string())),
        };
        if !metadata.is_file() {
            return Err(ReadFailure::Io("not a regular file".into()));
        }
        if metadata.len() > self.max_file_size {
            return Err(ReadFailure::TooLarge {
                size: metadata.len(),
                limit: self.max_file_size,
            });
        }

        let bytes = std::fs::read(&path).map_err(|e| ReadFailure::Io(e.to_string()))?;

        // Null bytes in the leading window mark a binary file
        let check_len = bytes.len().min(self.binary_check_bytes);
        if bytes[..check_len].contains(&0) {
            return Err(ReadFailure::Binary);
        }

        String::from_utf8(bytes).map_err(|_| ReadFailure::NotUtf8)
    }

    fn modified(&self, rel_path: &str) -> Option<i64> {
        let modified = std::fs::metadata(self.root.join(rel_path))
            .ok()?
            .modified()
            .ok()?;
        let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
        i64::try_from(nanos).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("src/app.ts"), "function run() {}").unwrap();
        fs::write(root.join("README.md"), "# Hello").unwrap();

        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x()").unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join(".hidden/secret.py"), "def s(): pass").unwrap();

        dir
    }

    #[test]
    fn walk_returns_sorted_relative_paths() {
        let dir = make_temp_repo();
        let files = walk_repo(dir.path(), &FilesConfig::default()).unwrap();
        assert_eq!(
            files,
            vec!["README.md", "src/app.ts", "src/lib.py", "src/main.rs"]
        );
    }

    #[test]
    fn walk_skips_configured_and_hidden_dirs() {
        let dir = make_temp_repo();
        let files = walk_repo(dir.path(), &FilesConfig::default()).unwrap();
        assert!(files.iter().all(|f| !f.starts_with("node_modules")));
        assert!(files.iter().all(|f| !f.starts_with(".hidden")));
    }

    #[test]
    fn walk_respects_gitignore() {
        let dir = make_temp_repo();
        let root = dir.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/output.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = walk_repo(root, &FilesConfig::default()).unwrap();
        assert!(
            files.iter().all(|f| !f.starts_with("build")),
            "gitignored files should be skipped: {files:?}"
        );
    }

    #[test]
    fn walk_rejects_missing_root() {
        let err = walk_repo(Path::new("/definitely/not/here"), &FilesConfig::default())
            .unwrap_err();
        assert!(matches!(err, AtlasError::FileNotFound(_)));
    }

    #[test]
    fn reader_rejects_binary_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut binary = b"fn main() { ".to_vec();
        binary.push(0);
        fs::write(root.join("binary.rs"), &binary).unwrap();
        fs::write(root.join("huge.rs"), "x".repeat(2048)).unwrap();
        fs::write(root.join("ok.rs"), "fn ok() {}").unwrap();

        let config = FilesConfig {
            max_file_size: 1024,
            ..FilesConfig::default()
        };
        let reader = FsReader::new(root, &config);

        assert_eq!(reader.read("binary.rs"), Err(ReadFailure::Binary));
        assert!(matches!(
            reader.read("huge.rs"),
            Err(ReadFailure::TooLarge { size: 2048, limit: 1024 })
        ));
        assert_eq!(reader.read("missing.rs"), Err(ReadFailure::Missing));
        assert_eq!(reader.read("ok.rs").unwrap(), "fn ok() {}");
        assert!(reader.modified("ok.rs").is_some());
        assert!(reader.modified("missing.rs").is_none());
    }

    #[test]
    fn reader_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("latin1.py"), [0x63u8, 0x61, 0x66, 0xe9]).unwrap();
        let reader = FsReader::new(dir.path(), &FilesConfig::default());
        assert_eq!(reader.read("latin1.py"), Err(ReadFailure::NotUtf8));
    }

    #[test]
    fn language_detection_from_path() {
        assert_eq!(Language::from_path("src/app.TSX"), Language::TypeScript);
        assert_eq!(Language::from_path("Makefile"), Language::Unknown);
        assert_eq!(Language::Scala.family(), Some(LanguageFamily::CLike));
        assert!(Language::CSharp.tree_sitter_language().is_none());
        assert!(!Language::Unknown.is_supported());
    }
}
