//! Recognition of well-known project files (manifests, docs, CI config).
//!
//! These are listed by path at the top of a map because they orient a reader
//! even though they rarely define ranked identifiers.

use std::collections::HashSet;
use std::sync::LazyLock;

static IMPORTANT_FILE_NAMES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // Documentation
        "readme",
        "readme.md",
        "readme.rst",
        "readme.txt",
        "contributing.md",
        "changelog.md",
        "license",
        "license.md",
        "license.txt",
        // Rust
        "cargo.toml",
        // Python
        "pyproject.toml",
        "setup.py",
        "setup.cfg",
        "requirements.txt",
        "pipfile",
        "tox.ini",
        // JavaScript / TypeScript
        "package.json",
        "tsconfig.json",
        "deno.json",
        // Go
        "go.mod",
        // JVM
        "pom.xml",
        "build.gradle",
        "build.gradle.kts",
        "settings.gradle",
        "build.sbt",
        // Ruby
        "gemfile",
        "rakefile",
        // PHP
        "composer.json",
        // .NET
        "directory.build.props",
        // C / C++
        "cmakelists.txt",
        "meson.build",
        // Build and deploy
        "makefile",
        "justfile",
        "dockerfile",
        "docker-compose.yml",
        "docker-compose.yaml",
        "compose.yaml",
        "procfile",
        "vagrantfile",
        // Editor and tooling
        ".editorconfig",
        ".gitignore",
        ".gitlab-ci.yml",
        ".travis.yml",
        "jenkinsfile",
        "azure-pipelines.yml",
    ]
    .into_iter()
    .collect()
});

const CI_DIRECTORIES: &[&str] = &[".github/workflows/", ".circleci/"];

/// Whether `path` names a well-known project file.
///
/// Matching is on the file name, case-insensitively, plus any YAML file under
/// a CI configuration directory.
///
/// # Examples
///
/// ```
/// use atlas_repomap::important::is_important;
///
/// assert!(is_important("Cargo.toml"));
/// assert!(is_important("crates/core/README.md"));
/// assert!(is_important(".github/workflows/ci.yml"));
/// assert!(!is_important("src/main.rs"));
/// ```
pub fn is_important(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let lowered = normalized.to_lowercase();

    if CI_DIRECTORIES.iter().any(|dir| {
        lowered.starts_with(dir) && (lowered.ends_with(".yml") || lowered.ends_with(".yaml"))
    }) {
        return true;
    }

    let name = lowered.rsplit('/').next().unwrap_or(&lowered);
    IMPORTANT_FILE_NAMES.contains(name)
}

/// Select the important files from `paths`, sorted and de-duplicated.
///
/// Root-level files come before nested ones, so the project's own manifest
/// leads the list.
///
/// # Examples
///
/// ```
/// use atlas_repomap::important::filter_important_files;
///
/// let files = ["src/lib.rs", "docs/README.md", "Cargo.toml", "Makefile"];
/// assert_eq!(
///     filter_important_files(files),
///     vec!["Cargo.toml", "Makefile", "docs/README.md"]
/// );
/// ```
pub fn filter_important_files<'a>(paths: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut important: Vec<String> = paths
        .into_iter()
        .filter(|p| is_important(p))
        .map(str::to_string)
        .collect();
    important.sort_by(|a, b| {
        depth(a)
            .cmp(&depth(b))
            .then_with(|| a.cmp(b))
    });
    important.dedup();
    important
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        assert!(is_important("readme.MD"));
        assert!(is_important("DOCKERFILE"));
        assert!(is_important("web/Package.json"));
    }

    #[test]
    fn ci_workflows_need_yaml_extension() {
        assert!(is_important(".github/workflows/release.yaml"));
        assert!(!is_important(".github/workflows/script.sh"));
        assert!(is_important(".circleci/config.yml"));
    }

    #[test]
    fn ordinary_sources_are_not_important() {
        for path in ["src/lib.rs", "app/models.py", "cargo.toml.bak", "readme_gen.py"] {
            assert!(!is_important(path), "{path} should not be important");
        }
    }

    #[test]
    fn filter_orders_shallow_files_first() {
        let files = ["b/go.mod", "go.mod", "a/go.mod", "go.mod"];
        assert_eq!(
            filter_important_files(files),
            vec!["go.mod", "a/go.mod", "b/go.mod"]
        );
    }

    #[test]
    fn windows_separators_are_normalized() {
        assert!(is_important(".github\\workflows\\ci.yml"));
    }
}
